//! Google Calendar events reader.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat};
use cs_core::{EventTime, RawEvent, SourceClient, SourceError, TimeWindow};
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::oauth::{GoogleCredentials, TokenSource};
use crate::{RemoteError, build_http, require_secret, require_setting};

const CALENDAR_API_URL: &str = "https://www.googleapis.com/calendar/v3";
const USER_AGENT: &str = concat!("calsync/", env!("CARGO_PKG_VERSION"));
const PAGE_SIZE: u32 = 250;
const CANCELLED: &str = "cancelled";
/// Upper bound on pages fetched for one window.
const MAX_PAGES: u32 = 100;

/// How requests to the Calendar API are authorised.
#[derive(Clone)]
pub enum GoogleAuth {
    /// API key, for public calendars.
    ApiKey(String),
    /// OAuth bearer token obtained out of band. Not refreshed.
    AccessToken(String),
    /// Credentials file used to mint and refresh access tokens.
    Credentials(GoogleCredentials),
}

impl fmt::Debug for GoogleAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey([REDACTED])"),
            Self::AccessToken(_) => f.write_str("AccessToken([REDACTED])"),
            Self::Credentials(credentials) => {
                f.debug_tuple("Credentials").field(credentials).finish()
            }
        }
    }
}

/// Per-request authorisation, resolved from [`GoogleAuth`].
enum Authorization {
    ApiKey(String),
    Bearer(String),
    Refreshing(TokenSource),
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey([REDACTED])"),
            Self::Bearer(_) => f.write_str("Bearer([REDACTED])"),
            Self::Refreshing(source) => f.debug_tuple("Refreshing").field(source).finish(),
        }
    }
}

/// Reads one calendar's events, expanding recurring events into instances.
#[derive(Debug)]
pub struct GoogleCalendarClient {
    http: reqwest::Client,
    base_url: String,
    calendar_id: String,
    auth: Authorization,
    query: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsPage {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleEvent {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    location: String,
    start: Option<GoogleTime>,
    end: Option<GoogleTime>,
    #[serde(default)]
    creator: Option<Person>,
    #[serde(default)]
    attendees: Vec<Person>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleTime {
    date: Option<NaiveDate>,
    date_time: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Deserialize)]
struct Person {
    email: Option<String>,
}

impl GoogleCalendarClient {
    pub fn new(calendar_id: &str, auth: GoogleAuth) -> Result<Self, RemoteError> {
        let calendar_id = require_setting(calendar_id, "Google calendar id")?;
        let auth = match auth {
            GoogleAuth::ApiKey(key) => {
                Authorization::ApiKey(require_secret(&key, "Google API key cannot be empty")?)
            }
            GoogleAuth::AccessToken(token) => Authorization::Bearer(require_secret(
                &token,
                "Google access token cannot be empty",
            )?),
            GoogleAuth::Credentials(credentials) => {
                Authorization::Refreshing(TokenSource::new(credentials))
            }
        };
        Ok(Self {
            http: build_http(USER_AGENT)?,
            base_url: CALENDAR_API_URL.to_string(),
            calendar_id,
            auth,
            query: None,
        })
    }

    /// Restricts results to events matching a free-text query.
    #[must_use]
    pub fn with_query(mut self, query: Option<String>) -> Self {
        self.query = query.filter(|q| !q.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn events_url(&self) -> Result<Url, SourceError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| SourceError::Unavailable(format!("invalid API url: {err}")))?;
        url.path_segments_mut()
            .map_err(|()| SourceError::Unavailable("API url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["calendars", self.calendar_id.as_str(), "events"]);
        Ok(url)
    }

    async fn fetch_page(
        &self,
        window: &TimeWindow,
        page_token: Option<&str>,
    ) -> Result<EventsPage, SourceError> {
        let mut params = vec![
            ("timeMin", window.start.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("timeMax", window.end.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
            ("maxResults", PAGE_SIZE.to_string()),
        ];
        if let Some(query) = &self.query {
            params.push(("q", query.clone()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        let mut request = self.http.get(self.events_url()?);
        request = match &self.auth {
            Authorization::ApiKey(key) => {
                params.push(("key", key.clone()));
                request
            }
            Authorization::Bearer(token) => request.bearer_auth(token),
            Authorization::Refreshing(source) => {
                request.bearer_auth(source.access_token(&self.http).await?)
            }
        };

        let response = request
            .query(&params)
            .send()
            .await
            .map_err(|err| SourceError::Unavailable(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| SourceError::Unavailable(err.to_string()))?;
        if !status.is_success() {
            if let (StatusCode::UNAUTHORIZED, Authorization::Refreshing(source)) =
                (status, &self.auth)
            {
                source.invalidate().await;
            }
            return Err(classify(status, &body));
        }
        serde_json::from_str(&body).map_err(|err| SourceError::InvalidResponse(err.to_string()))
    }
}

impl SourceClient for GoogleCalendarClient {
    async fn list_events(&self, window: &TimeWindow) -> Result<Vec<RawEvent>, SourceError> {
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0_u32;
        loop {
            let page = self.fetch_page(window, page_token.as_deref()).await?;
            pages += 1;
            events.extend(page.items.into_iter().filter_map(into_raw));
            page_token = next_page_token(page_token.as_deref(), page.next_page_token, pages);
            if page_token.is_none() {
                break;
            }
        }
        tracing::debug!(
            calendar_id = %self.calendar_id,
            pages,
            events = events.len(),
            "fetched calendar events"
        );
        Ok(events)
    }
}

/// The token for the page after `pages` pages, or `None` to stop paging.
fn next_page_token(current: Option<&str>, next: Option<String>, pages: u32) -> Option<String> {
    let next = next.filter(|token| !token.is_empty())?;
    if current == Some(next.as_str()) {
        tracing::warn!(pages, "calendar API repeated a page token, stopping");
        return None;
    }
    if pages >= MAX_PAGES {
        tracing::warn!(pages, "calendar page limit reached, later events are not read");
        return None;
    }
    Some(next)
}

fn into_raw(event: GoogleEvent) -> Option<RawEvent> {
    if event.status.as_deref() == Some(CANCELLED) {
        return None;
    }
    let (Some(start), Some(end)) = (
        event.start.and_then(into_event_time),
        event.end.and_then(into_event_time),
    ) else {
        tracing::warn!(event_id = %event.id, "skipping event without start or end");
        return None;
    };
    Some(RawEvent {
        id: event.id,
        title: event.summary,
        description: event.description,
        location: event.location,
        start,
        end,
        creator_email: event.creator.and_then(|person| person.email),
        attendee_emails: event
            .attendees
            .into_iter()
            .filter_map(|person| person.email)
            .collect(),
    })
}

fn into_event_time(time: GoogleTime) -> Option<EventTime> {
    match (time.date_time, time.date) {
        (Some(instant), _) => Some(EventTime::DateTime(instant)),
        (None, Some(date)) => Some(EventTime::Date(date)),
        (None, None) => None,
    }
}

fn classify(status: StatusCode, body: &str) -> SourceError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|body| body.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        SourceError::Unavailable(format!("status {status}: {message}"))
    } else {
        SourceError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}
