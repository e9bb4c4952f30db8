//! Discord guild scheduled events.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use cs_core::{EventPayload, KindShape, ManagedEvent, TargetClient, TargetEventKind, WriteError};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::{RemoteError, build_http, require_secret, require_setting};

const DISCORD_API_URL: &str = "https://discord.com/api/v10";
const USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/calsync/calsync, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

const MAX_NAME_CHARS: usize = 100;
const MAX_DESCRIPTION_CHARS: usize = 1000;
const UNTITLED: &str = "Untitled event";

const PRIVACY_GUILD_ONLY: u8 = 2;
const ENTITY_VOICE: u8 = 2;
const ENTITY_EXTERNAL: u8 = 3;

/// Discord REST client scoped to one guild.
///
/// Events count as managed when the bot user created them; everything else
/// in the guild is left alone.
pub struct DiscordClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    guild_id: String,
    bot_user_id: OnceCell<String>,
}

impl fmt::Debug for DiscordClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordClient")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .field("guild_id", &self.guild_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct EventBody<'a> {
    name: String,
    description: String,
    scheduled_start_time: String,
    scheduled_end_time: String,
    privacy_level: u8,
    entity_type: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity_metadata: Option<EntityMetadata<'a>>,
}

#[derive(Debug, Serialize)]
struct EntityMetadata<'a> {
    location: &'a str,
}

#[derive(Debug, Deserialize)]
struct ScheduledEvent {
    id: String,
    #[serde(default)]
    creator_id: Option<String>,
    entity_type: u8,
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    id: String,
}

impl DiscordClient {
    /// Creates a client for `guild_id` authenticated as a bot.
    pub fn new(token: &str, guild_id: &str) -> Result<Self, RemoteError> {
        let token = require_secret(token, "Discord bot token cannot be empty")?;
        let guild_id = require_setting(guild_id, "Discord guild id")?;
        Ok(Self {
            http: build_http(USER_AGENT)?,
            base_url: DISCORD_API_URL.to_string(),
            token,
            guild_id,
            bot_user_id: OnceCell::new(),
        })
    }

    /// Points the client at a different API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub async fn create_voice_event(
        &self,
        title: &str,
        description: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        channel_id: &str,
    ) -> Result<String, WriteError> {
        let kind = voice_kind(channel_id);
        let body = event_body(title, description, start, end, &kind);
        self.post_event(&body).await
    }

    pub async fn create_external_event(
        &self,
        title: &str,
        description: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        location: &str,
    ) -> Result<String, WriteError> {
        let kind = TargetEventKind::External {
            location: location.to_string(),
        };
        let body = event_body(title, description, start, end, &kind);
        self.post_event(&body).await
    }

    /// Lists the guild's scheduled events created by this bot.
    pub async fn list_owned_events(&self) -> Result<Vec<ManagedEvent>, WriteError> {
        let bot_id = self.bot_user_id().await?;
        let body = self.send(self.http.get(self.events_url())).await?;
        let events: Vec<ScheduledEvent> =
            serde_json::from_str(&body).map_err(|err| invalid_response(&err))?;
        Ok(owned_events(events, bot_id))
    }

    pub async fn patch_event(&self, target_id: &str, payload: &EventPayload) -> Result<(), WriteError> {
        let body = event_body(
            &payload.title,
            &payload.description,
            payload.start,
            payload.end,
            &payload.kind,
        );
        let url = format!("{}/{target_id}", self.events_url());
        self.send(self.http.patch(url).json(&body)).await?;
        Ok(())
    }

    /// Deletes an event; an already-deleted event is not an error.
    pub async fn remove_event(&self, target_id: &str) -> Result<(), WriteError> {
        let url = format!("{}/{target_id}", self.events_url());
        match self.send(self.http.delete(url)).await {
            Ok(_) => Ok(()),
            Err(WriteError::Fatal { status: 404, .. }) => {
                tracing::debug!(target_id, "scheduled event already gone");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn post_event(&self, body: &EventBody<'_>) -> Result<String, WriteError> {
        let response = self.send(self.http.post(self.events_url()).json(body)).await?;
        let created: ScheduledEvent =
            serde_json::from_str(&response).map_err(|err| invalid_response(&err))?;
        Ok(created.id)
    }

    async fn bot_user_id(&self) -> Result<&str, WriteError> {
        let id = self
            .bot_user_id
            .get_or_try_init(|| async {
                let body = self
                    .send(self.http.get(format!("{}/users/@me", self.base_url)))
                    .await?;
                let user: CurrentUser =
                    serde_json::from_str(&body).map_err(|err| invalid_response(&err))?;
                tracing::debug!(bot_user_id = %user.id, "resolved bot user");
                Ok::<_, WriteError>(user.id)
            })
            .await?;
        Ok(id.as_str())
    }

    fn events_url(&self) -> String {
        format!("{}/guilds/{}/scheduled-events", self.base_url, self.guild_id)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, WriteError> {
        let response = request
            .header(AUTHORIZATION, format!("Bot {}", self.token))
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        let retry_after = retry_after_header(response.headers());
        let body = response.text().await.map_err(transport)?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(classify(status, retry_after, &body))
        }
    }
}

impl TargetClient for DiscordClient {
    async fn list_managed_events(&self) -> Result<Vec<ManagedEvent>, WriteError> {
        self.list_owned_events().await
    }

    async fn create_event(&self, payload: &EventPayload) -> Result<String, WriteError> {
        match &payload.kind {
            TargetEventKind::VoiceLinked { channel_id } => {
                self.create_voice_event(
                    &payload.title,
                    &payload.description,
                    payload.start,
                    payload.end,
                    channel_id,
                )
                .await
            }
            TargetEventKind::External { location } => {
                self.create_external_event(
                    &payload.title,
                    &payload.description,
                    payload.start,
                    payload.end,
                    location,
                )
                .await
            }
        }
    }

    async fn update_event(&self, target_id: &str, payload: &EventPayload) -> Result<(), WriteError> {
        self.patch_event(target_id, payload).await
    }

    async fn delete_event(&self, target_id: &str) -> Result<(), WriteError> {
        self.remove_event(target_id).await
    }
}

fn voice_kind(channel_id: &str) -> TargetEventKind {
    TargetEventKind::VoiceLinked {
        channel_id: channel_id.to_string(),
    }
}

fn event_body<'a>(
    title: &str,
    description: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    kind: &'a TargetEventKind,
) -> EventBody<'a> {
    let title = title.trim();
    let title = if title.is_empty() { UNTITLED } else { title };
    let (entity_type, channel_id, entity_metadata) = match kind {
        TargetEventKind::VoiceLinked { channel_id } => (ENTITY_VOICE, Some(channel_id.as_str()), None),
        TargetEventKind::External { location } => (
            ENTITY_EXTERNAL,
            None,
            Some(EntityMetadata {
                location: location.as_str(),
            }),
        ),
    };
    EventBody {
        name: truncate_chars(title, MAX_NAME_CHARS),
        description: truncate_chars(description, MAX_DESCRIPTION_CHARS),
        scheduled_start_time: start.to_rfc3339_opts(SecondsFormat::Secs, true),
        scheduled_end_time: end.to_rfc3339_opts(SecondsFormat::Secs, true),
        privacy_level: PRIVACY_GUILD_ONLY,
        entity_type,
        channel_id,
        entity_metadata,
    }
}

fn owned_events(events: Vec<ScheduledEvent>, bot_id: &str) -> Vec<ManagedEvent> {
    events
        .into_iter()
        .filter(|event| event.creator_id.as_deref() == Some(bot_id))
        .filter_map(|event| {
            let shape = match event.entity_type {
                ENTITY_VOICE => KindShape::Voice,
                ENTITY_EXTERNAL => KindShape::External,
                other => {
                    tracing::debug!(
                        event_id = %event.id,
                        entity_type = other,
                        "ignoring unsupported event type"
                    );
                    return None;
                }
            };
            Some(ManagedEvent {
                id: event.id,
                shape,
            })
        })
        .collect()
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

fn classify(status: StatusCode, retry_after: Option<Duration>, body: &str) -> WriteError {
    let message = api_message(body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => WriteError::RateLimited {
            retry_after: retry_after_body(body).or(retry_after),
        },
        StatusCode::UNAUTHORIZED => WriteError::Unauthorized(message),
        s if s.is_server_error() => WriteError::Transient(format!("status {s}: {message}")),
        s => WriteError::Fatal {
            status: s.as_u16(),
            message,
        },
    }
}

fn api_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorPayload {
        message: String,
    }

    serde_json::from_str::<ErrorPayload>(body)
        .map(|payload| payload.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

fn retry_after_body(body: &str) -> Option<Duration> {
    #[derive(Deserialize)]
    struct RateLimitPayload {
        retry_after: f64,
    }

    serde_json::from_str::<RateLimitPayload>(body)
        .ok()
        .and_then(|payload| Duration::try_from_secs_f64(payload.retry_after).ok())
}

fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

fn transport(err: reqwest::Error) -> WriteError {
    WriteError::Transient(err.to_string())
}

fn invalid_response(err: &serde_json::Error) -> WriteError {
    WriteError::Fatal {
        status: 200,
        message: format!("invalid response: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 18, 0, 0).unwrap()
    }

    fn end() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 20, 0, 0).unwrap()
    }

    #[test]
    fn client_rejects_empty_token() {
        assert!(matches!(
            DiscordClient::new("  ", "guild"),
            Err(RemoteError::InvalidCredentials { .. })
        ));
    }

    #[test]
    fn client_rejects_missing_guild() {
        assert!(matches!(
            DiscordClient::new("token", ""),
            Err(RemoteError::MissingSetting(_))
        ));
    }

    #[test]
    fn client_debug_redacts_token() {
        let client = DiscordClient::new("secret-token", "guild-1").unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn voice_body_links_channel() {
        let kind = voice_kind("chan-9");
        let body = serde_json::to_value(event_body("Raid", "Bring potions", start(), end(), &kind))
            .unwrap();
        assert_eq!(body["entity_type"], 2);
        assert_eq!(body["channel_id"], "chan-9");
        assert_eq!(body["privacy_level"], 2);
        assert_eq!(body["scheduled_start_time"], "2026-01-05T18:00:00Z");
        assert_eq!(body["scheduled_end_time"], "2026-01-05T20:00:00Z");
        assert!(body.get("entity_metadata").is_none());
    }

    #[test]
    fn external_body_carries_location() {
        let kind = TargetEventKind::External {
            location: "123 Main St".to_string(),
        };
        let body = serde_json::to_value(event_body("Picnic", "", start(), end(), &kind)).unwrap();
        assert_eq!(body["entity_type"], 3);
        assert_eq!(body["entity_metadata"]["location"], "123 Main St");
        assert!(body.get("channel_id").is_none());
    }

    #[test]
    fn body_enforces_platform_limits() {
        let kind = voice_kind("c");
        let long_title = "x".repeat(150);
        let long_description = "é".repeat(1200);
        let body = event_body(&long_title, &long_description, start(), end(), &kind);
        assert_eq!(body.name.chars().count(), MAX_NAME_CHARS);
        assert!(body.name.ends_with('…'));
        assert_eq!(body.description.chars().count(), MAX_DESCRIPTION_CHARS);

        let body = event_body("   ", "", start(), end(), &kind);
        assert_eq!(body.name, UNTITLED);
    }

    #[test]
    fn only_bot_created_events_are_managed() {
        let events = vec![
            ScheduledEvent {
                id: "1".to_string(),
                creator_id: Some("bot".to_string()),
                entity_type: ENTITY_VOICE,
            },
            ScheduledEvent {
                id: "2".to_string(),
                creator_id: Some("human".to_string()),
                entity_type: ENTITY_EXTERNAL,
            },
            ScheduledEvent {
                id: "3".to_string(),
                creator_id: Some("bot".to_string()),
                entity_type: ENTITY_EXTERNAL,
            },
            ScheduledEvent {
                id: "4".to_string(),
                creator_id: Some("bot".to_string()),
                entity_type: 1,
            },
        ];
        assert_eq!(
            owned_events(events, "bot"),
            vec![
                ManagedEvent {
                    id: "1".to_string(),
                    shape: KindShape::Voice
                },
                ManagedEvent {
                    id: "3".to_string(),
                    shape: KindShape::External
                },
            ]
        );
    }

    #[test]
    fn rate_limit_prefers_body_hint() {
        let err = classify(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(9)),
            r#"{"message": "You are being rate limited.", "retry_after": 1.5, "global": false}"#,
        );
        assert_eq!(
            err,
            WriteError::RateLimited {
                retry_after: Some(Duration::from_millis(1500))
            }
        );

        let err = classify(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(9)), "");
        assert_eq!(
            err,
            WriteError::RateLimited {
                retry_after: Some(Duration::from_secs(9))
            }
        );
    }

    #[test]
    fn statuses_map_to_error_classes() {
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, None, r#"{"message": "401: Unauthorized"}"#),
            WriteError::Unauthorized(message) if message == "401: Unauthorized"
        ));
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, None, "upstream"),
            WriteError::Transient(_)
        ));
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, None, r#"{"message": "Unknown Guild Scheduled Event"}"#),
            WriteError::Fatal { status: 404, .. }
        ));
        assert!(matches!(
            classify(StatusCode::FORBIDDEN, None, "{}"),
            WriteError::Fatal { status: 403, .. }
        ));
    }

    #[test]
    fn retry_after_header_parses_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "2.5".parse().unwrap());
        assert_eq!(
            retry_after_header(&headers),
            Some(Duration::from_millis(2500))
        );
        assert_eq!(retry_after_header(&HeaderMap::new()), None);
    }
}
