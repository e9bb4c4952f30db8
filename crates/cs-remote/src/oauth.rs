//! Google OAuth credentials that mint short-lived access tokens.
//!
//! Two credential file shapes are understood, both as written by the Google
//! Cloud tooling:
//!
//! - `authorized_user`: a client id/secret pair plus a refresh token
//! - `service_account`: a client email plus an RSA private key, exchanged
//!   through a signed JWT assertion
//!
//! Access tokens are cached and refreshed shortly before they expire.

use std::fmt;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeDelta, Utc};
use cs_core::SourceError;
use reqwest::StatusCode;
use ring::rand::SystemRandom;
use ring::signature::{RSA_PKCS1_SHA256, RsaKeyPair};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::RemoteError;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const CALENDAR_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/calendar.readonly";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for service-account assertions. Google's maximum.
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Tokens are refreshed this long before their reported expiry.
const REFRESH_MARGIN_SECS: i64 = 60;
/// Assumed lifetime when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;
const MAX_EXPIRES_IN_SECS: i64 = 86_400;

/// A Google credentials file.
#[derive(Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GoogleCredentials {
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl fmt::Debug for GoogleCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthorizedUser { client_id, .. } => f
                .debug_struct("AuthorizedUser")
                .field("client_id", client_id)
                .field("client_secret", &"[REDACTED]")
                .field("refresh_token", &"[REDACTED]")
                .finish_non_exhaustive(),
            Self::ServiceAccount { client_email, .. } => f
                .debug_struct("ServiceAccount")
                .field("client_email", client_email)
                .field("private_key", &"[REDACTED]")
                .finish_non_exhaustive(),
        }
    }
}

impl GoogleCredentials {
    /// Reads an `authorized_user` or `service_account` JSON file.
    pub fn from_file(path: &Path) -> Result<Self, RemoteError> {
        let contents =
            std::fs::read_to_string(path).map_err(|err| RemoteError::CredentialsFile {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        Self::from_json(&contents).map_err(|message| RemoteError::CredentialsFile {
            path: path.to_path_buf(),
            message,
        })
    }

    fn from_json(contents: &str) -> Result<Self, String> {
        let credentials: Self = serde_json::from_str(contents).map_err(|err| err.to_string())?;
        if let Self::ServiceAccount { private_key, .. } = &credentials {
            // Reject unusable keys at startup rather than on the first cycle.
            signing_key(private_key).map_err(|err| err.to_string())?;
        }
        Ok(credentials)
    }

    fn token_uri(&self) -> &str {
        match self {
            Self::AuthorizedUser { token_uri, .. } | Self::ServiceAccount { token_uri, .. } => {
                token_uri.as_str()
            }
        }
    }

    /// Form fields for a token request issued at `now`.
    fn grant(&self, now: DateTime<Utc>) -> Result<Vec<(&'static str, String)>, SourceError> {
        match self {
            Self::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
                ..
            } => Ok(vec![
                ("grant_type", "refresh_token".to_string()),
                ("client_id", client_id.clone()),
                ("client_secret", client_secret.clone()),
                ("refresh_token", refresh_token.clone()),
            ]),
            Self::ServiceAccount {
                client_email,
                private_key,
                token_uri,
            } => {
                let assertion = signed_assertion(client_email, private_key, token_uri, now)?;
                Ok(vec![
                    ("grant_type", JWT_BEARER_GRANT.to_string()),
                    ("assertion", assertion),
                ])
            }
        }
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + TimeDelta::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Hands out a valid access token, refreshing it when needed.
pub(crate) struct TokenSource {
    credentials: GoogleCredentials,
    cached: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSource")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl TokenSource {
    pub(crate) fn new(credentials: GoogleCredentials) -> Self {
        Self {
            credentials,
            cached: Mutex::new(None),
        }
    }

    pub(crate) async fn access_token(&self, http: &reqwest::Client) -> Result<String, SourceError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh(now)) {
            return Ok(token.access_token.clone());
        }

        let token = self.fetch(http, now).await?;
        tracing::debug!(expires_at = %token.expires_at, "refreshed Google access token");
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// Drops the cached token so the next request fetches a new one.
    pub(crate) async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn fetch(
        &self,
        http: &reqwest::Client,
        now: DateTime<Utc>,
    ) -> Result<CachedToken, SourceError> {
        let form = self.credentials.grant(now)?;
        let response = http
            .post(self.credentials.token_uri())
            .form(&form)
            .send()
            .await
            .map_err(|err| SourceError::Unavailable(format!("token request failed: {err}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| SourceError::Unavailable(format!("token request failed: {err}")))?;
        if !status.is_success() {
            return Err(classify_token_error(status, &body));
        }
        parse_token(&body, now)
    }
}

fn parse_token(body: &str, now: DateTime<Utc>) -> Result<CachedToken, SourceError> {
    let response: TokenResponse = serde_json::from_str(body)
        .map_err(|err| SourceError::InvalidResponse(format!("token response: {err}")))?;
    let expires_in = response
        .expires_in
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
        .min(MAX_EXPIRES_IN_SECS);
    Ok(CachedToken {
        access_token: response.access_token,
        expires_at: now + TimeDelta::seconds(expires_in),
    })
}

fn classify_token_error(status: StatusCode, body: &str) -> SourceError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
        #[serde(default)]
        error_description: Option<String>,
    }

    let message = serde_json::from_str::<ErrorBody>(body).map_or_else(
        |_| body.trim().to_string(),
        |body| match body.error_description {
            Some(description) => format!("{}: {description}", body.error),
            None => body.error,
        },
    );
    if status.is_server_error() {
        SourceError::Unavailable(format!("token endpoint status {status}: {message}"))
    } else {
        SourceError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

fn signing_key(private_key: &str) -> Result<RsaKeyPair, SourceError> {
    let der: String = private_key
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("-----"))
        .collect();
    let der = STANDARD
        .decode(der)
        .map_err(|err| SourceError::Unavailable(format!("invalid service account key: {err}")))?;
    RsaKeyPair::from_pkcs8(&der)
        .map_err(|err| SourceError::Unavailable(format!("invalid service account key: {err}")))
}

/// Builds an RS256-signed JWT asserting `client_email` for the calendar scope.
fn signed_assertion(
    client_email: &str,
    private_key: &str,
    token_uri: &str,
    now: DateTime<Utc>,
) -> Result<String, SourceError> {
    let header = serde_json::json!({ "alg": "RS256", "typ": "JWT" });
    let issued_at = now.timestamp();
    let claims = serde_json::json!({
        "iss": client_email,
        "scope": CALENDAR_READONLY_SCOPE,
        "aud": token_uri,
        "iat": issued_at,
        "exp": issued_at + ASSERTION_LIFETIME_SECS,
    });
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    );

    let key = signing_key(private_key)?;
    let mut signature = vec![0; key.public().modulus_len()];
    key.sign(
        &RSA_PKCS1_SHA256,
        &SystemRandom::new(),
        signing_input.as_bytes(),
        &mut signature,
    )
    .map_err(|_| SourceError::Unavailable("failed to sign service account assertion".to_string()))?;

    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
}
