//! HTTP clients for the source calendar and the target platform.
//!
//! - [`GoogleCalendarClient`] reads events for a time window (paginated)
//! - [`DiscordClient`] manages guild scheduled events owned by the bot
//! - [`GoogleCredentials`] mints and refreshes calendar access tokens
//!
//! The two clients implement the `cs-core` client traits, so the reconciler never sees
//! HTTP details. Status codes are translated into `WriteError` / `SourceError`
//! variants here; retry decisions are made by the core executor.

mod discord;
mod google;
mod oauth;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use discord::DiscordClient;
pub use google::{GoogleAuth, GoogleCalendarClient};
pub use oauth::GoogleCredentials;

/// Default request timeout for API calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client construction errors.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// A required credential was empty or malformed.
    #[error("invalid credentials: {reason}")]
    InvalidCredentials { reason: &'static str },
    /// A credentials file could not be read or is not usable.
    #[error("invalid credentials file {path}: {message}")]
    CredentialsFile { path: PathBuf, message: String },
    /// A required identifier was missing.
    #[error("missing {0}")]
    MissingSetting(&'static str),
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

fn build_http(user_agent: &str) -> Result<reqwest::Client, RemoteError> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .user_agent(user_agent)
        .build()
        .map_err(RemoteError::ClientBuild)
}

fn require_secret(value: &str, reason: &'static str) -> Result<String, RemoteError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RemoteError::InvalidCredentials { reason });
    }
    Ok(trimmed.to_string())
}

fn require_setting(value: &str, name: &'static str) -> Result<String, RemoteError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RemoteError::MissingSetting(name));
    }
    Ok(trimmed.to_string())
}
