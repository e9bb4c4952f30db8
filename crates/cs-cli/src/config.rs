//! Configuration loading and management.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use cs_core::{FilterConfigError, FilterCriteria, KindRules, ReconcileOptions, RetryPolicy};
use cs_remote::{GoogleAuth, GoogleCredentials, RemoteError};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Deserializer, Serialize};

const REDACTED: &str = "[REDACTED]";

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the ledger file.
    pub ledger_path: PathBuf,
    /// Seconds between the starts of consecutive cycles.
    pub sync_interval_secs: u64,
    /// How far ahead to read calendar events.
    pub days_in_future: u32,
    /// IANA timezone used to place all-day events.
    pub timezone: String,
    pub google: GoogleConfig,
    pub discord: DiscordConfig,
    pub retry: RetryConfig,
    /// Predicate name (optionally prefixed `exclude_`) to patterns.
    pub filters: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GoogleConfig {
    pub calendar_id: String,
    /// `authorized_user` or `service_account` JSON file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Free-text query forwarded to the calendar API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscordConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub guild_id: String,
    /// Voice channel linked to voice events.
    #[serde(deserialize_with = "string_or_number")]
    pub channel_id: String,
    /// Locations containing this marker become voice events.
    pub voice_marker: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            guild_id: String::new(),
            channel_id: String::new(),
            voice_marker: "discord".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
    pub rate_limit_buffer_ms: u64,
    pub write_spacing_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            multiplier: 2.0,
            max_backoff_ms: 60_000,
            rate_limit_buffer_ms: 500,
            write_spacing_ms: 2000,
        }
    }
}

impl RetryConfig {
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            multiplier: self.multiplier,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            rate_limit_buffer: Duration::from_millis(self.rate_limit_buffer_ms),
            write_spacing: Duration::from_millis(self.write_spacing_ms),
        }
    }
}

/// Discord snowflakes arrive as integers from env vars and unquoted TOML.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    })
}

fn redact(secret: Option<&String>) -> Option<&'static str> {
    secret.map(|_| REDACTED)
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("ledger_path", &self.ledger_path)
            .field("sync_interval_secs", &self.sync_interval_secs)
            .field("days_in_future", &self.days_in_future)
            .field("timezone", &self.timezone)
            .field("google", &self.google)
            .field("discord", &self.discord)
            .field("retry", &self.retry)
            .field("filters", &self.filters)
            .finish()
    }
}

impl fmt::Debug for GoogleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleConfig")
            .field("calendar_id", &self.calendar_id)
            .field("credentials_file", &self.credentials_file)
            .field("api_key", &redact(self.api_key.as_ref()))
            .field("access_token", &redact(self.access_token.as_ref()))
            .field("query", &self.query)
            .finish()
    }
}

impl fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("bot_token", &redact(self.bot_token.as_ref()))
            .field("guild_id", &self.guild_id)
            .field("channel_id", &self.channel_id)
            .field("voice_marker", &self.voice_marker)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            ledger_path: data_dir.join("ledger.json"),
            sync_interval_secs: 300,
            days_in_future: 30,
            timezone: "UTC".to_string(),
            google: GoogleConfig::default(),
            discord: DiscordConfig::default(),
            retry: RetryConfig::default(),
            filters: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // CALSYNC_DISCORD__BOT_TOKEN -> discord.bot_token
        figment = figment.merge(Env::prefixed("CALSYNC_").split("__"));

        figment.extract()
    }

    /// Validates the configured filters.
    pub fn filter_criteria(&self) -> Result<FilterCriteria, FilterConfigError> {
        FilterCriteria::from_config(&self.filters)
    }

    /// The configured timezone, or UTC when it is not recognised.
    pub fn timezone(&self) -> Tz {
        cs_core::resolve_timezone(&self.timezone)
    }

    pub fn kind_rules(&self) -> KindRules {
        KindRules::new(&self.discord.voice_marker, self.discord.channel_id.trim())
    }

    pub fn reconcile_options(&self) -> Result<ReconcileOptions, FilterConfigError> {
        Ok(ReconcileOptions {
            days_in_future: self.days_in_future,
            timezone: self.timezone(),
            kind_rules: self.kind_rules(),
            criteria: self.filter_criteria()?,
        })
    }

    /// Interval between cycle starts; never shorter than one second.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    /// Calendar credentials, or `None` when none are configured.
    ///
    /// A credentials file takes precedence over an access token, which takes
    /// precedence over an API key.
    pub fn google_auth(&self) -> Result<Option<GoogleAuth>, RemoteError> {
        if let Some(path) = self
            .google
            .credentials_file
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
        {
            return GoogleCredentials::from_file(path).map(|c| Some(GoogleAuth::Credentials(c)));
        }
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Ok(non_empty(&self.google.access_token)
            .map(GoogleAuth::AccessToken)
            .or_else(|| non_empty(&self.google.api_key).map(GoogleAuth::ApiKey)))
    }
}

/// Returns the platform-specific config directory for calsync.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("calsync"))
}

/// Returns the platform-specific data directory for calsync.
///
/// On Linux: `~/.local/share/calsync`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("calsync"))
}
