//! Seams to the source calendar and the target platform.
//!
//! Concrete HTTP implementations live in `cs-remote`; tests substitute
//! in-memory fakes.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::event::{NormalizedEvent, RawEvent};
use crate::kind::{KindShape, TargetEventKind};

/// Half-open time range `[start, end)` to read source events for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// The window from `now` to `days` days ahead.
    pub fn lookahead(now: DateTime<Utc>, days: u32) -> Self {
        Self {
            start: now,
            end: now + chrono::TimeDelta::days(i64::from(days)),
        }
    }
}

/// Reading the source calendar failed for the whole window.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("source calendar unavailable: {0}")]
    Unavailable(String),
    #[error("source calendar rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid source response: {0}")]
    InvalidResponse(String),
}

/// A failed call against the target platform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    /// Throttled; `retry_after` is the platform's hint, if any.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    /// Network failure or server-side error worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Credentials rejected. Every following call would fail the same way.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Permission, validation or unknown-identifier errors.
    #[error("request rejected ({status}): {message}")]
    Fatal { status: u16, message: String },
}

impl WriteError {
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }

    /// Short label used in retry logs.
    pub const fn cause(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient(_) => "transient",
            Self::Unauthorized(_) => "unauthorized",
            Self::Fatal { .. } => "fatal",
        }
    }
}

/// A scheduled event owned by this integration on the target platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedEvent {
    pub id: String,
    pub shape: KindShape,
}

/// Everything needed to render one target event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPayload {
    pub title: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub kind: TargetEventKind,
}

impl EventPayload {
    pub fn new(event: &NormalizedEvent, kind: TargetEventKind) -> Self {
        Self {
            title: event.title.clone(),
            description: event.description.clone(),
            start: event.start,
            end: event.end,
            kind,
        }
    }
}

/// Reads raw events from the source calendar.
pub trait SourceClient {
    /// Returns every event overlapping `window`, across all pages.
    fn list_events(
        &self,
        window: &TimeWindow,
    ) -> impl Future<Output = Result<Vec<RawEvent>, SourceError>> + Send;
}

/// Writes scheduled events on the target platform.
pub trait TargetClient {
    /// Lists events carrying this integration's ownership tag.
    fn list_managed_events(
        &self,
    ) -> impl Future<Output = Result<Vec<ManagedEvent>, WriteError>> + Send;

    /// Creates an event and returns its target id.
    fn create_event(
        &self,
        payload: &EventPayload,
    ) -> impl Future<Output = Result<String, WriteError>> + Send;

    /// Updates an existing event in place. The kind shape must not change.
    fn update_event(
        &self,
        target_id: &str,
        payload: &EventPayload,
    ) -> impl Future<Output = Result<(), WriteError>> + Send;

    /// Deletes an event. Deleting an event that no longer exists succeeds.
    fn delete_event(&self, target_id: &str)
    -> impl Future<Output = Result<(), WriteError>> + Send;
}
