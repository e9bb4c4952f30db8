//! Raw calendar records and their normalized, engine-facing form.

use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::html::links_to_text;
use crate::timezone::all_day_bounds;

/// Start or end of a raw calendar entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTime {
    /// An all-day boundary. End dates are exclusive.
    Date(NaiveDate),
    /// A timed boundary with its original offset.
    DateTime(DateTime<FixedOffset>),
}

/// A calendar entry as returned by the source calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: String,
    pub title: String,
    /// May contain anchor markup.
    pub description: String,
    pub location: String,
    pub start: EventTime,
    pub end: EventTime,
    pub creator_email: Option<String>,
    pub attendee_emails: Vec<String>,
}

/// Canonical in-memory form of one source calendar entry.
///
/// Constructed only through [`NormalizedEvent::normalize`], which guarantees
/// a non-empty id and `start < end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub id: String,
    pub title: String,
    /// Plain text, anchors already converted.
    pub description: String,
    pub location: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub creator_email: Option<String>,
    pub attendee_emails: BTreeSet<String>,
    pub is_all_day: bool,
}

/// A raw event that cannot be turned into a [`NormalizedEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("event has an empty id")]
    MissingId,
    #[error("event {id} mixes all-day and timed boundaries")]
    MixedBoundaries { id: String },
    #[error("event {id} does not end after it starts ({start} >= {end})")]
    EmptyRange {
        id: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl NormalizedEvent {
    /// Normalizes a raw event, resolving all-day boundaries in `tz`.
    pub fn normalize(raw: &RawEvent, tz: Tz) -> Result<Self, NormalizeError> {
        let id = raw.id.trim();
        if id.is_empty() {
            return Err(NormalizeError::MissingId);
        }

        let (start, end, is_all_day) = match (raw.start, raw.end) {
            (EventTime::Date(first), EventTime::Date(end_exclusive)) => {
                let (start, end) = all_day_bounds(first, end_exclusive, tz);
                (start, end, true)
            }
            (EventTime::DateTime(start), EventTime::DateTime(end)) => {
                (start.with_timezone(&Utc), end.with_timezone(&Utc), false)
            }
            _ => {
                return Err(NormalizeError::MixedBoundaries { id: id.to_string() });
            }
        };

        if start >= end {
            return Err(NormalizeError::EmptyRange {
                id: id.to_string(),
                start,
                end,
            });
        }

        Ok(Self {
            id: id.to_string(),
            title: raw.title.trim().to_string(),
            description: links_to_text(&raw.description).trim().to_string(),
            location: raw.location.trim().to_string(),
            start,
            end,
            creator_email: raw
                .creator_email
                .as_deref()
                .map(str::trim)
                .filter(|email| !email.is_empty())
                .map(str::to_string),
            attendee_emails: raw
                .attendee_emails
                .iter()
                .map(|email| email.trim())
                .filter(|email| !email.is_empty())
                .map(str::to_string)
                .collect(),
            is_all_day,
        })
    }
}
