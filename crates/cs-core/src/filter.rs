//! Inclusion and exclusion predicates over normalized events.
//!
//! Configuration arrives as a mapping from predicate names to pattern lists,
//! e.g. `title_contains = ["standup"]` or `exclude_creator_email = [...]`.
//! [`FilterCriteria::from_config`] validates that mapping once at startup;
//! [`matches`] is then a pure function of an event and the criteria.
//!
//! Semantics:
//! - Any exclusion match rejects the event, regardless of inclusions.
//! - With no inclusion predicates configured, every remaining event passes.
//! - Otherwise at least one inclusion pattern of any kind must match.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::event::NormalizedEvent;

const EXCLUDE_PREFIX: &str = "exclude_";

/// The closed set of predicate kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PredicateKind {
    TitleContains,
    TitleStartsWith,
    TitleEndsWith,
    DescriptionContains,
    LocationContains,
    CreatorEmail,
    AttendeeEmail,
}

impl fmt::Display for PredicateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TitleContains => "title_contains",
            Self::TitleStartsWith => "title_starts_with",
            Self::TitleEndsWith => "title_ends_with",
            Self::DescriptionContains => "description_contains",
            Self::LocationContains => "location_contains",
            Self::CreatorEmail => "creator_email",
            Self::AttendeeEmail => "attendee_email",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PredicateKind {
    type Err = FilterConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "title_contains" => Ok(Self::TitleContains),
            "title_starts_with" => Ok(Self::TitleStartsWith),
            "title_ends_with" => Ok(Self::TitleEndsWith),
            "description_contains" => Ok(Self::DescriptionContains),
            "location_contains" => Ok(Self::LocationContains),
            "creator_email" => Ok(Self::CreatorEmail),
            "attendee_email" => Ok(Self::AttendeeEmail),
            _ => Err(FilterConfigError::UnknownPredicate(s.to_string())),
        }
    }
}

/// Malformed filter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterConfigError {
    #[error("unknown filter predicate: {0}")]
    UnknownPredicate(String),
    #[error("filter predicate {key} contains an empty pattern")]
    EmptyPattern { key: String },
}

/// Validated filter configuration. Patterns are stored lower-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCriteria {
    include: BTreeMap<PredicateKind, Vec<String>>,
    exclude: BTreeMap<PredicateKind, Vec<String>>,
}

impl FilterCriteria {
    /// Criteria that let every event through.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Validates a raw `name -> patterns` mapping.
    ///
    /// Keys with an empty pattern list are ignored.
    pub fn from_config(raw: &BTreeMap<String, Vec<String>>) -> Result<Self, FilterConfigError> {
        let mut criteria = Self::default();
        for (key, patterns) in raw {
            let key = key.trim();
            let (excluded, kind) = match key.strip_prefix(EXCLUDE_PREFIX) {
                Some(rest) => (true, rest.parse::<PredicateKind>()),
                None => (false, key.parse::<PredicateKind>()),
            };
            let kind = kind.map_err(|_| FilterConfigError::UnknownPredicate(key.to_string()))?;

            let mut normalized = Vec::with_capacity(patterns.len());
            for pattern in patterns {
                let pattern = pattern.trim();
                if pattern.is_empty() {
                    return Err(FilterConfigError::EmptyPattern {
                        key: key.to_string(),
                    });
                }
                normalized.push(pattern.to_lowercase());
            }
            if normalized.is_empty() {
                continue;
            }

            let target = if excluded {
                &mut criteria.exclude
            } else {
                &mut criteria.include
            };
            target.entry(kind).or_default().extend(normalized);
        }
        Ok(criteria)
    }

    /// Adds an inclusion pattern.
    #[must_use]
    pub fn include(mut self, kind: PredicateKind, pattern: &str) -> Self {
        self.include
            .entry(kind)
            .or_default()
            .push(pattern.trim().to_lowercase());
        self
    }

    /// Adds an exclusion pattern.
    #[must_use]
    pub fn exclude(mut self, kind: PredicateKind, pattern: &str) -> Self {
        self.exclude
            .entry(kind)
            .or_default()
            .push(pattern.trim().to_lowercase());
        self
    }

    pub fn inclusion_count(&self) -> usize {
        self.include.values().map(Vec::len).sum()
    }

    pub fn exclusion_count(&self) -> usize {
        self.exclude.values().map(Vec::len).sum()
    }
}

/// Lower-cased view of the fields predicates look at.
struct EventText {
    title: String,
    description: String,
    location: String,
    creator: Option<String>,
    attendees: Vec<String>,
}

impl EventText {
    fn new(event: &NormalizedEvent) -> Self {
        Self {
            title: event.title.to_lowercase(),
            description: event.description.to_lowercase(),
            location: event.location.to_lowercase(),
            creator: event.creator_email.as_deref().map(str::to_lowercase),
            attendees: event
                .attendee_emails
                .iter()
                .map(|email| email.to_lowercase())
                .collect(),
        }
    }

    fn satisfies(&self, kind: PredicateKind, pattern: &str) -> bool {
        match kind {
            PredicateKind::TitleContains => self.title.contains(pattern),
            PredicateKind::TitleStartsWith => self.title.starts_with(pattern),
            PredicateKind::TitleEndsWith => self.title.ends_with(pattern),
            PredicateKind::DescriptionContains => self.description.contains(pattern),
            PredicateKind::LocationContains => self.location.contains(pattern),
            PredicateKind::CreatorEmail => self.creator.as_deref() == Some(pattern),
            PredicateKind::AttendeeEmail => self.attendees.iter().any(|email| email == pattern),
        }
    }

    fn any_match(&self, predicates: &BTreeMap<PredicateKind, Vec<String>>) -> bool {
        predicates.iter().any(|(kind, patterns)| {
            patterns
                .iter()
                .any(|pattern| self.satisfies(*kind, pattern))
        })
    }
}

/// Returns whether `event` should be synced under `criteria`.
pub fn matches(event: &NormalizedEvent, criteria: &FilterCriteria) -> bool {
    if criteria.include.is_empty() && criteria.exclude.is_empty() {
        return true;
    }
    let text = EventText::new(event);
    if text.any_match(&criteria.exclude) {
        return false;
    }
    criteria.include.is_empty() || text.any_match(&criteria.include)
}
