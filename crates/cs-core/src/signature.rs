//! Content signatures for change detection.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::event::NormalizedEvent;
use crate::html::links_to_text;
use crate::kind::TargetEventKind;

/// Deterministic digest of the fields that shape a rendered target event.
///
/// Stored in the ledger as lower-case hex. The empty signature never equals a
/// computed one and marks entries whose content is unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    /// Wraps a previously persisted digest.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes the signature of an event rendered as `kind`.
///
/// Text fields are compared by content: anchors are converted and runs of
/// whitespace collapse to a single space. Each field is length-framed so
/// values cannot bleed into their neighbours.
pub fn fingerprint(event: &NormalizedEvent, kind: &TargetEventKind) -> Signature {
    let mut hasher = Sha256::new();
    let mut field = |name: &str, value: &str| {
        hasher.update(name.as_bytes());
        hasher.update((value.len() as u64).to_le_bytes());
        hasher.update(value.as_bytes());
    };

    field("title", &collapse_whitespace(&event.title));
    field(
        "description",
        &collapse_whitespace(&links_to_text(&event.description)),
    );
    field("location", &collapse_whitespace(&event.location));
    field("start", &instant(event.start));
    field("end", &instant(event.end));
    match kind {
        TargetEventKind::VoiceLinked { channel_id } => {
            field("kind", "voice");
            field("channel", channel_id);
        }
        TargetEventKind::External { location } => {
            field("kind", "external");
            field("channel", &collapse_whitespace(location));
        }
    }

    Signature(format!("{:x}", hasher.finalize()))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    fn event() -> NormalizedEvent {
        NormalizedEvent {
            id: "evt-1".to_string(),
            title: "Board game night".to_string(),
            description: "Bring a game.\nSee https://games.test (list)".to_string(),
            location: "Discord Voice".to_string(),
            start: Utc.with_ymd_and_hms(2026, 2, 1, 19, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 2, 1, 22, 0, 0).unwrap(),
            creator_email: None,
            attendee_emails: std::collections::BTreeSet::new(),
            is_all_day: false,
        }
    }

    fn voice() -> TargetEventKind {
        TargetEventKind::VoiceLinked {
            channel_id: "chan-1".to_string(),
        }
    }

    #[test]
    fn repeated_calls_are_identical() {
        let e = event();
        assert_eq!(fingerprint(&e, &voice()), fingerprint(&e, &voice()));
        assert_eq!(fingerprint(&e, &voice()).as_str().len(), 64);
    }

    #[test]
    fn persisted_signature_equals_fresh_one() {
        let signature = fingerprint(&event(), &voice());
        let json = serde_json::to_string(&signature).unwrap();
        let restored: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, fingerprint(&event(), &voice()));
    }

    #[test]
    fn every_rendered_field_changes_the_signature() {
        let base = fingerprint(&event(), &voice());
        let mut variants = Vec::new();

        let mut e = event();
        e.title.push('!');
        variants.push(fingerprint(&e, &voice()));

        let mut e = event();
        e.description = "Bring two games.".to_string();
        variants.push(fingerprint(&e, &voice()));

        let mut e = event();
        e.location = "Discord Stage".to_string();
        variants.push(fingerprint(&e, &voice()));

        let mut e = event();
        e.start = Utc.with_ymd_and_hms(2026, 2, 1, 18, 0, 0).unwrap();
        variants.push(fingerprint(&e, &voice()));

        let mut e = event();
        e.end = Utc.with_ymd_and_hms(2026, 2, 1, 23, 0, 0).unwrap();
        variants.push(fingerprint(&e, &voice()));

        variants.push(fingerprint(
            &event(),
            &TargetEventKind::External {
                location: "Discord Voice".to_string(),
            },
        ));
        variants.push(fingerprint(
            &event(),
            &TargetEventKind::VoiceLinked {
                channel_id: "chan-2".to_string(),
            },
        ));

        for variant in &variants {
            assert_ne!(*variant, base);
        }
    }

    #[test]
    fn formatting_only_changes_keep_the_signature() {
        let base = fingerprint(&event(), &voice());

        let mut e = event();
        e.description = "Bring a game.  \n See <a href=\"https://games.test\" target=\"_blank\">list</a> "
            .to_string();
        assert_eq!(fingerprint(&e, &voice()), base);

        let mut e = event();
        e.title = "Board  game\tnight".to_string();
        assert_eq!(fingerprint(&e, &voice()), base);
    }

    #[test]
    fn fields_are_framed() {
        let mut a = event();
        a.title = "ab".to_string();
        a.location = "c".to_string();
        let mut b = event();
        b.title = "a".to_string();
        b.location = "bc".to_string();
        assert_ne!(fingerprint(&a, &voice()), fingerprint(&b, &voice()));
    }

    #[test]
    fn default_signature_is_unknown() {
        assert!(Signature::default().is_unknown());
        assert!(!fingerprint(&event(), &voice()).is_unknown());
    }
}
