//! Target event kind determination.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Location used for external events whose source entry has none.
pub const DEFAULT_EXTERNAL_LOCATION: &str = "External Event";

/// How a source event is represented on the target platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetEventKind {
    /// Hosted in a guild voice channel.
    VoiceLinked { channel_id: String },
    /// Hosted somewhere else, described by free text.
    External { location: String },
}

/// The structural shape of a target event, without its payload.
///
/// Two kinds with different shapes cannot be converted into each other in
/// place on the target platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindShape {
    Voice,
    External,
}

impl fmt::Display for KindShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Voice => "voice",
            Self::External => "external",
        };
        write!(f, "{s}")
    }
}

/// Rules for choosing between voice-linked and external events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindRules {
    voice_marker: String,
    channel_id: String,
}

impl KindRules {
    /// Creates rules matching `voice_marker` case-insensitively in a location.
    ///
    /// A blank marker never selects a voice event.
    pub fn new(voice_marker: &str, channel_id: impl Into<String>) -> Self {
        Self {
            voice_marker: voice_marker.trim().to_lowercase(),
            channel_id: channel_id.into(),
        }
    }

    pub fn voice_marker(&self) -> &str {
        &self.voice_marker
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }
}

impl TargetEventKind {
    /// Determines the kind from an event location.
    pub fn determine(location: &str, rules: &KindRules) -> Self {
        let location = location.trim();
        if !rules.voice_marker.is_empty() && location.to_lowercase().contains(&rules.voice_marker)
        {
            return Self::VoiceLinked {
                channel_id: rules.channel_id.clone(),
            };
        }
        let location = if location.is_empty() {
            DEFAULT_EXTERNAL_LOCATION
        } else {
            location
        };
        Self::External {
            location: location.to_string(),
        }
    }

    pub const fn shape(&self) -> KindShape {
        match self {
            Self::VoiceLinked { .. } => KindShape::Voice,
            Self::External { .. } => KindShape::External,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> KindRules {
        KindRules::new("discord", "chan-42")
    }

    #[test]
    fn voice_marker_selects_voice_channel() {
        assert_eq!(
            TargetEventKind::determine("Discord Voice Room", &rules()),
            TargetEventKind::VoiceLinked {
                channel_id: "chan-42".to_string()
            }
        );
    }

    #[test]
    fn voice_marker_is_case_insensitive() {
        let kind = TargetEventKind::determine("DISCORD", &rules());
        assert_eq!(kind.shape(), KindShape::Voice);

        let kind = TargetEventKind::determine("our disCord stage", &KindRules::new("DISCORD", "c"));
        assert_eq!(kind.shape(), KindShape::Voice);
    }

    #[test]
    fn other_locations_are_external() {
        assert_eq!(
            TargetEventKind::determine("123 Main St", &rules()),
            TargetEventKind::External {
                location: "123 Main St".to_string()
            }
        );
    }

    #[test]
    fn empty_location_gets_placeholder() {
        assert_eq!(
            TargetEventKind::determine("   ", &rules()),
            TargetEventKind::External {
                location: DEFAULT_EXTERNAL_LOCATION.to_string()
            }
        );
    }

    #[test]
    fn blank_marker_never_matches() {
        let kind = TargetEventKind::determine("Discord", &KindRules::new("  ", "c"));
        assert_eq!(kind.shape(), KindShape::External);
    }
}
