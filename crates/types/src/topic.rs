//! The enumerated topic namespace events and subscriptions are addressed
//! by: a closed set of uppercase base topics, the open (but validated)
//! cognitive dotted namespace, and an escape hatch for forward-compatible
//! additions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cognitive::CognitiveEventType;

/// All errors raised while parsing or validating a topic string.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The topic string did not match any known shape.
    #[error("invalid topic format: {topic:?}")]
    InvalidFormat {
        /// The offending topic string.
        topic: String,
    },
}

/// A topic an event is published on or a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Topic {
    /// A memory encode request routed to the hippocampal encoder.
    HippoEncode,
    /// A broadcast onto the global workspace.
    WorkspaceBroadcast,
    /// A request to recall prior context.
    RecallRequest,
    /// An affect/mood update.
    AffectUpdate,
    /// An action decision has been made.
    ActionDecision,
    /// A prospective (future) action has been scheduled.
    ProspectiveSchedule,
    /// A data-subject-access-request export has been produced.
    DsarExport,
    /// A safety alert has been raised.
    SafetyAlert,
    /// A background job's status has changed.
    JobStatusChanged,
    /// A cognitive event type, addressed by its dotted name.
    Cognitive(CognitiveEventType),
    /// An unrecognized but syntactically valid topic, kept for
    /// forward compatibility with topics this build doesn't know about
    /// yet.
    Other(String),
}

const BASE_TOPICS: &[(&str, fn() -> Topic)] = &[
    ("HIPPO_ENCODE", || Topic::HippoEncode),
    ("WORKSPACE_BROADCAST", || Topic::WorkspaceBroadcast),
    ("RECALL_REQUEST", || Topic::RecallRequest),
    ("AFFECT_UPDATE", || Topic::AffectUpdate),
    ("ACTION_DECISION", || Topic::ActionDecision),
    ("PROSPECTIVE_SCHEDULE", || Topic::ProspectiveSchedule),
    ("DSAR_EXPORT", || Topic::DsarExport),
    ("SAFETY_ALERT", || Topic::SafetyAlert),
    ("JOB_STATUS_CHANGED", || Topic::JobStatusChanged),
];

impl Topic {
    /// Parses a topic string, never failing on syntactically plausible
    /// input (unknown uppercase identifiers and unknown dotted cognitive
    /// names both round-trip via `Other`/`Cognitive` so that topic
    /// validation only rejects genuinely malformed strings).
    pub fn parse(s: &str) -> Result<Self, Error> {
        if s.is_empty() {
            return Err(Error::InvalidFormat { topic: s.to_string() });
        }
        for (name, ctor) in BASE_TOPICS {
            if *name == s {
                return Ok(ctor());
            }
        }
        if let Some(cognitive) = CognitiveEventType::parse(s) {
            return Ok(Topic::Cognitive(cognitive));
        }
        if is_plausible_topic(s) {
            return Ok(Topic::Other(s.to_string()));
        }
        Err(Error::InvalidFormat { topic: s.to_string() })
    }

    /// Renders the canonical wire representation of this topic.
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        match self {
            Topic::HippoEncode => "HIPPO_ENCODE".into(),
            Topic::WorkspaceBroadcast => "WORKSPACE_BROADCAST".into(),
            Topic::RecallRequest => "RECALL_REQUEST".into(),
            Topic::AffectUpdate => "AFFECT_UPDATE".into(),
            Topic::ActionDecision => "ACTION_DECISION".into(),
            Topic::ProspectiveSchedule => "PROSPECTIVE_SCHEDULE".into(),
            Topic::DsarExport => "DSAR_EXPORT".into(),
            Topic::SafetyAlert => "SAFETY_ALERT".into(),
            Topic::JobStatusChanged => "JOB_STATUS_CHANGED".into(),
            Topic::Cognitive(c) => c.as_str().into(),
            Topic::Other(s) => s.as_str().into(),
        }
    }

    /// The lower-cased form used for on-disk file names
    /// (`wal/<topic_lower>.<segment>.jsonl`).
    pub fn file_stem(&self) -> String {
        self.as_str().to_lowercase()
    }
}

/// A topic is well formed if it is either an uppercase identifier made of
/// `[A-Z0-9_]`, or a dotted lowercase identifier made of
/// `[a-z0-9_]` segments separated by `.`.
fn is_plausible_topic(s: &str) -> bool {
    let all_upper = s.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
    let all_lower_dotted = s
        .split('.')
        .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
    all_upper || (s.contains('.') && all_lower_dotted)
}

/// Validates a topic string without constructing a `Topic`, mirroring the
/// bus's eager `validate_topic_format` check on `publish`/`subscribe`.
pub fn validate_topic_format(s: &str) -> bool {
    Topic::parse(s).is_ok()
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl TryFrom<String> for Topic {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Topic::parse(&value)
    }
}

impl From<Topic> for String {
    fn from(value: Topic) -> Self {
        value.as_str().into_owned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_known_base_topics() {
        assert_eq!(Topic::parse("HIPPO_ENCODE").unwrap(), Topic::HippoEncode);
        assert_eq!(Topic::parse("JOB_STATUS_CHANGED").unwrap(), Topic::JobStatusChanged);
    }

    #[test]
    fn parses_cognitive_dotted_topics() {
        assert_eq!(
            Topic::parse("cognitive.memory.write.initiated").unwrap(),
            Topic::Cognitive(CognitiveEventType::MemoryWriteInitiated)
        );
    }

    #[test]
    fn round_trips_through_display() {
        let t = Topic::parse("HIPPO_ENCODE").unwrap();
        assert_eq!(t.to_string(), "HIPPO_ENCODE");
        assert_eq!(t.file_stem(), "hippo_encode");
    }

    #[test]
    fn rejects_malformed_topics() {
        assert!(Topic::parse("").is_err());
        assert!(Topic::parse("not a topic!").is_err());
    }

    #[test]
    fn unknown_but_plausible_topics_round_trip_as_other() {
        let t = Topic::parse("FUTURE_TOPIC").unwrap();
        assert_eq!(t, Topic::Other("FUTURE_TOPIC".to_string()));
    }
}
