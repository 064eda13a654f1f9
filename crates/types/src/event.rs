//! The base event envelope: identity, provenance, delivery contract, and
//! integrity metadata that every published event carries regardless of
//! topic.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{cognitive::Trace, id::new_event_id, topic::Topic};

/// A capability an actor holds, gating which obligations/topics it may
/// exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    /// May write new memories.
    Write,
    /// May recall existing memories.
    Recall,
    /// May project future/prospective state.
    Project,
    /// May schedule prospective actions.
    Schedule,
}

/// Data-handling obligations attached to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Obligation {
    /// PII in the payload must be redacted before storage.
    RedactPii,
    /// Access to this event must be audited.
    AuditAccess,
    /// A tombstone must be written when the referenced data is deleted.
    TombstoneOnDelete,
    /// This event must be synchronized to peer devices.
    SyncRequired,
}

/// Sensitivity band assigned to an event, from least to most sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Band {
    /// Unrestricted.
    Green,
    /// Limited distribution.
    Amber,
    /// Restricted distribution.
    Red,
    /// Maximum restriction.
    Black,
}

/// Who or what produced an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    /// The acting user's id.
    pub user_id: String,
    /// Capabilities the actor holds at the time of the event.
    pub capabilities: HashSet<Capability>,
    /// The agent acting on the user's behalf, if any.
    pub agent_id: Option<String>,
}

/// The device an event originated from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// The device's id.
    pub device_id: String,
    /// The device's platform, e.g. "ios", "web".
    pub platform: Option<String>,
    /// The originating application's version.
    pub app_version: Option<String>,
    /// The device's locale.
    pub locale: Option<String>,
}

/// The delivery contract an event requests from the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Qos {
    /// Higher values are scheduled and routed first.
    pub priority: u32,
    /// The budget, in milliseconds, the event expects to be handled
    /// within.
    pub latency_budget_ms: u32,
    /// A routing hint, e.g. "gate-path".
    pub routing: String,
    /// The number of redelivery attempts requested on failure.
    pub retries: u32,
    /// An absolute deadline, in epoch milliseconds, past which the event
    /// is no longer useful.
    pub deadline_ms: Option<u64>,
}

/// Integrity hashes carried by an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hashes {
    /// SHA-256 of the canonical payload bytes, lowercase hex.
    pub payload_sha256: String,
}

/// A detached signature over the event envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    /// Signature algorithm, e.g. "ed25519".
    pub alg: String,
    /// The id of the signing key.
    pub key_id: String,
    /// The signature bytes, base64 or hex encoded per `alg`'s convention.
    pub signature: String,
}

/// The base event envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Schema version this envelope was produced under.
    pub schema_version: String,
    /// Unique event id, `ev-<16 hex>`.
    pub id: String,
    /// When the event was created.
    pub ts: DateTime<Utc>,
    /// The topic this event is published on.
    pub topic: Topic,
    /// The producing actor.
    pub actor: Actor,
    /// The originating device.
    pub device: Device,
    /// The tenant-like scope this event belongs to.
    pub space_id: String,
    /// Sensitivity band.
    pub band: Band,
    /// The policy version this event was produced under.
    pub policy_version: String,
    /// The delivery contract.
    pub qos: Qos,
    /// Data-handling obligations attached to this event.
    pub obligations: HashSet<Obligation>,
    /// Whether redaction has already been applied to `payload`.
    pub redaction_applied: bool,
    /// Integrity hashes.
    pub hashes: Hashes,
    /// The topic-specific, schema-validated payload.
    pub payload: serde_json::Value,
    /// The envelope signature.
    pub signature: Signature,
    /// When the event was ingested by the boundary that received it, if
    /// different from `ts`.
    pub ingest_ts: Option<DateTime<Utc>>,
    /// The MLS group this event is scoped to, if end-to-end encrypted
    /// group messaging is in play.
    pub mls_group: Option<String>,
    /// Attribute-based access control metadata.
    pub abac: Option<serde_json::Value>,
    /// The cognitive routing trace, present when this event also carries
    /// cognitive routing metadata.
    pub trace: Option<Trace>,
    /// An idempotency key for deduplication by producers that retry.
    pub idempotency_key: Option<String>,
    /// Vendor/deployment-specific extensions.
    pub x_extensions: Option<serde_json::Value>,
}

/// The schema version this crate stamps onto freshly built events.
pub const SCHEMA_VERSION: &str = "1.3.0";

impl Event {
    /// Builds a new event with a fresh id and timestamp, leaving
    /// optional fields unset.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        topic: Topic,
        actor: Actor,
        device: Device,
        space_id: impl Into<String>,
        band: Band,
        policy_version: impl Into<String>,
        qos: Qos,
        obligations: HashSet<Obligation>,
        payload: serde_json::Value,
        payload_sha256: impl Into<String>,
        signature: Signature,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            id: new_event_id(),
            ts: Utc::now(),
            topic,
            actor,
            device,
            space_id: space_id.into(),
            band,
            policy_version: policy_version.into(),
            qos,
            obligations,
            redaction_applied: false,
            hashes: Hashes {
                payload_sha256: payload_sha256.into(),
            },
            payload,
            signature,
            ingest_ts: None,
            mls_group: None,
            abac: None,
            trace: None,
            idempotency_key: None,
            x_extensions: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_event() -> Event {
        Event::new(
            Topic::HippoEncode,
            Actor {
                user_id: "u1".to_string(),
                capabilities: HashSet::from([Capability::Write]),
                agent_id: None,
            },
            Device {
                device_id: "d1".to_string(),
                platform: Some("ios".to_string()),
                app_version: None,
                locale: None,
            },
            "space-1",
            Band::Green,
            "v1",
            Qos {
                priority: 5,
                latency_budget_ms: 1000,
                routing: "gate-path".to_string(),
                retries: 0,
                deadline_ms: None,
            },
            HashSet::new(),
            serde_json::json!({"k": "v"}),
            "deadbeef",
            Signature {
                alg: "ed25519".to_string(),
                key_id: "k1".to_string(),
                signature: "sig".to_string(),
            },
        )
    }

    #[test]
    fn new_event_has_well_formed_id_and_schema_version() {
        let e = sample_event();
        assert!(e.id.starts_with("ev-"));
        assert_eq!(e.id.len(), 19);
        assert_eq!(e.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn serializes_to_json_and_back() {
        let e = sample_event();
        let json = serde_json::to_string(&e).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, e.id);
        assert_eq!(back.topic, e.topic);
        assert_eq!(back.space_id, e.space_id);
    }
}
