//! The on-disk WAL record shape and the in-memory entry replay yields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line of a `<topic>.<segment>.jsonl` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalRecord {
    /// The offset assigned to this record.
    pub offset: u64,
    /// The event envelope, minus its payload (kept separate so replay can
    /// skip deserializing large payloads when only metadata is needed).
    pub meta: serde_json::Value,
    /// The event payload.
    pub payload: serde_json::Value,
    /// When this record was appended.
    pub written_at: DateTime<Utc>,
    /// The segment this record was written to.
    pub segment_id: u32,
}

/// An entry yielded by `replay_events`.
pub type WalEntry = WalRecord;

/// One line of a `<topic>.dlq.jsonl` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqRecord {
    /// The topic the event was originally published to.
    pub original_topic: String,
    /// The error that caused the event to be dead-lettered.
    pub error: String,
    /// When the event was dead-lettered.
    pub failed_at: DateTime<Utc>,
    /// The event envelope.
    pub event: serde_json::Value,
}

/// The `<topic>__<group>.json` offset checkpoint shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffsetInfo {
    /// The highest offset this group has committed.
    pub committed: u64,
    /// The segment the committed offset was read from.
    pub segment: u32,
    /// When the checkpoint was written.
    pub ts: DateTime<Utc>,
    /// The consumer group.
    pub group: String,
    /// The topic.
    pub topic: String,
}
