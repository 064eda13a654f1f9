//! Configuration for the WAL persistence layer.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Configuration options recognized by `EventPersistence`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct WalConfig {
    /// Root directory all other paths are relative to.
    pub base_path: PathBuf,
    /// Directory segment files are written to, relative to `base_path`.
    pub wal_dir: String,
    /// Directory dead-letter files are written to, relative to
    /// `base_path`.
    pub dlq_dir: String,
    /// Directory offset checkpoint files are written to, relative to
    /// `base_path`.
    pub offsets_dir: String,
    /// A segment rotates once its size exceeds this many megabytes.
    #[validate(range(min = 1))]
    pub max_file_size_mb: u64,
    /// A segment rotates once it holds this many lines.
    #[validate(range(min = 1))]
    pub max_lines_per_file: u64,
    /// The maximum number of segments retained per topic before
    /// `append_events_batch` fails with `RotationError`.
    #[validate(range(min = 1))]
    pub max_segments_per_topic: u32,
    /// The in-memory write buffer size, in bytes.
    pub buffer_size: usize,
    /// Whether to call `fsync` after each flush, in addition to the
    /// always-performed buffered-writer flush.
    pub fsync_enabled: bool,
    /// Whether appends may be scheduled without the caller awaiting
    /// their completion before considering the event durable. Informational
    /// only here; the bus decides whether to await.
    pub async_writes: bool,
    /// Preferred batch size for buffered writers upstream of persistence.
    pub write_batch_size: usize,
    /// Number of days WAL segments are retained before a cleanup pass
    /// (not run by this crate automatically) would remove them.
    pub retention_days: u32,
    /// Whether a retention cleanup pass should run at all.
    pub cleanup_enabled: bool,
    /// Whether PII fields should be redacted before a payload is
    /// written. Informational only here; redaction itself happens
    /// upstream of persistence, at the boundary that sets
    /// `Event::redaction_applied`.
    pub redaction_enabled: bool,
    /// Whether `base_path` is nested per `space_id`
    /// (`<base_path>/<space_id>/wal/...`) rather than flat.
    pub space_scoped_paths: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./data"),
            wal_dir: "wal".to_string(),
            dlq_dir: "dlq".to_string(),
            offsets_dir: "offsets".to_string(),
            max_file_size_mb: 64,
            max_lines_per_file: 100_000,
            max_segments_per_topic: 10_000,
            buffer_size: 64 * 1024,
            fsync_enabled: false,
            async_writes: true,
            write_batch_size: 100,
            retention_days: 30,
            cleanup_enabled: false,
            redaction_enabled: false,
            space_scoped_paths: false,
        }
    }
}

impl WalConfig {
    /// The resolved WAL segment directory.
    pub fn wal_path(&self) -> PathBuf {
        self.base_path.join(&self.wal_dir)
    }

    /// The resolved DLQ directory.
    pub fn dlq_path(&self) -> PathBuf {
        self.base_path.join(&self.dlq_dir)
    }

    /// The resolved offsets directory.
    pub fn offsets_path(&self) -> PathBuf {
        self.base_path.join(&self.offsets_dir)
    }
}
