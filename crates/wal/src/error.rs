//! Errors raised by the WAL persistence layer.

/// All errors that can occur while persisting or replaying events.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A filesystem operation failed.
    #[error("persistence error (topic: {topic}, operation: {operation}, path: {path:?}): {source}")]
    Persistence {
        /// The topic being operated on.
        topic: String,
        /// The operation that failed, e.g. "append", "commit_offset".
        operation: String,
        /// The file path involved, if any.
        path: Option<std::path::PathBuf>,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A segment rotated past `max_segments_per_topic`.
    #[error("segment rotation limit exceeded for topic {topic} (max: {max_segments})")]
    Rotation {
        /// The topic whose segment count was exceeded.
        topic: String,
        /// The configured maximum.
        max_segments: u32,
    },
    /// Replay encountered a fatal condition (distinct from individually
    /// skippable corrupt lines, which are only counted).
    #[error("replay error (topic: {topic}): {reason}")]
    Replay {
        /// The topic being replayed.
        topic: String,
        /// What went wrong.
        reason: String,
    },
}
