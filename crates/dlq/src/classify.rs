//! Failure classification: maps the error kind a handler raised to a
//! retry-relevant category.

use serde::{Deserialize, Serialize};

/// The broad kind of error a handler raised, as reported by the caller.
/// Coarser than an application-specific error type, since the DLQ only
/// needs enough information to pick a retry category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The operation did not complete within its deadline.
    Timeout,
    /// A resource (memory, connection, quota) was unavailable.
    Resource,
    /// The event failed schema or business-rule validation.
    Validation,
    /// An error occurred during application-level processing.
    Processing,
    /// Coordination with another component failed.
    Coordination,
    /// Anything not covered by the above.
    Other,
}

/// The category a failure is classified into, which determines whether
/// and how it is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Expected to resolve itself; retry aggressively.
    Transient,
    /// Resource exhaustion; back off before retrying.
    Resource,
    /// The event itself is malformed; never retried.
    Validation,
    /// An application-level processing error.
    Processing,
    /// A coordination failure between components.
    Coordination,
    /// Accumulated past the poison detection threshold; never retried.
    Poison,
    /// Uncategorized system-level failure.
    System,
}

/// Maps an error kind to its failure category.
pub fn classify(kind: ErrorKind) -> FailureCategory {
    match kind {
        ErrorKind::Timeout => FailureCategory::Transient,
        ErrorKind::Resource => FailureCategory::Resource,
        ErrorKind::Validation => FailureCategory::Validation,
        ErrorKind::Processing => FailureCategory::Processing,
        ErrorKind::Coordination => FailureCategory::Coordination,
        ErrorKind::Other => FailureCategory::System,
    }
}
