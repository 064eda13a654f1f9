//! Handler traits a subscription's callback implements. Kept separate from
//! `dispatch` so both the registry and the dispatcher can depend on the
//! same trait without a cyclic crate dependency.

use async_trait::async_trait;
use types::Event;

/// All errors a handler invocation can surface. Never propagates past the
/// dispatcher; captured into the per-subscription dispatch record instead.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum HandlerError {
    /// The handler itself reported a failure.
    #[error("handler failed: {reason}")]
    Failed {
        /// The failure reason, as reported by the handler.
        reason: String,
    },
    /// The handler did not complete within its configured timeout.
    #[error("handler timed out after {timeout_ms}ms")]
    Timeout {
        /// The configured timeout, in milliseconds.
        timeout_ms: u64,
    },
    /// A `pre_execute` middleware vetoed this invocation.
    #[error("handler invocation cancelled by middleware")]
    Cancelled,
}

/// An asynchronous event handler.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handles a single event, returning an error the dispatcher records
    /// but does not propagate.
    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

/// A synchronous event handler, run on the dispatcher's blocking worker
/// pool rather than the async scheduler.
pub trait SyncHandler: Send + Sync {
    /// Handles a single event.
    fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F> Handler for F
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        self(event)
    }
}
