//! Dispatch context and outcome types threaded through one `dispatch_to_subscribers` call.

use chrono::{DateTime, Utc};
use subscription::Subscription;
use types::Event;

/// Per-subscription outcome of one handler invocation, recorded for every
/// subscriber regardless of whether it succeeded.
#[derive(Debug, Clone)]
pub struct HandlerRecord {
    /// The subscription that was invoked.
    pub subscription_id: String,
    /// Whether the handler completed without error.
    pub success: bool,
    /// The error message, if any.
    pub error: Option<String>,
    /// How long the invocation took, including middleware phases.
    pub duration_ms: f64,
    /// Whether a `pre_execute` middleware vetoed this invocation.
    pub cancelled: bool,
}

/// Everything gathered while dispatching one event to its matching
/// subscribers.
#[derive(Clone)]
pub struct DispatchContext {
    /// The event being dispatched.
    pub event: Event,
    /// The topic it was dispatched under.
    pub topic: String,
    /// The subscribers selected for this dispatch, after filter matching.
    pub subscribers: Vec<Subscription>,
    /// When dispatch began.
    pub dispatch_timestamp: DateTime<Utc>,
    /// The event's id, carried for correlation in logs.
    pub correlation_id: String,
    /// Per-subscriber results, in completion order.
    pub dispatch_results: Vec<HandlerRecord>,
    /// Number of subscribers selected.
    pub handler_count: usize,
    /// Number of subscribers that succeeded.
    pub successful_handlers: usize,
    /// Number of subscribers that failed.
    pub failed_handlers: usize,
    /// Total wall time for the dispatch.
    pub total_duration_ms: f64,
}

impl DispatchContext {
    pub(crate) fn new(event: Event, topic: String) -> Self {
        let correlation_id = event.id.clone();
        Self {
            event,
            topic,
            subscribers: Vec::new(),
            dispatch_timestamp: Utc::now(),
            correlation_id,
            dispatch_results: Vec::new(),
            handler_count: 0,
            successful_handlers: 0,
            failed_handlers: 0,
            total_duration_ms: 0.0,
        }
    }
}

/// The outcome of `EventDispatcher::dispatch_to_subscribers`.
#[derive(Clone)]
pub struct DispatchResult {
    /// The full dispatch context, including every per-handler record.
    pub context: DispatchContext,
    /// Whether the dispatch as a whole completed (individual handler
    /// failures do not flip this to false; only a dispatcher-level error
    /// does).
    pub success: bool,
    /// Total subscribers selected.
    pub total_handlers: usize,
    /// Subscribers that succeeded.
    pub successful_handlers: usize,
    /// Subscribers that failed.
    pub failed_handlers: usize,
    /// Total wall time, in milliseconds.
    pub duration_ms: f64,
    /// Dispatcher-level errors (as opposed to per-handler errors, which
    /// live in `context.dispatch_results`).
    pub errors: Vec<String>,
}

impl DispatchResult {
    /// Builds the synthetic success result returned by a bus `publish`
    /// call that detaches dispatch (`wait_for_delivery: false`) instead of
    /// awaiting it. No subscribers have been matched yet at the point
    /// this is constructed; the real counts are only known once the
    /// detached dispatch completes, which the caller has chosen not to
    /// wait for.
    pub fn detached(event: Event, topic: impl Into<String>) -> Self {
        Self {
            context: DispatchContext::new(event, topic.into()),
            success: true,
            total_handlers: 0,
            successful_handlers: 0,
            failed_handlers: 0,
            duration_ms: 0.0,
            errors: Vec::new(),
        }
    }
}
