//! The middleware pipeline a handler invocation runs through:
//! `pre_execute -> handler -> post_execute -> cleanup`, with `on_error`
//! invoked in place of `post_execute` when the handler itself fails.
//! Cleanup always runs, in the reverse order middlewares were registered.

use std::time::Instant;

use async_trait::async_trait;
use subscription::{HandlerError, Subscription};
use types::Event;

/// A pipeline stage wrapping every handler invocation. Default methods are
/// no-ops so a middleware only needs to override the phases it cares
/// about.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// A human-readable name, used in error logs.
    fn name(&self) -> &str;

    /// Runs before the handler. Returning `false` cancels the invocation
    /// (the handler does not run, `post_execute` does not run, but
    /// `cleanup` still does).
    async fn pre_execute(&self, _event: &Event, _subscription: &Subscription) -> bool {
        true
    }

    /// Runs after a successful handler invocation.
    async fn post_execute(&self, _event: &Event, _subscription: &Subscription, _duration_ms: f64) {}

    /// Runs when the handler raised an error, in place of `post_execute`.
    async fn on_error(&self, _event: &Event, _subscription: &Subscription, _error: &HandlerError) {}

    /// Always runs, in reverse middleware order, regardless of outcome.
    /// Errors here are logged, never propagated.
    async fn cleanup(&self, _event: &Event, _subscription: &Subscription) {}
}

/// Rejects invocations whose event id is empty or whose subscription is
/// inactive, mirroring the base validation every dispatch performs before
/// running application middleware.
#[derive(Default)]
pub struct ValidationMiddleware;

#[async_trait]
impl Middleware for ValidationMiddleware {
    fn name(&self) -> &str {
        "validation"
    }

    async fn pre_execute(&self, event: &Event, subscription: &Subscription) -> bool {
        if event.id.is_empty() {
            tracing::warn!(subscription_id = %subscription.subscription_id, "rejecting dispatch: empty event id");
            return false;
        }
        if !subscription.active {
            tracing::warn!(subscription_id = %subscription.subscription_id, "rejecting dispatch: subscription inactive");
            return false;
        }
        true
    }
}

/// Records per-phase timing under the `pipeline=events,
/// stage=handler_execution` label set every handler invocation is tagged
/// with.
#[derive(Default)]
pub struct MetricsMiddleware;

#[async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn post_execute(&self, _event: &Event, subscription: &Subscription, duration_ms: f64) {
        tracing::debug!(
            pipeline = "events",
            stage = "handler_execution",
            outcome = "success",
            subscription_id = %subscription.subscription_id,
            duration_ms,
            "handler execution recorded"
        );
    }

    async fn on_error(&self, _event: &Event, subscription: &Subscription, error: &HandlerError) {
        tracing::debug!(
            pipeline = "events",
            stage = "handler_execution",
            outcome = "error",
            subscription_id = %subscription.subscription_id,
            %error,
            "handler execution recorded"
        );
    }
}

/// An ordered chain of middlewares, run around every handler invocation.
#[derive(Default, Clone)]
pub struct MiddlewareChain {
    stages: Vec<std::sync::Arc<dyn Middleware>>,
}

/// The outcome of running one handler through the middleware chain.
pub(crate) enum PipelineOutcome {
    Success { duration_ms: f64 },
    Failed { duration_ms: f64, error: HandlerError },
    Cancelled,
}

impl MiddlewareChain {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// The chain used when no middleware is explicitly configured:
    /// validation first, then metrics.
    pub fn with_builtins() -> Self {
        Self::new().with(ValidationMiddleware).with(MetricsMiddleware)
    }

    /// Appends a middleware to the end of the chain.
    #[must_use]
    pub fn with(mut self, middleware: impl Middleware + 'static) -> Self {
        self.stages.push(std::sync::Arc::new(middleware));
        self
    }

    pub(crate) async fn run<F, Fut>(&self, event: &Event, subscription: &Subscription, invoke: F) -> PipelineOutcome
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), HandlerError>>,
    {
        for stage in &self.stages {
            if !stage.pre_execute(event, subscription).await {
                self.run_cleanup(event, subscription).await;
                return PipelineOutcome::Cancelled;
            }
        }

        let start = Instant::now();
        let result = invoke().await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(()) => {
                for stage in &self.stages {
                    stage.post_execute(event, subscription, duration_ms).await;
                }
            }
            Err(error) => {
                for stage in &self.stages {
                    stage.on_error(event, subscription, error).await;
                }
            }
        }

        self.run_cleanup(event, subscription).await;

        match result {
            Ok(()) => PipelineOutcome::Success { duration_ms },
            Err(error) => PipelineOutcome::Failed { duration_ms, error },
        }
    }

    async fn run_cleanup(&self, event: &Event, subscription: &Subscription) {
        for stage in self.stages.iter().rev() {
            stage.cleanup(event, subscription).await;
        }
    }
}
