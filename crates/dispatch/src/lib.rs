#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! The event dispatcher: matches a published event against the
//! subscription registry, applies per-subscriber filters, and runs every
//! matching handler through the middleware pipeline with isolation
//! between handlers.

pub mod middleware;
pub mod result;

use std::{collections::HashMap, sync::Arc, time::Instant};

use filters::FilterManager;
use middleware::{MiddlewareChain, PipelineOutcome};
pub use result::{DispatchContext, DispatchResult, HandlerRecord};
use serde::{Deserialize, Serialize};
use subscription::{HandlerKind, Subscription, SubscriptionRegistry};
use tokio::sync::Semaphore;
use types::Event;
use validator::Validate;

/// Configuration recognized by `EventDispatcher`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Upper bound on handlers (sync and async combined) running at once.
    #[validate(range(min = 1))]
    pub max_concurrent_handlers: usize,
    /// Per-handler invocation timeout.
    #[validate(range(min = 0.001))]
    pub handler_timeout_seconds: f64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_handlers: 10,
            handler_timeout_seconds: 30.0,
        }
    }
}

/// Running totals over every `dispatch_to_subscribers` call.
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    /// Total dispatch calls.
    pub total_dispatches: u64,
    /// Dispatches that completed without a dispatcher-level error.
    pub successful_dispatches: u64,
    /// Dispatches that hit a dispatcher-level error.
    pub failed_dispatches: u64,
    /// Sum of handlers invoked across every dispatch.
    pub total_handlers_executed: u64,
    /// Sum of wall time across every dispatch, in milliseconds.
    pub total_duration_ms: f64,
}

impl DispatchStats {
    /// The mean dispatch duration, 0 if no dispatch has run yet.
    pub fn average_duration_ms(&self) -> f64 {
        if self.total_dispatches == 0 {
            0.0
        } else {
            self.total_duration_ms / self.total_dispatches as f64
        }
    }

    /// The fraction of dispatches without a dispatcher-level error.
    pub fn success_rate(&self) -> f64 {
        if self.total_dispatches == 0 {
            0.0
        } else {
            self.successful_dispatches as f64 / self.total_dispatches as f64
        }
    }
}

/// Matches a subscription's simple (field -> expected value) and advanced
/// (`FilterExpr`) filters against an event, combining both with AND. An
/// empty filter set always matches.
fn subscription_matches(subscription: &Subscription, event: &Event, filter_manager: &FilterManager) -> bool {
    if !subscription.filters.is_empty() {
        let Ok(root) = serde_json::to_value(event) else {
            return false;
        };
        for (field_path, expected) in &subscription.filters {
            match filters::path::get_field_value(&root, field_path) {
                Some(actual) if actual == expected => {}
                _ => return false,
            }
        }
    }
    if !subscription.advanced_filters.is_empty() {
        return filter_manager.evaluate_all(&subscription.advanced_filters, event).matches;
    }
    true
}

/// Dispatches events to matching subscribers with per-handler error
/// isolation.
#[derive(Clone)]
pub struct EventDispatcher {
    registry: SubscriptionRegistry,
    filter_manager: FilterManager,
    middleware: Arc<MiddlewareChain>,
    config: DispatcherConfig,
    semaphore: Arc<Semaphore>,
    stats: Arc<std::sync::Mutex<DispatchStats>>,
}

impl EventDispatcher {
    /// Builds a dispatcher over `registry`, running the built-in
    /// validation and metrics middlewares.
    pub fn new(registry: SubscriptionRegistry, config: DispatcherConfig) -> Self {
        Self::with_middleware(registry, config, MiddlewareChain::with_builtins())
    }

    /// Builds a dispatcher with a caller-supplied middleware chain.
    pub fn with_middleware(registry: SubscriptionRegistry, config: DispatcherConfig, middleware: MiddlewareChain) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_handlers.max(1)));
        Self {
            registry,
            filter_manager: FilterManager::new(),
            middleware: Arc::new(middleware),
            config,
            semaphore,
            stats: Arc::new(std::sync::Mutex::new(DispatchStats::default())),
        }
    }

    /// The filter manager custom predicates (`FilterExpr::CustomFunction`)
    /// resolve against. Exposed so callers can register named predicates
    /// before subscribing.
    pub fn filter_manager(&self) -> &FilterManager {
        &self.filter_manager
    }

    /// Dispatches `event`, published on `topic`, to every matching active
    /// subscription.
    pub async fn dispatch_to_subscribers(&self, event: Event, topic: &str) -> DispatchResult {
        let start = Instant::now();
        let mut context = DispatchContext::new(event, topic.to_string());

        let candidates = self.registry.get_subscriptions_for_topic(topic);
        let matched: Vec<Subscription> = candidates
            .into_iter()
            .filter(|s| subscription_matches(s, &context.event, &self.filter_manager))
            .collect();
        context.handler_count = matched.len();
        context.subscribers = matched;

        if context.subscribers.is_empty() {
            tracing::debug!(topic, "no subscribers matched");
            return self.finish(context, start, true, Vec::new());
        }

        tracing::info!(
            event_id = %context.correlation_id,
            topic,
            handler_count = context.handler_count,
            "dispatching event to subscribers"
        );

        let timeout = std::time::Duration::from_secs_f64(self.config.handler_timeout_seconds);
        let event = context.event.clone();
        let futures = context.subscribers.clone().into_iter().map(|subscription| {
            let event = event.clone();
            let middleware = Arc::clone(&self.middleware);
            let semaphore = Arc::clone(&self.semaphore);
            async move {
                let _permit = semaphore.acquire().await.expect("dispatch semaphore closed");
                run_one(&middleware, event, subscription, timeout).await
            }
        });

        let records = futures::future::join_all(futures).await;
        for record in records {
            if record.success {
                context.successful_handlers += 1;
            } else {
                context.failed_handlers += 1;
            }
            context.dispatch_results.push(record);
        }

        self.finish(context, start, true, Vec::new())
    }

    fn finish(&self, mut context: DispatchContext, start: Instant, success: bool, errors: Vec<String>) -> DispatchResult {
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        context.total_duration_ms = duration_ms;

        let mut stats = self.stats.lock().expect("dispatch stats lock poisoned");
        stats.total_dispatches += 1;
        stats.total_handlers_executed += context.handler_count as u64;
        stats.total_duration_ms += duration_ms;
        if success {
            stats.successful_dispatches += 1;
        } else {
            stats.failed_dispatches += 1;
        }
        drop(stats);

        DispatchResult {
            total_handlers: context.handler_count,
            successful_handlers: context.successful_handlers,
            failed_handlers: context.failed_handlers,
            duration_ms,
            context,
            success,
            errors,
        }
    }

    /// A snapshot of running dispatch statistics.
    pub fn get_dispatch_stats(&self) -> DispatchStats {
        self.stats.lock().expect("dispatch stats lock poisoned").clone()
    }
}

async fn run_one(middleware: &MiddlewareChain, event: Event, subscription: Subscription, timeout: std::time::Duration) -> HandlerRecord {
    let handler = subscription.handler.clone();
    let invoke_event = event.clone();
    let outcome = middleware
        .run(&event, &subscription, move || async move { invoke_with_timeout(handler, &invoke_event, timeout).await })
        .await;

    match outcome {
        PipelineOutcome::Success { duration_ms } => HandlerRecord {
            subscription_id: subscription.subscription_id,
            success: true,
            error: None,
            duration_ms,
            cancelled: false,
        },
        PipelineOutcome::Failed { duration_ms, error } => {
            tracing::warn!(subscription_id = %subscription.subscription_id, %error, "handler execution failed");
            HandlerRecord {
                subscription_id: subscription.subscription_id,
                success: false,
                error: Some(error.to_string()),
                duration_ms,
                cancelled: false,
            }
        }
        PipelineOutcome::Cancelled => HandlerRecord {
            subscription_id: subscription.subscription_id,
            success: false,
            error: Some("cancelled by middleware".to_string()),
            duration_ms: 0.0,
            cancelled: true,
        },
    }
}

async fn invoke_with_timeout(handler: HandlerKind, event: &Event, timeout: std::time::Duration) -> Result<(), subscription::HandlerError> {
    match handler {
        HandlerKind::Async(h) => match tokio::time::timeout(timeout, h.handle(event)).await {
            Ok(result) => result,
            Err(_) => Err(subscription::HandlerError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        },
        HandlerKind::Sync(h) => {
            let event = event.clone();
            let join = tokio::task::spawn_blocking(move || h.handle(&event));
            match tokio::time::timeout(timeout, join).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_error)) => Err(subscription::HandlerError::Failed {
                    reason: format!("sync handler task panicked: {join_error}"),
                }),
                Err(_) => Err(subscription::HandlerError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        collections::HashSet,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use subscription::{Handler, HandlerError};
    use types::{Actor, Band, Device, Qos, Signature, Topic};

    use super::*;

    fn sample_event() -> Event {
        Event::new(
            Topic::HippoEncode,
            Actor {
                user_id: "u1".to_string(),
                capabilities: HashSet::new(),
                agent_id: None,
            },
            Device {
                device_id: "d1".to_string(),
                platform: None,
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
            serde_json::json!({}),
            "deadbeef",
            Signature {
                alg: "ed25519".to_string(),
                key_id: "k".to_string(),
                signature: "s".to_string(),
            },
        )
    }

    struct OkHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl Handler for OkHandler {
        async fn handle(&self, _event: &Event) -> Result<(), HandlerError> {
            let _ = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailHandler;

    #[async_trait]
    impl Handler for FailHandler {
        async fn handle(&self, _event: &Event) -> Result<(), HandlerError> {
            Err(HandlerError::Failed {
                reason: "boom".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn no_subscribers_yields_empty_success() {
        let registry = SubscriptionRegistry::new();
        let dispatcher = EventDispatcher::new(registry, DispatcherConfig::default());
        let result = dispatcher.dispatch_to_subscribers(sample_event(), "HIPPO_ENCODE").await;
        assert!(result.success);
        assert_eq!(result.total_handlers, 0);
    }

    #[tokio::test]
    async fn isolates_failing_handler_from_succeeding_one() {
        let registry = SubscriptionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let _ = registry
            .register(
                "HIPPO_ENCODE",
                HandlerKind::Async(Arc::new(OkHandler(Arc::clone(&calls)))),
                None,
                0,
                HashMap::new(),
                vec![],
            )
            .unwrap();
        let _ = registry
            .register("HIPPO_ENCODE", HandlerKind::Async(Arc::new(FailHandler)), None, 0, HashMap::new(), vec![])
            .unwrap();

        let dispatcher = EventDispatcher::new(registry, DispatcherConfig::default());
        let result = dispatcher.dispatch_to_subscribers(sample_event(), "HIPPO_ENCODE").await;

        assert!(result.success);
        assert_eq!(result.total_handlers, 2);
        assert_eq!(result.successful_handlers, 1);
        assert_eq!(result.failed_handlers, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inactive_subscription_is_skipped_by_validation_middleware() {
        // The registry never hands back a subscription with `active: false`
        // (unregister removes it outright), but a caller holding an older
        // `Subscription` snapshot could still pass one to the chain directly.
        // Build one to exercise `ValidationMiddleware`'s own check.
        let calls = Arc::new(AtomicUsize::new(0));
        let subscription = Subscription {
            subscription_id: "sub-inactive".to_string(),
            topic: "HIPPO_ENCODE".to_string(),
            topic_pattern: None,
            priority: 0,
            group: None,
            filters: HashMap::new(),
            advanced_filters: vec![],
            handler: HandlerKind::Async(Arc::new(OkHandler(Arc::clone(&calls)))),
            active: false,
            created_at: chrono::Utc::now(),
        };

        let chain = MiddlewareChain::with_builtins();
        let event = sample_event();
        let outcome = chain.run(&event, &subscription, || async { Ok(()) }).await;
        assert!(matches!(outcome, PipelineOutcome::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "handler must not run when the subscription is inactive");
    }

    #[tokio::test]
    async fn simple_filters_restrict_matching_subscribers() {
        let registry = SubscriptionRegistry::new();
        let mut filters = HashMap::new();
        let _ = filters.insert("payload.kind".to_string(), serde_json::json!("wanted"));
        let calls = Arc::new(AtomicUsize::new(0));
        let _ = registry
            .register(
                "HIPPO_ENCODE",
                HandlerKind::Async(Arc::new(OkHandler(Arc::clone(&calls)))),
                None,
                0,
                filters,
                vec![],
            )
            .unwrap();

        let dispatcher = EventDispatcher::new(registry, DispatcherConfig::default());
        let result = dispatcher.dispatch_to_subscribers(sample_event(), "HIPPO_ENCODE").await;
        assert_eq!(result.total_handlers, 1);
        assert_eq!(result.successful_handlers, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
