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

//! The event bus public surface: a state machine around a subscription
//! registry, a dispatcher, and a write-ahead log, wired together behind
//! one `publish`/`subscribe` API.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
};

use dispatch::{DispatchResult, DispatcherConfig, EventDispatcher};
use serde_json::Value;
use subscription::{HandlerKind, Subscription, SubscriptionRegistry};
use task::{labels::TaskLabels, TaskManager};
use tokio::sync::watch;
use types::{Event, Topic};
use wal::{EventPersistence, WalConfig};

/// All errors the bus can raise.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// `publish`/`subscribe` was called while the bus was not `RUNNING`.
    #[error("event bus is not running (current state: {state:?})")]
    NotRunning {
        /// The state the bus was actually in.
        state: BusState,
    },
    /// `start` was called while the bus was already past `STOPPED`.
    #[error("event bus already started (current state: {state:?})")]
    AlreadyStarted {
        /// The state the bus was actually in.
        state: BusState,
    },
    /// The topic string failed to parse.
    #[error("invalid topic: {topic:?}")]
    InvalidTopic {
        /// The offending topic string.
        topic: String,
    },
    /// Startup's persistence health probe failed.
    #[error("persistence health check failed at startup")]
    PersistenceUnhealthy,
    /// A WAL operation failed.
    #[error(transparent)]
    Wal(#[from] wal::Error),
    /// A subscription registry operation failed.
    #[error(transparent)]
    Subscription(#[from] subscription::Error),
}

/// The bus's lifecycle state, `STOPPED -> STARTING -> RUNNING -> STOPPING
/// -> STOPPED` on a clean shutdown, or `ERROR` if startup or shutdown
/// fails partway through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// Not yet started, or cleanly shut down.
    Stopped,
    /// `start()` is in progress.
    Starting,
    /// Accepting `publish`/`subscribe` calls.
    Running,
    /// `shutdown()` is in progress.
    Stopping,
    /// Startup or shutdown failed.
    Error,
}

/// Configuration for `EventBus::with_defaults`: the minimal set of
/// collaborator configs needed to build a bus without injecting test
/// doubles.
#[derive(Debug, Clone, Default)]
pub struct EventBusConfig {
    /// The WAL's configuration.
    pub wal: WalConfig,
    /// The dispatcher's configuration.
    pub dispatcher: DispatcherConfig,
}

/// Running totals kept across the bus's lifetime, surfaced by
/// `get_bus_stats`.
#[derive(Debug, Clone, Default)]
struct PublishStats {
    total_published: u64,
    successful_published: u64,
    failed_published: u64,
}

/// A point-in-time snapshot of bus health, returned by `get_bus_stats`.
#[derive(Debug, Clone)]
pub struct BusStats {
    /// Current lifecycle state.
    pub state: BusState,
    /// Fraction of `publish` calls that completed without a bus-level
    /// error (individual handler failures do not count against this).
    pub publish_success_rate: f64,
    /// Fraction of dispatches (`EventDispatcher::dispatch_to_subscribers`
    /// calls) that completed without a dispatcher-level error.
    pub dispatch_success_rate: f64,
    /// Currently registered subscriptions.
    pub active_subscriptions: usize,
    /// Currently registered handlers, async and sync combined.
    pub active_handlers: usize,
    /// Seconds since `start()` completed, 0 if not running.
    pub uptime_seconds: f64,
}

/// The event bus: a topic-addressed publish/subscribe substrate backed by
/// a write-ahead log, with per-handler isolation on dispatch.
///
/// Collaborators are injected explicitly (`new`) rather than reached for
/// as process-wide defaults; `with_defaults` is the single convenience
/// constructor for callers that don't need to substitute test doubles.
#[derive(Clone)]
pub struct EventBus {
    state: Arc<Mutex<BusState>>,
    persistence: EventPersistence,
    registry: SubscriptionRegistry,
    dispatcher: EventDispatcher,
    task_manager: TaskManager,
    shutdown_tx: Arc<watch::Sender<bool>>,
    started_at: Arc<Mutex<Option<Instant>>>,
    stats: Arc<Mutex<PublishStats>>,
}

impl EventBus {
    /// Builds a bus over explicitly supplied collaborators. The bus holds
    /// its own `TaskManager` scope for background and detached-dispatch
    /// tasks; pass `TaskManager::new()` unless the caller needs to share
    /// process labels with other components.
    pub fn new(persistence: EventPersistence, registry: SubscriptionRegistry, dispatcher: EventDispatcher, task_manager: TaskManager) -> Self {
        let (shutdown_tx, _rx) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(BusState::Stopped)),
            persistence,
            registry,
            dispatcher,
            task_manager,
            shutdown_tx: Arc::new(shutdown_tx),
            started_at: Arc::new(Mutex::new(None)),
            stats: Arc::new(Mutex::new(PublishStats::default())),
        }
    }

    /// Builds a bus from `config`, constructing a fresh subscription
    /// registry and dispatcher over it. Convenience constructor for
    /// callers that don't need to inject a registry/dispatcher test
    /// double.
    pub fn with_defaults(config: EventBusConfig) -> Result<Self, Error> {
        let persistence = EventPersistence::new(config.wal)?;
        let registry = SubscriptionRegistry::new();
        let dispatcher = EventDispatcher::new(registry.clone(), config.dispatcher);
        Ok(Self::new(persistence, registry, dispatcher, TaskManager::new()))
    }

    /// A receiver that observes `true` once `shutdown()` begins, for
    /// callers (e.g. the cognitive dispatcher's maintenance loop) that
    /// want to stop in lockstep with the bus rather than being handed
    /// their own independent signal.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// The `TaskManager` scope this bus registers its own background and
    /// detached-dispatch tasks with. Exposed so other bus-scoped
    /// components (cognitive dispatcher, backpressure monitor, DLQ
    /// processor, consumer-group manager) can share one join-on-shutdown
    /// scope instead of each opening their own.
    pub fn task_manager(&self) -> TaskManager {
        self.task_manager.clone()
    }

    /// The filter manager dispatch resolves `FilterExpr::CustomFunction`
    /// predicates against, exposed so callers can register named
    /// predicates before subscribing.
    pub fn filter_manager(&self) -> &filters::FilterManager {
        self.dispatcher.filter_manager()
    }

    fn state(&self) -> BusState {
        *self.state.lock().expect("bus state lock poisoned")
    }

    /// Asserts persistence is healthy, then transitions to `RUNNING`.
    pub async fn start(&self) -> Result<(), Error> {
        {
            let mut state = self.state.lock().expect("bus state lock poisoned");
            if *state != BusState::Stopped {
                return Err(Error::AlreadyStarted { state: *state });
            }
            *state = BusState::Starting;
        }

        if !self.persistence.health_check().await {
            *self.state.lock().expect("bus state lock poisoned") = BusState::Error;
            return Err(Error::PersistenceUnhealthy);
        }

        *self.started_at.lock().expect("bus started_at lock poisoned") = Some(Instant::now());
        *self.state.lock().expect("bus state lock poisoned") = BusState::Running;
        tracing::info!("event bus started");
        Ok(())
    }

    /// Signals shutdown, waits (bounded by `grace_period_seconds`) for
    /// outstanding detached dispatches to finish, then closes persistence
    /// and transitions to `STOPPED`.
    pub async fn shutdown(&self, grace_period_seconds: f64) -> Result<(), Error> {
        *self.state.lock().expect("bus state lock poisoned") = BusState::Stopping;
        let _ = self.shutdown_tx.send(true);

        let join = self.task_manager.join();
        let timeout = std::time::Duration::from_secs_f64(grace_period_seconds.max(0.0));
        if tokio::time::timeout(timeout, join).await.is_err() {
            tracing::warn!(grace_period_seconds, "event bus shutdown exceeded grace period; proceeding anyway");
        }

        self.persistence.close().await?;
        *self.state.lock().expect("bus state lock poisoned") = BusState::Stopped;
        tracing::info!("event bus stopped");
        Ok(())
    }

    /// Validates `topic`, persists `event` to the WAL, then dispatches it
    /// to matching subscribers. When `wait_for_delivery` is false,
    /// dispatch is detached onto the bus's task manager and a synthetic
    /// success result is returned immediately without waiting on handler
    /// completion.
    pub async fn publish(&self, event: Event, topic: &str, wait_for_delivery: bool) -> Result<DispatchResult, Error> {
        if self.state() != BusState::Running {
            let state = self.state();
            self.record_publish(false);
            return Err(Error::NotRunning { state });
        }

        let parsed_topic = Topic::parse(topic).map_err(|_| {
            self.record_publish(false);
            Error::InvalidTopic { topic: topic.to_string() }
        })?;
        if parsed_topic != event.topic {
            tracing::warn!(published_topic = topic, event_topic = %event.topic, "publish topic argument disagrees with event.topic");
        }

        if let Err(error) = self.persistence.append_event(&event, &parsed_topic).await {
            self.record_publish(false);
            return Err(error.into());
        }

        if !wait_for_delivery {
            let dispatcher = self.dispatcher.clone();
            let detached_event = event.clone();
            let detached_topic = topic.to_string();
            let process_labels = self.task_manager.process_labels();
            let task_labels = TaskLabels::new("bus", &format!("bus/detached-dispatch/{}", event.id), "NA");
            let task_labels_clone = task_labels.clone();
            let handle = tokio::task::spawn(async move {
                let result = dispatcher.dispatch_to_subscribers(detached_event, &detached_topic).await;
                if !result.success {
                    tracing::warn!(topic = %detached_topic, "detached dispatch completed with dispatcher-level errors");
                }
                TaskManager::no_task_cleaner(process_labels, task_labels_clone)
            });
            let mut task_manager = self.task_manager.clone();
            task_manager.register(handle, &task_labels);
            self.record_publish(true);
            return Ok(DispatchResult::detached(event, topic.to_string()));
        }

        let result = self.dispatcher.dispatch_to_subscribers(event, topic).await;
        self.record_publish(result.success);
        Ok(result)
    }

    fn record_publish(&self, success: bool) {
        let mut stats = self.stats.lock().expect("bus publish stats lock poisoned");
        stats.total_published += 1;
        if success {
            stats.successful_published += 1;
        } else {
            stats.failed_published += 1;
        }
    }

    /// Registers a subscription. `topic_pattern` is auto-detected as a
    /// regex when it contains pattern metacharacters, otherwise matched
    /// literally; `is_async` selects whether `handler` is wrapped as
    /// `HandlerKind::Async` or `HandlerKind::Sync`.
    #[allow(clippy::too_many_arguments)]
    pub fn subscribe(
        &self,
        topic_pattern: impl Into<String>,
        handler: HandlerKind,
        priority: i64,
        group: Option<String>,
        filters: HashMap<String, Value>,
        advanced_filters: Vec<filters::FilterExpr>,
    ) -> Result<Subscription, Error> {
        let topic_pattern = topic_pattern.into();
        if !subscription::looks_like_pattern(&topic_pattern) && Topic::parse(&topic_pattern).is_err() {
            return Err(Error::InvalidTopic { topic: topic_pattern });
        }
        let (_id, subscription) = self.registry.register(topic_pattern, handler, group, priority, filters, advanced_filters)?;
        Ok(subscription)
    }

    /// Unregisters a subscription by id. Returns `false` if no such
    /// subscription exists.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.registry.unregister(subscription_id)
    }

    /// A snapshot of bus-wide statistics.
    pub fn get_bus_stats(&self) -> BusStats {
        let state = self.state();
        let stats = self.stats.lock().expect("bus publish stats lock poisoned").clone();
        let dispatch_stats = self.dispatcher.get_dispatch_stats();
        let registry_stats = self.registry.get_handler_stats();
        let uptime_seconds = self
            .started_at
            .lock()
            .expect("bus started_at lock poisoned")
            .map(|started| started.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        BusStats {
            state,
            publish_success_rate: if stats.total_published == 0 {
                1.0
            } else {
                stats.successful_published as f64 / stats.total_published as f64
            },
            dispatch_success_rate: dispatch_stats.success_rate(),
            active_subscriptions: registry_stats.total_subscriptions,
            active_handlers: registry_stats.async_handlers + registry_stats.sync_handlers,
            uptime_seconds,
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
    use tempfile::tempdir;
    use types::{Actor, Band, Device, Qos, Signature};

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

    fn bus(dir: &std::path::Path) -> EventBus {
        EventBus::with_defaults(EventBusConfig {
            wal: WalConfig {
                base_path: dir.to_path_buf(),
                ..Default::default()
            },
            dispatcher: DispatcherConfig::default(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn publish_before_start_fails_not_running() {
        let dir = tempdir().unwrap();
        let bus = bus(dir.path());
        let err = bus.publish(sample_event(), "HIPPO_ENCODE", true).await.unwrap_err();
        assert!(matches!(err, Error::NotRunning { state: BusState::Stopped }));
    }

    #[tokio::test]
    async fn publish_with_invalid_topic_is_rejected() {
        let dir = tempdir().unwrap();
        let bus = bus(dir.path());
        bus.start().await.unwrap();
        let err = bus.publish(sample_event(), "not a topic!", true).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTopic { .. }));
    }

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl Handler for CountingHandler {
        async fn handle(&self, _event: &Event) -> Result<(), HandlerError> {
            let _ = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn publish_dispatches_to_subscribers_and_persists() {
        let dir = tempdir().unwrap();
        let bus = bus(dir.path());
        bus.start().await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let _subscription = bus
            .subscribe("HIPPO_ENCODE", HandlerKind::Async(Arc::new(CountingHandler(Arc::clone(&calls)))), 0, None, HashMap::new(), vec![])
            .unwrap();

        let result = bus.publish(sample_event(), "HIPPO_ENCODE", true).await.unwrap();
        assert!(result.success);
        assert_eq!(result.successful_handlers, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = bus.get_bus_stats();
        assert_eq!(stats.active_subscriptions, 1);
        assert!(stats.publish_success_rate > 0.99);
    }

    #[tokio::test]
    async fn detached_publish_returns_immediately() {
        let dir = tempdir().unwrap();
        let bus = bus(dir.path());
        bus.start().await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let _subscription = bus
            .subscribe("HIPPO_ENCODE", HandlerKind::Async(Arc::new(CountingHandler(Arc::clone(&calls)))), 0, None, HashMap::new(), vec![])
            .unwrap();

        let result = bus.publish(sample_event(), "HIPPO_ENCODE", false).await.unwrap();
        assert!(result.success);
        assert_eq!(result.total_handlers, 0);

        bus.shutdown(5.0).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_dispatches() {
        let dir = tempdir().unwrap();
        let bus = bus(dir.path());
        bus.start().await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let subscription = bus
            .subscribe("HIPPO_ENCODE", HandlerKind::Async(Arc::new(CountingHandler(Arc::clone(&calls)))), 0, None, HashMap::new(), vec![])
            .unwrap();
        assert!(bus.unsubscribe(&subscription.subscription_id));

        let result = bus.publish(sample_event(), "HIPPO_ENCODE", true).await.unwrap();
        assert_eq!(result.total_handlers, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
