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

//! Health-aware, multi-strategy routing of cognitive events to
//! consumers, with session affinity and a per-consumer load score.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use bus::EventBus;
use chrono::{DateTime, Duration, Utc};
use consumer_registry::{ConsumerRecord, ConsumerRegistry};
use serde::{Deserialize, Serialize};
use subscription::{Handler, HandlerError, HandlerKind};
use task::{
    labels::{ProcessLabels, TaskLabels},
    TaskManager,
};
use tokio::sync::watch;
use types::{CognitiveEvent, CognitiveEventType, RoutingStrategy, Trace};
use validator::Validate;

/// The outcome of one routing decision.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    /// The consumers selected to receive the event. Exactly one unless
    /// `strategy` is `Broadcast`, in which case it is every eligible
    /// consumer.
    pub target_consumers: Vec<String>,
    /// The strategy actually applied.
    pub strategy: RoutingStrategy,
    /// How confident the dispatcher is in this decision, in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Estimated processing time for the chosen consumer(s), in
    /// milliseconds.
    pub estimated_processing_time_ms: f64,
}

/// Per-consumer configuration the dispatcher reads to shape eligibility
/// and health checks.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DispatcherConfig {
    /// A consumer with no heartbeat within this many seconds is
    /// considered unhealthy.
    #[validate(range(min = 0.0))]
    pub heartbeat_timeout_seconds: f64,
    /// The strategy used when neither the trace nor the event type names
    /// one.
    pub default_strategy: RoutingStrategy,
    /// How often the maintenance loop reclassifies consumers and prunes
    /// expired session affinities, in seconds.
    #[validate(range(min = 1))]
    pub maintenance_interval_seconds: u64,
    /// A `StickySession` affinity older than this is no longer honored,
    /// in minutes.
    pub session_affinity_timeout_minutes: i64,
    /// A cognitive event whose trace has already been routed this many
    /// times is rejected rather than routed again, so a redelivery loop
    /// cannot route the same trace indefinitely.
    #[validate(range(min = 1))]
    pub max_routing_attempts: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_seconds: 120.0,
            default_strategy: RoutingStrategy::RoundRobin,
            maintenance_interval_seconds: 30,
            session_affinity_timeout_minutes: 30,
            max_routing_attempts: 5,
        }
    }
}

fn priority_factor(priority: u32) -> f64 {
    (priority as f64 / 5.0).min(2.0)
}

fn latency_penalty(avg_latency_ms: f64) -> f64 {
    ((avg_latency_ms - 1000.0) / 10000.0).max(0.0)
}

/// The routing score used by the `PRIORITY` strategy and as a tiebreak
/// elsewhere: rewards low load and high success rate, adds a
/// specialization bonus scaled by the trace's priority, and penalizes
/// high latency.
pub fn routing_score(consumer: &ConsumerRecord, event_type: CognitiveEventType, priority: u32) -> f64 {
    let success_rate = consumer.success_rate();
    let base = (1.0 - consumer.current_load) * success_rate * success_rate;
    let specialization_bonus = if consumer.preferred_event_types.is_empty() || consumer.preferred_event_types.contains(&event_type) {
        0.2
    } else {
        0.0
    };
    base + specialization_bonus * priority_factor(priority) - latency_penalty(consumer.average_processing_time_ms)
}

fn is_eligible(consumer: &ConsumerRecord, event_type: CognitiveEventType, heartbeat_timeout_seconds: f64) -> bool {
    consumer.is_healthy(heartbeat_timeout_seconds)
        && consumer.current_concurrent < consumer.max_concurrent
        && (consumer.preferred_event_types.is_empty() || consumer.preferred_event_types.contains(&event_type))
}

fn best_scored<'a>(consumers: &'a [ConsumerRecord], event_type: CognitiveEventType, priority: u32) -> Option<&'a ConsumerRecord> {
    consumers
        .iter()
        .max_by(|a, b| routing_score(a, event_type, priority).total_cmp(&routing_score(b, event_type, priority)))
}

fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (mean, variance)
}

/// Routes cognitive events to consumers under one of five strategies,
/// tracking session affinity and delegating health bookkeeping to a
/// shared `ConsumerRegistry`.
pub struct CognitiveDispatcher {
    registry: Arc<ConsumerRegistry>,
    config: DispatcherConfig,
    round_robin_indices: Mutex<HashMap<CognitiveEventType, usize>>,
    session_affinity: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl CognitiveDispatcher {
    /// Creates a dispatcher over a shared consumer registry.
    pub fn new(registry: Arc<ConsumerRegistry>, config: DispatcherConfig) -> Self {
        Self {
            registry,
            config,
            round_robin_indices: Mutex::new(HashMap::new()),
            session_affinity: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_strategy(&self, trace: &Trace, event_type: CognitiveEventType) -> RoutingStrategy {
        trace
            .routing_strategy
            .or_else(|| RoutingStrategy::default_for(event_type))
            .unwrap_or(self.config.default_strategy)
    }

    fn eligible_consumers(&self, event_type: CognitiveEventType) -> Vec<ConsumerRecord> {
        self.registry
            .healthy(self.config.heartbeat_timeout_seconds)
            .into_iter()
            .filter(|c| is_eligible(c, event_type, self.config.heartbeat_timeout_seconds))
            .collect()
    }

    fn next_round_robin<'a>(&self, event_type: CognitiveEventType, consumers: &'a [ConsumerRecord]) -> &'a ConsumerRecord {
        let mut indices = self.round_robin_indices.lock().expect("round robin lock poisoned");
        let index = indices.entry(event_type).or_insert(0);
        let chosen = &consumers[*index % consumers.len()];
        *index = index.wrapping_add(1);
        chosen
    }

    fn decision_for(&self, strategy: RoutingStrategy, target_ids: Vec<String>, targets: &[&ConsumerRecord]) -> RoutingDecision {
        let healthy_count = self.registry.healthy(self.config.heartbeat_timeout_seconds).len();
        let mut confidence = (healthy_count as f64 / 3.0).min(1.0);
        if targets.len() > 1 || healthy_count > 1 {
            let loads: Vec<f64> = self.registry.healthy(self.config.heartbeat_timeout_seconds).iter().map(|c| c.current_load).collect();
            let (_, variance) = mean_and_variance(&loads);
            confidence *= (1.0 - variance).max(0.5);
        }

        let estimated_processing_time_ms = if targets.is_empty() {
            1000.0
        } else {
            let latencies: Vec<f64> = targets.iter().map(|c| c.average_processing_time_ms).filter(|l| *l > 0.0).collect();
            if latencies.is_empty() {
                1000.0
            } else {
                latencies.iter().sum::<f64>() / latencies.len() as f64
            }
        };

        RoutingDecision {
            target_consumers: target_ids,
            strategy,
            confidence,
            estimated_processing_time_ms,
        }
    }

    /// Selects consumer(s) for `event_type` under `trace`'s resolved
    /// strategy. Returns `None` if no consumer is currently eligible.
    pub fn route(&self, event_type: CognitiveEventType, trace: &Trace) -> Option<RoutingDecision> {
        let strategy = self.resolve_strategy(trace, event_type);
        let eligible = self.eligible_consumers(event_type);
        if eligible.is_empty() {
            return None;
        }

        match strategy {
            RoutingStrategy::Broadcast => {
                let ids: Vec<String> = eligible.iter().map(|c| c.consumer_id.clone()).collect();
                let refs: Vec<&ConsumerRecord> = eligible.iter().collect();
                Some(self.decision_for(strategy, ids, &refs))
            }
            RoutingStrategy::RoundRobin => {
                let chosen = self.next_round_robin(event_type, &eligible);
                Some(self.decision_for(strategy, vec![chosen.consumer_id.clone()], &[chosen]))
            }
            RoutingStrategy::CognitiveLoad => {
                let chosen = eligible.iter().min_by(|a, b| a.current_load.total_cmp(&b.current_load))?;
                Some(self.decision_for(strategy, vec![chosen.consumer_id.clone()], &[chosen]))
            }
            RoutingStrategy::Priority => {
                let chosen = best_scored(&eligible, event_type, trace.priority)?;
                Some(self.decision_for(strategy, vec![chosen.consumer_id.clone()], &[chosen]))
            }
            RoutingStrategy::StickySession => {
                let session_id = trace.session_id.clone().unwrap_or_else(|| trace.trace_id.clone());
                let timeout = Duration::minutes(self.config.session_affinity_timeout_minutes);
                let now = Utc::now();

                let affinity = {
                    let mut affinities = self.session_affinity.lock().expect("session affinity lock poisoned");
                    match affinities.get(&session_id) {
                        Some((consumer_id, established_at)) if now - *established_at <= timeout => Some(consumer_id.clone()),
                        Some(_) => {
                            let _ = affinities.remove(&session_id);
                            None
                        }
                        None => None,
                    }
                };

                if let Some(consumer_id) = affinity {
                    if let Some(chosen) = eligible.iter().find(|c| c.consumer_id == consumer_id) {
                        return Some(self.decision_for(strategy, vec![chosen.consumer_id.clone()], &[chosen]));
                    }
                }

                let chosen = best_scored(&eligible, event_type, trace.priority)?;
                let _ = self
                    .session_affinity
                    .lock()
                    .expect("session affinity lock poisoned")
                    .insert(session_id, (chosen.consumer_id.clone(), now));
                Some(self.decision_for(strategy, vec![chosen.consumer_id.clone()], &[chosen]))
            }
        }
    }

    /// Reclassifies nothing directly (health is derived live from the
    /// registry) but prunes session affinities that no longer point at
    /// a known consumer or that have aged past
    /// `session_affinity_timeout_minutes`.
    pub fn run_maintenance(&self) {
        let eligible_ids: std::collections::HashSet<String> = self.registry.list().into_iter().map(|c| c.consumer_id).collect();
        let timeout = Duration::minutes(self.config.session_affinity_timeout_minutes);
        let now = Utc::now();
        self.session_affinity
            .lock()
            .expect("session affinity lock poisoned")
            .retain(|_, (consumer_id, established_at)| eligible_ids.contains(consumer_id) && now - *established_at <= timeout);
    }

    /// Spawns the 30-second (by default) maintenance loop, registering it
    /// with `task_manager`. Exits once `shutdown` observes `true`.
    pub fn start(self: &Arc<Self>, mut task_manager: TaskManager, mut shutdown: watch::Receiver<bool>) {
        let process_labels = task_manager.process_labels();
        let dispatcher = Arc::clone(self);
        let task_labels = TaskLabels {
            task_cat: "cognitive".into(),
            task_id: "cognitive/maintenance-loop".into(),
            task_source: "NA".into(),
        };
        let task_labels_clone = task_labels.clone();
        let handle = tokio::task::spawn(async move {
            let interval = std::time::Duration::from_secs(dispatcher.config.maintenance_interval_seconds.max(1));
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        dispatcher.run_maintenance();
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            TaskManager::no_task_cleaner(process_labels, task_labels_clone)
        });
        task_manager.register(handle, &task_labels);
    }

    /// Subscribes this dispatcher to the bus for every known
    /// `CognitiveEventType` topic, in addition to spawning the
    /// maintenance loop (see `start`). Each subscription's handler
    /// deserializes the published event's payload back into a
    /// `CognitiveEvent` and routes it via `route`; a routing failure
    /// (including "no eligible consumer") surfaces as a handler error so
    /// the dispatcher's own dispatch statistics and any DLQ wiring the
    /// caller layers on top see it.
    pub fn start_with_bus(self: &Arc<Self>, event_bus: &EventBus, task_manager: TaskManager, shutdown: watch::Receiver<bool>) -> Result<(), bus::Error> {
        self.start(task_manager, shutdown);
        for &event_type in CognitiveEventType::ALL {
            let handler: Arc<dyn Handler> = Arc::new(CognitiveRoutingHandler {
                dispatcher: Arc::clone(self),
            });
            let _subscription = event_bus.subscribe(event_type.as_str(), HandlerKind::Async(handler), 0, None, HashMap::new(), Vec::new())?;
        }
        Ok(())
    }

    /// Deserializes `event`'s payload into a `CognitiveEvent` and routes
    /// it, the operation every per-topic bus subscription's handler
    /// delegates to.
    fn dispatch_event(&self, event: &types::Event) -> Result<RoutingDecision, HandlerError> {
        let cognitive_event: CognitiveEvent = serde_json::from_value(event.payload.clone()).map_err(|error| HandlerError::Failed {
            reason: format!("payload is not a well-formed cognitive event: {error}"),
        })?;
        if cognitive_event.trace.routing_attempts >= self.config.max_routing_attempts {
            return Err(HandlerError::Failed {
                reason: format!("trace {} exceeded max_routing_attempts ({})", cognitive_event.trace.trace_id, self.config.max_routing_attempts),
            });
        }
        self.route(cognitive_event.event_type, &cognitive_event.trace).ok_or_else(|| HandlerError::Failed {
            reason: format!("no eligible consumer for {}", cognitive_event.event_type.as_str()),
        })
    }
}

struct CognitiveRoutingHandler {
    dispatcher: Arc<CognitiveDispatcher>,
}

#[async_trait]
impl Handler for CognitiveRoutingHandler {
    async fn handle(&self, event: &types::Event) -> Result<(), HandlerError> {
        let decision = self.dispatcher.dispatch_event(event)?;
        tracing::info!(
            event_id = %event.id,
            targets = ?decision.target_consumers,
            strategy = ?decision.strategy,
            confidence = decision.confidence,
            "cognitive event routed"
        );
        Ok(())
    }
}
