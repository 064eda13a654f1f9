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

//! Consumer group registration and scaling decisions for cognitive event
//! consumers. Actual per-consumer health bookkeeping lives in
//! `consumer_registry`; this crate only tracks group membership,
//! per-group scaling configuration, and the cooldown-gated
//! scale-up/scale-down decision logic. Consumer selection for routing a
//! single event belongs to the cognitive dispatcher, not here.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Duration, Utc};
use consumer_registry::ConsumerRegistry;
use serde::{Deserialize, Serialize};
use task::{
    labels::{ProcessLabels, TaskLabels},
    TaskManager,
};
use tokio::sync::watch;
use types::CognitiveEventType;

/// The lifecycle state of a consumer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerGroupState {
    /// Created but no consumers have registered yet.
    Starting,
    /// At least one healthy consumer, operating normally.
    Active,
    /// A scaling decision was just actuated (by the caller; this manager
    /// only proposes).
    Scaling,
    /// Below the minimum healthy consumer count.
    Degraded,
    /// Being torn down.
    Terminating,
}

/// A proposed scaling action for one group. The manager only decides and
/// logs; it never spawns or terminates consumer processes itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingDecision {
    /// Add `by` more consumers.
    ScaleUp {
        /// How many consumers to add.
        by: u32,
    },
    /// Remove `by` consumers.
    ScaleDown {
        /// How many consumers to remove.
        by: u32,
    },
    /// No scaling action is warranted right now.
    Hold,
}

/// Per-group scaling and health configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerGroupConfig {
    /// The group's id, unique within a `ConsumerGroupManager`.
    pub group_id: String,
    /// The cognitive event types this group is responsible for.
    pub event_types: HashSet<CognitiveEventType>,
    /// Never scale below this many consumers.
    pub min_consumers: u32,
    /// Never scale above this many consumers.
    pub max_consumers: u32,
    /// The steady-state consumer count a group aims to start with.
    pub target_consumers: u32,
    /// Per-consumer queue depth considered a health boundary.
    pub max_queue_depth: u32,
    /// Per-consumer processing time considered a health boundary, in
    /// milliseconds.
    pub max_processing_time_ms: f64,
    /// Minimum per-consumer success rate considered healthy.
    pub min_success_rate: f64,
    /// Average queue depth above which the group should scale up.
    pub scale_up_queue_threshold: u32,
    /// Average queue depth below which the group should scale down.
    pub scale_down_queue_threshold: u32,
    /// Average processing latency above which the group should scale up.
    pub scale_up_latency_threshold_ms: f64,
    /// Minimum seconds between two scaling actions for this group.
    pub scale_cooldown_seconds: i64,
}

impl ConsumerGroupConfig {
    /// A config for `group_id`/`event_types` with every threshold set to
    /// the registry default.
    pub fn new(group_id: impl Into<String>, event_types: HashSet<CognitiveEventType>) -> Self {
        Self {
            group_id: group_id.into(),
            event_types,
            min_consumers: 1,
            max_consumers: 10,
            target_consumers: 3,
            max_queue_depth: 100,
            max_processing_time_ms: 5000.0,
            min_success_rate: 0.8,
            scale_up_queue_threshold: 50,
            scale_down_queue_threshold: 10,
            scale_up_latency_threshold_ms: 2000.0,
            scale_cooldown_seconds: 60,
        }
    }
}

struct GroupEntry {
    config: ConsumerGroupConfig,
    state: ConsumerGroupState,
    total_events_processed: u64,
    last_scale_action: Option<DateTime<Utc>>,
}

impl GroupEntry {
    fn is_in_cooldown(&self) -> bool {
        match self.last_scale_action {
            None => false,
            Some(last) => (Utc::now() - last) < Duration::seconds(self.config.scale_cooldown_seconds),
        }
    }
}

/// Manages group membership and scaling decisions for consumers sharing
/// one `ConsumerRegistry`.
pub struct ConsumerGroupManager {
    registry: Arc<ConsumerRegistry>,
    groups: Mutex<HashMap<String, GroupEntry>>,
    consumer_timeout_seconds: f64,
    health_check_interval_seconds: u64,
    scaling_check_interval_seconds: u64,
}

impl ConsumerGroupManager {
    /// Creates a manager over `registry`, checking heartbeats every
    /// `health_check_interval_seconds` and considering a consumer failed
    /// after `consumer_timeout_seconds` without a heartbeat.
    pub fn new(registry: Arc<ConsumerRegistry>, consumer_timeout_seconds: f64, health_check_interval_seconds: u64) -> Self {
        Self {
            registry,
            groups: Mutex::new(HashMap::new()),
            consumer_timeout_seconds,
            health_check_interval_seconds,
            scaling_check_interval_seconds: 60,
        }
    }

    /// Creates a new, empty consumer group. Returns `false` if
    /// `config.group_id` is already in use.
    pub fn create_group(&self, config: ConsumerGroupConfig) -> bool {
        let mut groups = self.groups.lock().expect("consumer group lock poisoned");
        if groups.contains_key(&config.group_id) {
            return false;
        }
        let group_id = config.group_id.clone();
        let _ = groups.insert(
            group_id,
            GroupEntry {
                config,
                state: ConsumerGroupState::Starting,
                total_events_processed: 0,
                last_scale_action: None,
            },
        );
        true
    }

    /// Registers `consumer_id` into `group_id`'s membership and the
    /// shared registry. Returns `false` if the group does not exist or
    /// the consumer is already registered.
    pub fn register_consumer(&self, consumer_id: &str, group_id: &str, max_concurrent: u32, preferred_event_types: HashSet<CognitiveEventType>) -> bool {
        let mut groups = self.groups.lock().expect("consumer group lock poisoned");
        let Some(group) = groups.get_mut(group_id) else {
            return false;
        };
        if !self.registry.register(consumer_id, Some(group_id.to_string()), max_concurrent, preferred_event_types) {
            return false;
        }
        group.state = ConsumerGroupState::Active;
        true
    }

    /// Removes `consumer_id` from the registry. Returns `false` if it was
    /// not registered.
    pub fn unregister_consumer(&self, consumer_id: &str) -> bool {
        self.registry.unregister(consumer_id)
    }

    /// Whether `group_id` should scale up right now: not in cooldown,
    /// below `max_consumers`, and either the average queue depth or
    /// average processing latency across members exceeds its threshold.
    pub fn should_scale_up(&self, group_id: &str) -> bool {
        let groups = self.groups.lock().expect("consumer group lock poisoned");
        let Some(group) = groups.get(group_id) else {
            return false;
        };
        let members = self.registry.list_in_group(group_id);
        if members.len() as u32 >= group.config.max_consumers {
            return false;
        }
        if group.is_in_cooldown() {
            return false;
        }
        if members.is_empty() {
            return false;
        }

        let avg_queue_depth = members.iter().map(|c| c.current_queue_depth as f64).sum::<f64>() / members.len() as f64;
        if avg_queue_depth > group.config.scale_up_queue_threshold as f64 {
            return true;
        }

        let avg_latency = members.iter().map(|c| c.average_processing_time_ms).sum::<f64>() / members.len() as f64;
        avg_latency > group.config.scale_up_latency_threshold_ms
    }

    /// Whether `group_id` should scale down right now: not in cooldown,
    /// above `min_consumers`, and every healthy member is below both the
    /// queue-depth and 30%-load scale-down thresholds.
    pub fn should_scale_down(&self, group_id: &str) -> bool {
        let groups = self.groups.lock().expect("consumer group lock poisoned");
        let Some(group) = groups.get(group_id) else {
            return false;
        };
        let members = self.registry.list_in_group(group_id);
        if members.len() as u32 <= group.config.min_consumers {
            return false;
        }
        if group.is_in_cooldown() {
            return false;
        }

        for member in &members {
            if !member.is_healthy(self.consumer_timeout_seconds) {
                continue;
            }
            if member.current_queue_depth > group.config.scale_down_queue_threshold {
                return false;
            }
            if member.current_load > 0.3 {
                return false;
            }
        }
        true
    }

    /// Evaluates scale-up, then scale-down, for `group_id`, returning
    /// `None` if the group does not exist.
    pub fn evaluate_scaling(&self, group_id: &str) -> Option<ScalingDecision> {
        if !self.groups.lock().expect("consumer group lock poisoned").contains_key(group_id) {
            return None;
        }
        let decision = if self.should_scale_up(group_id) {
            ScalingDecision::ScaleUp { by: 1 }
        } else if self.should_scale_down(group_id) {
            ScalingDecision::ScaleDown { by: 1 }
        } else {
            ScalingDecision::Hold
        };

        if !matches!(decision, ScalingDecision::Hold) {
            let mut groups = self.groups.lock().expect("consumer group lock poisoned");
            if let Some(group) = groups.get_mut(group_id) {
                group.last_scale_action = Some(Utc::now());
                group.state = ConsumerGroupState::Scaling;
            }
        }
        Some(decision)
    }

    /// Evaluates scaling for every registered group.
    pub fn evaluate_all_scaling(&self) -> HashMap<String, ScalingDecision> {
        let group_ids: Vec<String> = self.groups.lock().expect("consumer group lock poisoned").keys().cloned().collect();
        group_ids.into_iter().filter_map(|id| self.evaluate_scaling(&id).map(|decision| (id, decision))).collect()
    }

    /// Marks every consumer across every group whose heartbeat has
    /// expired as failed, returning the affected consumer ids.
    pub fn sweep_expired_heartbeats(&self) -> Vec<String> {
        self.registry.sweep_expired_heartbeats(self.consumer_timeout_seconds)
    }

    /// Total registered consumers across all groups and `group_id`'s
    /// current lifecycle state, if it exists.
    pub fn group_state(&self, group_id: &str) -> Option<ConsumerGroupState> {
        self.groups.lock().expect("consumer group lock poisoned").get(group_id).map(|g| g.state)
    }

    /// Records that one more event was processed by `group_id`, for
    /// metrics reporting.
    pub fn record_processed(&self, group_id: &str) {
        if let Some(group) = self.groups.lock().expect("consumer group lock poisoned").get_mut(group_id) {
            group.total_events_processed += 1;
        }
    }

    /// Spawns the health-monitor and scaling-decision background loops,
    /// registering both with `task_manager`. Both loops exit once
    /// `shutdown` observes `true`.
    pub fn start(self: &Arc<Self>, mut task_manager: TaskManager, shutdown: watch::Receiver<bool>) {
        let process_labels = task_manager.process_labels();

        let manager = Arc::clone(self);
        let mut health_shutdown = shutdown.clone();
        let health_labels = TaskLabels {
            task_cat: "consumer-groups".into(),
            task_id: "consumer-groups/health-monitor".into(),
            task_source: "NA".into(),
        };
        let health_labels_clone = health_labels.clone();
        let health_process_labels = process_labels.clone();
        let health_handle = tokio::task::spawn(async move {
            let interval = std::time::Duration::from_secs(manager.health_check_interval_seconds.max(1));
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let expired = manager.sweep_expired_heartbeats();
                        if !expired.is_empty() {
                            tracing::warn!(?expired, "consumers timed out");
                        }
                    }
                    _ = health_shutdown.changed() => {
                        if *health_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            TaskManager::no_task_cleaner(health_process_labels, health_labels_clone)
        });
        task_manager.register(health_handle, &health_labels);

        let manager = Arc::clone(self);
        let mut scaling_shutdown = shutdown;
        let scaling_labels = TaskLabels {
            task_cat: "consumer-groups".into(),
            task_id: "consumer-groups/scaling-loop".into(),
            task_source: "NA".into(),
        };
        let scaling_labels_clone = scaling_labels.clone();
        let scaling_process_labels = process_labels;
        let scaling_handle = tokio::task::spawn(async move {
            let interval = std::time::Duration::from_secs(manager.scaling_check_interval_seconds.max(1));
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        for (group_id, decision) in manager.evaluate_all_scaling() {
                            match decision {
                                ScalingDecision::ScaleUp { by } => {
                                    tracing::info!(%group_id, by, "consumer group should scale up");
                                }
                                ScalingDecision::ScaleDown { by } => {
                                    tracing::info!(%group_id, by, "consumer group should scale down");
                                }
                                ScalingDecision::Hold => {}
                            }
                        }
                    }
                    _ = scaling_shutdown.changed() => {
                        if *scaling_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            TaskManager::no_task_cleaner(scaling_process_labels, scaling_labels_clone)
        });
        task_manager.register(scaling_handle, &scaling_labels);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn manager() -> Arc<ConsumerGroupManager> {
        Arc::new(ConsumerGroupManager::new(Arc::new(ConsumerRegistry::new()), 120.0, 30))
    }

    #[test]
    fn scale_up_triggers_on_queue_depth() {
        let manager = manager();
        assert!(manager.create_group(ConsumerGroupConfig::new("g1", HashSet::new())));
        assert!(manager.register_consumer("c1", "g1", 10, HashSet::new()));
        assert!(manager.registry.heartbeat("c1", 80, 0.1, 0.0, 0.0));

        assert!(manager.should_scale_up("g1"));
        assert!(!manager.should_scale_down("g1"));
    }

    #[test]
    fn scale_down_requires_every_healthy_member_below_load() {
        let manager = manager();
        assert!(manager.create_group(ConsumerGroupConfig::new("g1", HashSet::new())));
        assert!(manager.register_consumer("c1", "g1", 10, HashSet::new()));
        assert!(manager.register_consumer("c2", "g1", 10, HashSet::new()));
        assert!(manager.registry.heartbeat("c1", 2, 0.1, 0.0, 0.0));
        assert!(manager.registry.heartbeat("c2", 2, 0.1, 0.0, 0.0));

        assert!(manager.should_scale_down("g1"));

        assert!(manager.registry.heartbeat("c2", 2, 0.5, 0.0, 0.0));
        assert!(!manager.should_scale_down("g1"));
    }

    #[test]
    fn cooldown_blocks_a_second_scaling_decision() {
        let manager = manager();
        assert!(manager.create_group(ConsumerGroupConfig::new("g1", HashSet::new())));
        assert!(manager.register_consumer("c1", "g1", 10, HashSet::new()));
        assert!(manager.registry.heartbeat("c1", 80, 0.1, 0.0, 0.0));

        assert_eq!(manager.evaluate_scaling("g1"), Some(ScalingDecision::ScaleUp { by: 1 }));
        assert_eq!(manager.evaluate_scaling("g1"), Some(ScalingDecision::Hold));
    }

    #[test]
    fn min_consumers_floor_blocks_scale_down() {
        let manager = manager();
        let mut config = ConsumerGroupConfig::new("g1", HashSet::new());
        config.min_consumers = 1;
        assert!(manager.create_group(config));
        assert!(manager.register_consumer("c1", "g1", 10, HashSet::new()));
        assert!(manager.registry.heartbeat("c1", 0, 0.0, 0.0, 0.0));
        assert!(!manager.should_scale_down("g1"));
    }
}
