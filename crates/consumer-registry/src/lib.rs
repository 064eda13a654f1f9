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

//! Shared consumer health bookkeeping used by both the cognitive
//! dispatcher (routing eligibility, load scoring) and the consumer group
//! manager (scaling decisions, heartbeat timeouts). Keeping one registry
//! rather than two avoids two independently-drifting copies of the same
//! per-consumer state.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use types::CognitiveEventType;

const RECENT_PROCESSING_TIMES_CAPACITY: usize = 100;

/// Health state a consumer transitions through, driven by consecutive
/// processing failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Registered but has not yet processed or heartbeat.
    Initializing,
    /// Zero consecutive failures.
    Healthy,
    /// 1-2 consecutive failures.
    Degraded,
    /// 3-4 consecutive failures.
    Unhealthy,
    /// 5 or more consecutive failures, or missed its heartbeat deadline.
    Failed,
    /// Explicitly unregistered; retained briefly for introspection.
    Terminated,
}

/// Everything tracked about one registered consumer.
#[derive(Debug, Clone)]
pub struct ConsumerRecord {
    /// The consumer's id, unique within the registry.
    pub consumer_id: String,
    /// The consumer group this consumer belongs to, if any.
    pub group_id: Option<String>,
    /// Current health state.
    pub state: ConsumerState,
    /// Current load, in `[0.0, 1.0]`.
    pub current_load: f64,
    /// Upper bound on concurrent in-flight events for this consumer.
    pub max_concurrent: u32,
    /// Events currently in flight.
    pub current_concurrent: u32,
    /// Depth of this consumer's own pending queue, as last reported.
    pub current_queue_depth: u32,
    /// Total events handed to this consumer.
    pub total_events_processed: u64,
    /// Events that completed successfully.
    pub successful_events: u64,
    /// Events that failed.
    pub failed_events: u64,
    /// Consecutive failures since the last success.
    pub consecutive_failures: u32,
    /// Bounded rolling window of the last processing durations, most
    /// recent last.
    pub recent_processing_times: VecDeque<f64>,
    /// Mean of `recent_processing_times`.
    pub average_processing_time_ms: f64,
    /// 95th percentile of `recent_processing_times`.
    pub p95_processing_time_ms: f64,
    /// Last reported memory usage.
    pub memory_usage_mb: f64,
    /// Last reported CPU usage, as a percentage.
    pub cpu_usage_percent: f64,
    /// The last heartbeat or processing result timestamp.
    pub last_heartbeat: DateTime<Utc>,
    /// When this consumer was registered.
    pub registered_at: DateTime<Utc>,
    /// Cognitive event types this consumer prefers, used for the
    /// dispatcher's specialization bonus. Empty means "no preference".
    pub preferred_event_types: HashSet<CognitiveEventType>,
}

impl ConsumerRecord {
    fn new(consumer_id: String, group_id: Option<String>, max_concurrent: u32, preferred_event_types: HashSet<CognitiveEventType>) -> Self {
        let now = Utc::now();
        Self {
            consumer_id,
            group_id,
            state: ConsumerState::Initializing,
            current_load: 0.0,
            max_concurrent,
            current_concurrent: 0,
            current_queue_depth: 0,
            total_events_processed: 0,
            successful_events: 0,
            failed_events: 0,
            consecutive_failures: 0,
            recent_processing_times: VecDeque::with_capacity(RECENT_PROCESSING_TIMES_CAPACITY),
            average_processing_time_ms: 0.0,
            p95_processing_time_ms: 0.0,
            memory_usage_mb: 0.0,
            cpu_usage_percent: 0.0,
            last_heartbeat: now,
            registered_at: now,
            preferred_event_types,
        }
    }

    /// Fraction of processed events that succeeded. `1.0` when nothing
    /// has been processed yet, matching the source's optimistic default.
    pub fn success_rate(&self) -> f64 {
        if self.total_events_processed == 0 {
            1.0
        } else {
            self.successful_events as f64 / self.total_events_processed as f64
        }
    }

    /// Whether this consumer is currently eligible to receive work:
    /// HEALTHY or DEGRADED state, a success rate of at least 0.8, load
    /// below 0.95, average latency below 5000ms, and a heartbeat within
    /// `heartbeat_timeout_seconds`.
    pub fn is_healthy(&self, heartbeat_timeout_seconds: f64) -> bool {
        let state_ok = matches!(self.state, ConsumerState::Healthy | ConsumerState::Degraded);
        let heartbeat_age = (Utc::now() - self.last_heartbeat).num_milliseconds() as f64 / 1000.0;
        state_ok
            && self.success_rate() >= 0.8
            && self.current_load < 0.95
            && self.average_processing_time_ms < 5000.0
            && heartbeat_age <= heartbeat_timeout_seconds
    }

    fn record_result(&mut self, processing_time_ms: f64, success: bool) {
        self.total_events_processed += 1;
        if success {
            self.successful_events += 1;
            self.consecutive_failures = 0;
        } else {
            self.failed_events += 1;
            self.consecutive_failures += 1;
        }

        if self.recent_processing_times.len() == RECENT_PROCESSING_TIMES_CAPACITY {
            let _ = self.recent_processing_times.pop_front();
        }
        self.recent_processing_times.push_back(processing_time_ms);
        self.average_processing_time_ms = self.recent_processing_times.iter().sum::<f64>() / self.recent_processing_times.len() as f64;
        let mut sorted: Vec<f64> = self.recent_processing_times.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("processing time must not be NaN"));
        let idx = ((sorted.len() as f64) * 0.95).floor() as usize;
        self.p95_processing_time_ms = sorted[idx.min(sorted.len() - 1)];

        self.state = state_for_consecutive_failures(self.consecutive_failures);
        self.last_heartbeat = Utc::now();
    }

    fn apply_heartbeat(&mut self, queue_depth: u32, current_load: f64, memory_usage_mb: f64, cpu_usage_percent: f64) {
        self.current_queue_depth = queue_depth;
        self.current_load = current_load.clamp(0.0, 1.0);
        self.memory_usage_mb = memory_usage_mb;
        self.cpu_usage_percent = cpu_usage_percent;
        self.last_heartbeat = Utc::now();
        if matches!(self.state, ConsumerState::Failed) {
            self.consecutive_failures = 0;
            self.state = ConsumerState::Healthy;
        }
    }
}

fn state_for_consecutive_failures(consecutive_failures: u32) -> ConsumerState {
    match consecutive_failures {
        0 => ConsumerState::Healthy,
        1 | 2 => ConsumerState::Degraded,
        3 | 4 => ConsumerState::Unhealthy,
        _ => ConsumerState::Failed,
    }
}

/// A registry of consumer health state, shared by `Arc` between the
/// cognitive dispatcher and the consumer group manager.
#[derive(Default)]
pub struct ConsumerRegistry {
    consumers: Mutex<HashMap<String, ConsumerRecord>>,
}

impl ConsumerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new consumer. Returns `false` without modifying state
    /// if `consumer_id` is already registered.
    pub fn register(&self, consumer_id: impl Into<String>, group_id: Option<String>, max_concurrent: u32, preferred_event_types: HashSet<CognitiveEventType>) -> bool {
        let consumer_id = consumer_id.into();
        let mut consumers = self.consumers.lock().expect("consumer registry lock poisoned");
        if consumers.contains_key(&consumer_id) {
            return false;
        }
        let _ = consumers.insert(consumer_id.clone(), ConsumerRecord::new(consumer_id, group_id, max_concurrent, preferred_event_types));
        true
    }

    /// Removes a consumer from the registry. Returns `false` if it was
    /// not registered.
    pub fn unregister(&self, consumer_id: &str) -> bool {
        self.consumers.lock().expect("consumer registry lock poisoned").remove(consumer_id).is_some()
    }

    /// A snapshot of one consumer's state.
    pub fn get(&self, consumer_id: &str) -> Option<ConsumerRecord> {
        self.consumers.lock().expect("consumer registry lock poisoned").get(consumer_id).cloned()
    }

    /// A snapshot of every registered consumer.
    pub fn list(&self) -> Vec<ConsumerRecord> {
        self.consumers.lock().expect("consumer registry lock poisoned").values().cloned().collect()
    }

    /// A snapshot of every consumer registered under `group_id`.
    pub fn list_in_group(&self, group_id: &str) -> Vec<ConsumerRecord> {
        self.consumers
            .lock()
            .expect("consumer registry lock poisoned")
            .values()
            .filter(|c| c.group_id.as_deref() == Some(group_id))
            .cloned()
            .collect()
    }

    /// Every consumer currently eligible to receive work, across every
    /// group.
    pub fn healthy(&self, heartbeat_timeout_seconds: f64) -> Vec<ConsumerRecord> {
        self.consumers
            .lock()
            .expect("consumer registry lock poisoned")
            .values()
            .filter(|c| c.is_healthy(heartbeat_timeout_seconds))
            .cloned()
            .collect()
    }

    /// Records the outcome of one processing attempt, updating rolling
    /// latency stats, success counters, and health state. Returns `false`
    /// if `consumer_id` is not registered.
    pub fn record_result(&self, consumer_id: &str, processing_time_ms: f64, success: bool) -> bool {
        let mut consumers = self.consumers.lock().expect("consumer registry lock poisoned");
        match consumers.get_mut(consumer_id) {
            Some(record) => {
                record.record_result(processing_time_ms, success);
                true
            }
            None => false,
        }
    }

    /// Applies a heartbeat report, resetting a `FAILED` consumer back to
    /// `HEALTHY`. Returns `false` if `consumer_id` is not registered.
    pub fn heartbeat(&self, consumer_id: &str, queue_depth: u32, current_load: f64, memory_usage_mb: f64, cpu_usage_percent: f64) -> bool {
        let mut consumers = self.consumers.lock().expect("consumer registry lock poisoned");
        match consumers.get_mut(consumer_id) {
            Some(record) => {
                record.apply_heartbeat(queue_depth, current_load, memory_usage_mb, cpu_usage_percent);
                true
            }
            None => false,
        }
    }

    /// Forces a consumer into `FAILED`, bypassing the consecutive-failure
    /// threshold (used for explicit failure reports, e.g. a crashed
    /// consumer process). Returns `false` if `consumer_id` is not
    /// registered.
    pub fn mark_failed(&self, consumer_id: &str) -> bool {
        let mut consumers = self.consumers.lock().expect("consumer registry lock poisoned");
        match consumers.get_mut(consumer_id) {
            Some(record) => {
                record.consecutive_failures = record.consecutive_failures.max(5);
                record.state = ConsumerState::Failed;
                true
            }
            None => false,
        }
    }

    /// Marks every consumer whose last heartbeat is older than
    /// `timeout_seconds` as `FAILED`, returning their ids.
    pub fn sweep_expired_heartbeats(&self, timeout_seconds: f64) -> Vec<String> {
        let mut consumers = self.consumers.lock().expect("consumer registry lock poisoned");
        let now = Utc::now();
        let mut expired = Vec::new();
        for record in consumers.values_mut() {
            if matches!(record.state, ConsumerState::Terminated) {
                continue;
            }
            let age = (now - record.last_heartbeat).num_milliseconds() as f64 / 1000.0;
            if age > timeout_seconds && !matches!(record.state, ConsumerState::Failed) {
                record.state = ConsumerState::Failed;
                expired.push(record.consumer_id.clone());
            }
        }
        expired
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registers_and_reports_optimistic_default_success_rate() {
        let registry = ConsumerRegistry::new();
        assert!(registry.register("c1", None, 10, HashSet::new()));
        assert!(!registry.register("c1", None, 10, HashSet::new()));
        let record = registry.get("c1").unwrap();
        assert_eq!(record.success_rate(), 1.0);
    }

    #[test]
    fn consecutive_failures_drive_state_thresholds() {
        let registry = ConsumerRegistry::new();
        assert!(registry.register("c1", None, 10, HashSet::new()));

        for _ in 0..2 {
            assert!(registry.record_result("c1", 10.0, false));
        }
        assert!(matches!(registry.get("c1").unwrap().state, ConsumerState::Degraded));

        for _ in 0..2 {
            assert!(registry.record_result("c1", 10.0, false));
        }
        assert!(matches!(registry.get("c1").unwrap().state, ConsumerState::Unhealthy));

        assert!(registry.record_result("c1", 10.0, false));
        assert!(matches!(registry.get("c1").unwrap().state, ConsumerState::Failed));

        assert!(registry.record_result("c1", 10.0, true));
        assert!(matches!(registry.get("c1").unwrap().state, ConsumerState::Healthy));
    }

    #[test]
    fn heartbeat_resets_a_failed_consumer() {
        let registry = ConsumerRegistry::new();
        assert!(registry.register("c1", None, 10, HashSet::new()));
        assert!(registry.mark_failed("c1"));
        assert!(matches!(registry.get("c1").unwrap().state, ConsumerState::Failed));
        assert!(registry.heartbeat("c1", 0, 0.1, 0.0, 0.0));
        assert!(matches!(registry.get("c1").unwrap().state, ConsumerState::Healthy));
    }

    #[test]
    fn unhealthy_load_excludes_from_healthy_snapshot() {
        let registry = ConsumerRegistry::new();
        assert!(registry.register("c1", None, 10, HashSet::new()));
        assert!(registry.heartbeat("c1", 0, 0.1, 0.0, 0.0));
        registry.consumers.lock().unwrap().get_mut("c1").unwrap().state = ConsumerState::Healthy;
        assert_eq!(registry.healthy(120.0).len(), 1);

        assert!(registry.heartbeat("c1", 0, 0.99, 0.0, 0.0));
        assert!(registry.healthy(120.0).is_empty());
    }

    #[test]
    fn expired_heartbeats_are_swept_to_failed() {
        let registry = ConsumerRegistry::new();
        assert!(registry.register("c1", None, 10, HashSet::new()));
        registry.consumers.lock().unwrap().get_mut("c1").unwrap().last_heartbeat = Utc::now() - chrono::Duration::seconds(1000);
        let expired = registry.sweep_expired_heartbeats(120.0);
        assert_eq!(expired, vec!["c1".to_string()]);
        assert!(matches!(registry.get("c1").unwrap().state, ConsumerState::Failed));
    }

    #[test]
    fn p95_uses_sorted_floor_index() {
        let registry = ConsumerRegistry::new();
        assert!(registry.register("c1", None, 10, HashSet::new()));
        for i in 1..=20 {
            assert!(registry.record_result("c1", i as f64, true));
        }
        let record = registry.get("c1").unwrap();
        assert_eq!(record.p95_processing_time_ms, 20.0);
    }
}
