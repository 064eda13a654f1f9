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

//! Dead-letter handling for cognitive events: failure classification,
//! per-event-type retry scheduling, and poison-message detection.

pub mod classify;
pub mod metrics;
pub mod retry;

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use task::{
    labels::TaskLabels,
    TaskManager,
};
use tokio::sync::watch;
use types::CognitiveEventType;
use validator::Validate;

pub use classify::{classify, ErrorKind, FailureCategory};
pub use metrics::DlqMetrics;
pub use retry::{calculate_retry_delay, default_retry_config, should_retry_event, RetryConfig, RetryStrategy};

const POISON_PATTERN_WINDOW: Duration = Duration::hours(24);

/// Configuration recognized by `DeadLetterQueue`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DlqConfig {
    /// Number of similar recent failures before a trace is quarantined
    /// as poison.
    #[validate(range(min = 1))]
    pub poison_detection_threshold: u32,
    /// How often the analytics loop logs aggregated statistics, in
    /// seconds.
    #[validate(range(min = 0.0))]
    pub analytics_interval_seconds: f64,
    /// How often the retry processor wakes to emit ready retries, in
    /// seconds.
    #[validate(range(min = 0.0))]
    pub retry_check_interval_seconds: f64,
    /// Where `persist_state`/`load_persisted_state` would read and write
    /// durable retry-queue state, were they not documented no-ops.
    pub dlq_persistence_path: std::path::PathBuf,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            poison_detection_threshold: 5,
            analytics_interval_seconds: 300.0,
            retry_check_interval_seconds: 30.0,
            dlq_persistence_path: std::path::PathBuf::from("./data/dlq-state.json"),
        }
    }
}

/// Everything recorded about one failed event's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    /// The id of the event that failed, as assigned by the WAL.
    pub event_id: String,
    /// The cognitive trace this event belongs to.
    pub trace_id: String,
    /// The cognitive event type.
    pub event_type: CognitiveEventType,
    /// When this failure occurred.
    pub failure_time: DateTime<Utc>,
    /// The error message reported by the handler.
    pub error: String,
    /// Which attempt this failure was.
    pub attempt_number: u32,
    /// Total attempts made so far across the trace's lifetime.
    pub total_attempts: u32,
    /// When the next retry is due, if one is scheduled.
    pub next_retry_time: Option<DateTime<Utc>>,
    /// The classified failure category.
    pub failure_category: FailureCategory,
    /// The component that reported the failure.
    pub root_cause: String,
    /// Count of similar recent failures (same event type, error kind,
    /// and component) within the poison detection window.
    pub similar_failures: u32,
    /// Whether an automated recovery attempt was made.
    pub recovery_attempted: bool,
    /// Whether the recovery attempt succeeded.
    pub recovery_successful: bool,
    /// The terminal outcome, once reached: `"permanent_failure"`,
    /// `"poison"`, or `"recovered"`.
    pub final_disposition: Option<String>,
}

/// Classifies failures, schedules retries, and quarantines poison
/// traces for one logical event stream.
pub struct DeadLetterQueue {
    config: DlqConfig,
    failed_events: Mutex<HashMap<String, FailureRecord>>,
    retry_queue: Mutex<HashMap<String, FailureRecord>>,
    poison_events: Mutex<HashSet<String>>,
    failure_patterns: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
    metrics: Mutex<DlqMetrics>,
}

impl DeadLetterQueue {
    /// Creates an empty dead-letter queue.
    pub fn new(config: DlqConfig) -> Self {
        Self {
            config,
            failed_events: Mutex::new(HashMap::new()),
            retry_queue: Mutex::new(HashMap::new()),
            poison_events: Mutex::new(HashSet::new()),
            failure_patterns: Mutex::new(HashMap::new()),
            metrics: Mutex::new(DlqMetrics::default()),
        }
    }

    fn pattern_key(event_type: CognitiveEventType, error_kind: ErrorKind, component: &str) -> String {
        format!("{}:{:?}:{component}", event_type.as_str(), error_kind)
    }

    fn record_pattern(&self, key: &str) -> u32 {
        let mut patterns = self.failure_patterns.lock().expect("failure pattern lock poisoned");
        let now = Utc::now();
        let entry = patterns.entry(key.to_string()).or_default();
        entry.push_back(now);
        while let Some(&oldest) = entry.front() {
            if now - oldest > POISON_PATTERN_WINDOW {
                let _ = entry.pop_front();
            } else {
                break;
            }
        }
        entry.len() as u32
    }

    /// Handles one failed event: classifies it, checks for poison,
    /// decides whether to retry, and updates metrics. Returns `true` if
    /// the event was scheduled for retry.
    #[allow(clippy::too_many_arguments)]
    pub fn handle_failed_event(
        &self,
        event_id: &str,
        trace_id: &str,
        event_type: CognitiveEventType,
        error: &str,
        error_kind: ErrorKind,
        component: &str,
        attempt_number: u32,
    ) -> bool {
        if self.poison_events.lock().expect("poison set lock poisoned").contains(trace_id) {
            self.metrics.lock().expect("dlq metrics lock poisoned").record_failure(event_type.as_str(), "poison", component);
            return false;
        }

        let mut category = classify::classify(error_kind);
        let pattern_key = Self::pattern_key(event_type, error_kind, component);
        let similar_failures = self.record_pattern(&pattern_key);

        if similar_failures >= self.config.poison_detection_threshold {
            category = FailureCategory::Poison;
        }

        let retry_config = retry::default_retry_config(event_type);
        let total_attempts = self
            .retry_queue
            .lock()
            .expect("retry queue lock poisoned")
            .get(trace_id)
            .map(|r| r.total_attempts)
            .unwrap_or(0)
            + 1;

        let mut record = FailureRecord {
            event_id: event_id.to_string(),
            trace_id: trace_id.to_string(),
            event_type,
            failure_time: Utc::now(),
            error: error.to_string(),
            attempt_number,
            total_attempts,
            next_retry_time: None,
            failure_category: category,
            root_cause: component.to_string(),
            similar_failures,
            recovery_attempted: false,
            recovery_successful: false,
            final_disposition: None,
        };

        self.metrics.lock().expect("dlq metrics lock poisoned").record_failure(event_type.as_str(), &format!("{category:?}"), component);

        if category == FailureCategory::Poison {
            self.mark_as_poison(trace_id, record);
            return false;
        }

        let retry_success_rate = self.metrics.lock().expect("dlq metrics lock poisoned").retry_success_rate;
        let should_retry = retry::should_retry_event(total_attempts, &retry_config, false, category);

        if should_retry {
            let delay = retry::calculate_retry_delay(&retry_config, attempt_number, category, retry_success_rate);
            record.next_retry_time = Some(Utc::now() + Duration::milliseconds((delay * 1000.0) as i64));
            let _ = self.retry_queue.lock().expect("retry queue lock poisoned").insert(trace_id.to_string(), record);
            self.metrics.lock().expect("dlq metrics lock poisoned").events_retried += 1;
        } else {
            record.final_disposition = Some("permanent_failure".to_string());
            let _ = self.retry_queue.lock().expect("retry queue lock poisoned").remove(trace_id);
            let _ = self.failed_events.lock().expect("failed events lock poisoned").insert(trace_id.to_string(), record);
            let mut metrics = self.metrics.lock().expect("dlq metrics lock poisoned");
            metrics.events_permanently_failed += 1;
            metrics.events_in_dlq += 1;
        }

        should_retry
    }

    fn mark_as_poison(&self, trace_id: &str, mut record: FailureRecord) {
        let _ = self.poison_events.lock().expect("poison set lock poisoned").insert(trace_id.to_string());
        record.failure_category = FailureCategory::Poison;
        record.final_disposition = Some("poison".to_string());
        let _ = self.retry_queue.lock().expect("retry queue lock poisoned").remove(trace_id);
        let _ = self.failed_events.lock().expect("failed events lock poisoned").insert(trace_id.to_string(), record);
        let mut metrics = self.metrics.lock().expect("dlq metrics lock poisoned");
        metrics.events_in_dlq += 1;
        tracing::warn!(trace_id, "trace quarantined as poison");
    }

    /// Marks a retried trace as recovered, removing it from the retry
    /// queue.
    pub fn mark_retry_success(&self, trace_id: &str) -> bool {
        let record = self.retry_queue.lock().expect("retry queue lock poisoned").remove(trace_id);
        match record {
            Some(mut record) => {
                record.recovery_attempted = true;
                record.recovery_successful = true;
                record.final_disposition = Some("recovered".to_string());
                let mut metrics = self.metrics.lock().expect("dlq metrics lock poisoned");
                metrics.events_recovered += 1;
                metrics.recompute_retry_success_rate();
                true
            }
            None => false,
        }
    }

    /// Records another retry failure for a trace already in the retry
    /// queue, escalating to poison once the pattern threshold is
    /// crossed.
    pub fn mark_retry_failure(&self, trace_id: &str, error: &str) -> bool {
        let mut queue = self.retry_queue.lock().expect("retry queue lock poisoned");
        let Some(record) = queue.get_mut(trace_id) else {
            return false;
        };
        record.total_attempts += 1;
        record.error = error.to_string();

        if record.total_attempts >= self.config.poison_detection_threshold {
            let record = queue.remove(trace_id).expect("record present under held lock");
            drop(queue);
            self.mark_as_poison(trace_id, record);
        }
        true
    }

    /// Every retry-queue entry whose `next_retry_time` has arrived.
    pub fn pending_retries(&self) -> Vec<FailureRecord> {
        let now = Utc::now();
        self.retry_queue
            .lock()
            .expect("retry queue lock poisoned")
            .values()
            .filter(|record| record.next_retry_time.is_some_and(|t| t <= now))
            .cloned()
            .collect()
    }

    /// A snapshot of the running metrics.
    pub fn get_metrics(&self) -> DlqMetrics {
        self.metrics.lock().expect("dlq metrics lock poisoned").clone()
    }

    /// Whether `trace_id` has been quarantined as poison.
    pub fn is_poison(&self, trace_id: &str) -> bool {
        self.poison_events.lock().expect("poison set lock poisoned").contains(trace_id)
    }

    /// A snapshot of one trace's terminal failure record, if it reached
    /// `permanent_failure` or `poison`.
    pub fn get_failed_event(&self, trace_id: &str) -> Option<FailureRecord> {
        self.failed_events.lock().expect("failed events lock poisoned").get(trace_id).cloned()
    }

    /// Loads persisted retry-queue and poison-set state from
    /// `dlq_persistence_path`. A documented no-op: this port does not
    /// implement durable retry-queue recovery across restarts, matching
    /// the source it is grounded on.
    pub fn load_persisted_state(&self) {}

    /// Persists the current retry-queue and poison-set state. A
    /// documented no-op, see `load_persisted_state`.
    pub fn persist_state(&self) {}

    /// Spawns the retry-processor and analytics background loops,
    /// registering both with `task_manager`. The retry processor wakes
    /// every `retry_check_interval_seconds` and logs ready retries; the
    /// actual re-delivery of the original event (looked up from the WAL
    /// by `event_id`) is the caller's responsibility. The analytics loop
    /// logs aggregated `DlqMetrics` every `analytics_interval_seconds`.
    /// Both loops exit once `shutdown` observes `true`.
    pub fn start(self: &Arc<Self>, mut task_manager: TaskManager, shutdown: watch::Receiver<bool>) {
        let process_labels = task_manager.process_labels();

        let dlq = Arc::clone(self);
        let mut retry_shutdown = shutdown.clone();
        let retry_labels = TaskLabels {
            task_cat: "dlq".into(),
            task_id: "dlq/retry-processor".into(),
            task_source: "NA".into(),
        };
        let retry_labels_clone = retry_labels.clone();
        let retry_process_labels = process_labels.clone();
        let retry_handle = tokio::task::spawn(async move {
            let interval = std::time::Duration::from_secs_f64(dlq.config.retry_check_interval_seconds.max(1.0));
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let ready = dlq.pending_retries();
                        if !ready.is_empty() {
                            tracing::info!(ready = ready.len(), "dlq retries ready for redelivery");
                        }
                    }
                    _ = retry_shutdown.changed() => {
                        if *retry_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            TaskManager::no_task_cleaner(retry_process_labels, retry_labels_clone)
        });
        task_manager.register(retry_handle, &retry_labels);

        let dlq = Arc::clone(self);
        let mut analytics_shutdown = shutdown;
        let analytics_labels = TaskLabels {
            task_cat: "dlq".into(),
            task_id: "dlq/analytics".into(),
            task_source: "NA".into(),
        };
        let analytics_labels_clone = analytics_labels.clone();
        let analytics_process_labels = process_labels;
        let analytics_handle = tokio::task::spawn(async move {
            let interval = std::time::Duration::from_secs_f64(dlq.config.analytics_interval_seconds.max(1.0));
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let metrics = dlq.get_metrics();
                        tracing::info!(
                            events_retried = metrics.events_retried,
                            events_recovered = metrics.events_recovered,
                            events_permanently_failed = metrics.events_permanently_failed,
                            events_in_dlq = metrics.events_in_dlq,
                            retry_success_rate = metrics.retry_success_rate,
                            "dlq analytics tick"
                        );
                    }
                    _ = analytics_shutdown.changed() => {
                        if *analytics_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            TaskManager::no_task_cleaner(analytics_process_labels, analytics_labels_clone)
        });
        task_manager.register(analytics_handle, &analytics_labels);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transient_failures_are_scheduled_for_retry() {
        let dlq = DeadLetterQueue::new(DlqConfig::default());
        let should_retry = dlq.handle_failed_event(
            "ev-1",
            "trace-1",
            CognitiveEventType::MemoryWriteInitiated,
            "boom",
            ErrorKind::Timeout,
            "writer",
            1,
        );
        assert!(should_retry);
        assert_eq!(dlq.get_metrics().events_retried, 1);
    }

    #[test]
    fn validation_failures_go_straight_to_permanent_failure() {
        let dlq = DeadLetterQueue::new(DlqConfig::default());
        let should_retry = dlq.handle_failed_event(
            "ev-1",
            "trace-1",
            CognitiveEventType::MemoryWriteInitiated,
            "malformed payload",
            ErrorKind::Validation,
            "writer",
            1,
        );
        assert!(!should_retry);
        assert!(dlq.get_failed_event("trace-1").is_some());
        assert_eq!(dlq.get_failed_event("trace-1").unwrap().final_disposition.as_deref(), Some("permanent_failure"));
    }

    #[test]
    fn exhausting_max_attempts_moves_the_trace_to_permanent_failure() {
        let dlq = DeadLetterQueue::new(DlqConfig::default());
        let config = retry::default_retry_config(CognitiveEventType::AttentionGateAdmit);
        for attempt in 1..=config.max_attempts {
            let _ = dlq.handle_failed_event(
                "ev-1",
                "trace-1",
                CognitiveEventType::AttentionGateAdmit,
                "boom",
                ErrorKind::Timeout,
                "gate",
                attempt,
            );
        }
        let should_retry = dlq.handle_failed_event(
            "ev-1",
            "trace-1",
            CognitiveEventType::AttentionGateAdmit,
            "boom",
            ErrorKind::Timeout,
            "gate",
            config.max_attempts + 1,
        );
        assert!(!should_retry);
    }

    #[test]
    fn repeated_similar_failures_quarantine_the_trace_as_poison() {
        let dlq = DeadLetterQueue::new(DlqConfig {
            poison_detection_threshold: 3,
            ..DlqConfig::default()
        });
        for attempt in 1..=3 {
            let _ = dlq.handle_failed_event(
                "ev-1",
                "trace-1",
                CognitiveEventType::MemoryWriteInitiated,
                "boom",
                ErrorKind::Timeout,
                "writer",
                attempt,
            );
        }
        assert!(dlq.is_poison("trace-1"));
        let should_retry = dlq.handle_failed_event(
            "ev-1",
            "trace-1",
            CognitiveEventType::MemoryWriteInitiated,
            "boom again",
            ErrorKind::Timeout,
            "writer",
            4,
        );
        assert!(!should_retry);
    }

    #[test]
    fn mark_retry_success_removes_from_the_retry_queue_and_updates_rate() {
        let dlq = DeadLetterQueue::new(DlqConfig::default());
        let _ = dlq.handle_failed_event(
            "ev-1",
            "trace-1",
            CognitiveEventType::MemoryWriteInitiated,
            "boom",
            ErrorKind::Timeout,
            "writer",
            1,
        );
        assert!(dlq.mark_retry_success("trace-1"));
        assert!(dlq.pending_retries().is_empty());
        assert_eq!(dlq.get_metrics().events_recovered, 1);
        assert_eq!(dlq.get_metrics().retry_success_rate, 1.0);
    }
}
