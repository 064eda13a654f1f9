//! Aggregated dead-letter-queue statistics, read by the analytics loop
//! and exposed to callers via `DeadLetterQueue::get_metrics`.

use std::collections::HashMap;

/// Running totals over the lifetime of one `DeadLetterQueue`.
#[derive(Debug, Clone, Default)]
pub struct DlqMetrics {
    /// Every event that has ever failed at least once.
    pub total_failed_events: u64,
    /// Events currently sitting in the permanent-failure or poison set.
    pub events_in_dlq: u64,
    /// Events that were scheduled for at least one retry.
    pub events_retried: u64,
    /// Events that eventually succeeded after one or more retries.
    pub events_recovered: u64,
    /// Events that exhausted their retry budget.
    pub events_permanently_failed: u64,
    /// Failure counts keyed by event type's wire string.
    pub failures_by_type: HashMap<String, u64>,
    /// Failure counts keyed by failure category.
    pub failures_by_category: HashMap<String, u64>,
    /// Failure counts keyed by reporting component.
    pub failures_by_component: HashMap<String, u64>,
    /// Fraction of retried events that eventually recovered.
    pub retry_success_rate: f64,
}

impl DlqMetrics {
    pub(crate) fn record_failure(&mut self, event_type: &str, category: &str, component: &str) {
        self.total_failed_events += 1;
        *self.failures_by_type.entry(event_type.to_string()).or_insert(0) += 1;
        *self.failures_by_category.entry(category.to_string()).or_insert(0) += 1;
        *self.failures_by_component.entry(component.to_string()).or_insert(0) += 1;
    }

    pub(crate) fn recompute_retry_success_rate(&mut self) {
        let denominator = self.events_retried + self.events_recovered;
        self.retry_success_rate = if denominator == 0 { 0.0 } else { self.events_recovered as f64 / denominator as f64 };
    }
}
