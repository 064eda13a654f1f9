//! Configuration recognized by `BackpressureController`.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Thresholds and tunables controlling level computation, the token
/// bucket, and the circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BackpressureConfig {
    /// Queue depth at which pressure is first flagged.
    pub queue_warning: u64,
    /// Queue depth considered critical.
    pub queue_critical: u64,
    /// Queue depth considered an emergency.
    pub queue_emergency: u64,
    /// p95 latency (ms) at which pressure is first flagged.
    pub latency_warning_ms: f64,
    /// p95 latency (ms) considered critical.
    pub latency_critical_ms: f64,
    /// p95 latency (ms) considered an emergency.
    pub latency_emergency_ms: f64,
    /// Cognitive load (0.0-1.0) at which pressure is first flagged.
    #[validate(range(min = 0.0, max = 1.0))]
    pub cognitive_load_warning: f64,
    /// Cognitive load considered critical.
    #[validate(range(min = 0.0, max = 1.0))]
    pub cognitive_load_critical: f64,
    /// Cognitive load considered an emergency.
    #[validate(range(min = 0.0, max = 1.0))]
    pub cognitive_load_emergency: f64,
    /// Sustained admission rate, in events/sec, the token bucket refills
    /// at.
    #[validate(range(min = 0.0))]
    pub max_events_per_second: f64,
    /// Maximum tokens the bucket can accumulate.
    #[validate(range(min = 0.0))]
    pub burst_capacity: f64,
    /// Number of recent samples kept for trend detection.
    #[validate(range(min = 1))]
    pub adaptive_window_seconds: usize,
    /// A recent/older ratio above `1.0 + trend_sensitivity` is "trending
    /// worse".
    #[validate(range(min = 0.0))]
    pub trend_sensitivity: f64,
    /// Fraction by which the smoothed throttle rate moves toward the
    /// level's target rate on each monitor tick.
    #[validate(range(min = 0.0, max = 1.0))]
    pub recovery_factor: f64,
    /// Consecutive failures before a circuit breaker opens.
    #[validate(range(min = 1))]
    pub failure_threshold: u32,
    /// Seconds an open circuit breaker waits before probing again.
    #[validate(range(min = 0.0))]
    pub recovery_timeout_seconds: f64,
    /// Successful probes required to close a half-open breaker.
    #[validate(range(min = 1))]
    pub half_open_test_requests: u32,
    /// How often the background monitor loop ticks, in seconds.
    #[validate(range(min = 1))]
    pub monitor_interval_seconds: u64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            queue_warning: 100,
            queue_critical: 500,
            queue_emergency: 1000,
            latency_warning_ms: 1000.0,
            latency_critical_ms: 3000.0,
            latency_emergency_ms: 5000.0,
            cognitive_load_warning: 0.7,
            cognitive_load_critical: 0.85,
            cognitive_load_emergency: 0.95,
            max_events_per_second: 1000.0,
            burst_capacity: 2000.0,
            adaptive_window_seconds: 20,
            trend_sensitivity: 0.1,
            recovery_factor: 0.2,
            failure_threshold: 5,
            recovery_timeout_seconds: 60.0,
            half_open_test_requests: 3,
            monitor_interval_seconds: 10,
        }
    }
}
