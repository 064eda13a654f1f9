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

//! Adaptive admission control: a multi-dimensional backpressure level,
//! a per-component circuit breaker, a token-bucket rate limit, and a
//! deterministic priority-weighted throttle, composed into one
//! `should_throttle_event` decision.

pub mod circuit_breaker;
pub mod config;
pub mod level;
pub mod token_bucket;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use sha2::{Digest, Sha256};
use task::{
    labels::TaskLabels,
    TaskManager,
};
use tokio::sync::watch;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use config::BackpressureConfig;
pub use level::{Level, LevelObserver};
pub use token_bucket::TokenBucket;

/// The outcome of one admission check.
#[derive(Debug, Clone)]
pub struct AdmissionDecision {
    /// Whether the event is admitted.
    pub allowed: bool,
    /// The backpressure level in effect when the decision was made.
    pub level: Level,
    /// Why the event was rejected, if it was.
    pub reason: Option<String>,
}

fn priority_factor(priority: u32) -> f64 {
    (priority as f64 / 5.0).min(2.0)
}

/// Draws a uniform value in `[0.0, 1.0)` from `sha256(trace_id || level)`,
/// reading the first 4 bytes as a big-endian `u32`. Deterministic: the
/// same `(trace_id, level)` pair always yields the same draw.
fn deterministic_uniform(trace_id: &str, level: Level) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(trace_id.as_bytes());
    hasher.update(format!("{level:?}").as_bytes());
    let digest = hasher.finalize();
    let bytes: [u8; 4] = [digest[0], digest[1], digest[2], digest[3]];
    let value = u32::from_be_bytes(bytes);
    value as f64 / (u32::MAX as f64 + 1.0)
}

/// Admission control for one logical system: level computation, a
/// per-component circuit breaker map, a token bucket, and deterministic
/// priority-weighted throttling.
pub struct BackpressureController {
    config: BackpressureConfig,
    observer: Mutex<LevelObserver>,
    current_level: Mutex<Level>,
    smoothed_throttle_rate: Mutex<f64>,
    circuit_breakers: Mutex<HashMap<String, CircuitBreaker>>,
    token_bucket: Mutex<TokenBucket>,
}

impl BackpressureController {
    /// Builds a controller with an empty observation window, all circuit
    /// breakers closed, and a full token bucket.
    pub fn new(config: BackpressureConfig) -> Self {
        let window = config.adaptive_window_seconds;
        let token_bucket = TokenBucket::new(config.max_events_per_second, config.burst_capacity);
        Self {
            observer: Mutex::new(LevelObserver::new(window)),
            current_level: Mutex::new(Level::None),
            smoothed_throttle_rate: Mutex::new(1.0),
            circuit_breakers: Mutex::new(HashMap::new()),
            token_bucket: Mutex::new(token_bucket),
            config,
        }
    }

    /// Records one sample of system pressure, recomputing the current
    /// level.
    pub fn observe(&self, queue_depth: u64, p95_latency_ms: f64, cognitive_load: f64) -> Level {
        let level = self.observer.lock().expect("backpressure observer lock poisoned").observe(&self.config, queue_depth, p95_latency_ms, cognitive_load);
        *self.current_level.lock().expect("backpressure level lock poisoned") = level;
        level
    }

    /// The most recently computed level.
    pub fn current_level(&self) -> Level {
        *self.current_level.lock().expect("backpressure level lock poisoned")
    }

    fn breaker_for<'a>(breakers: &'a mut HashMap<String, CircuitBreaker>, config: &BackpressureConfig, component: &str) -> &'a mut CircuitBreaker {
        breakers
            .entry(component.to_string())
            .or_insert_with(|| CircuitBreaker::new(config.failure_threshold, config.recovery_timeout_seconds, config.half_open_test_requests))
    }

    /// Records the outcome of a call to `component`, updating its
    /// circuit breaker.
    pub fn record_component_result(&self, component: &str, success: bool) {
        let mut breakers = self.circuit_breakers.lock().expect("circuit breaker map lock poisoned");
        let breaker = Self::breaker_for(&mut breakers, &self.config, component);
        if success {
            breaker.record_success();
        } else {
            breaker.record_failure();
        }
    }

    /// The circuit state for `component`, `CLOSED` if never seen before.
    pub fn circuit_state(&self, component: &str) -> CircuitState {
        let mut breakers = self.circuit_breakers.lock().expect("circuit breaker map lock poisoned");
        Self::breaker_for(&mut breakers, &self.config, component).state()
    }

    /// Decides whether to admit one event: circuit breaker gate, current
    /// level, token bucket, then deterministic priority-weighted
    /// throttling.
    pub fn should_throttle_event(&self, trace_id: &str, priority: u32, component: &str) -> AdmissionDecision {
        {
            let mut breakers = self.circuit_breakers.lock().expect("circuit breaker map lock poisoned");
            let breaker = Self::breaker_for(&mut breakers, &self.config, component);
            if !breaker.allow() {
                return AdmissionDecision {
                    allowed: false,
                    level: Level::Emergency,
                    reason: Some(format!("circuit breaker open for component {component}")),
                };
            }
        }

        let level = self.current_level();

        if !self.token_bucket.lock().expect("token bucket lock poisoned").try_consume() {
            return AdmissionDecision {
                allowed: false,
                level,
                reason: Some("rate limit exceeded".to_string()),
            };
        }

        let throttle_rate = level.throttle_rate();
        let adjusted_p = (1.0 - throttle_rate) * (1.0 - priority_factor(priority) / 2.0);
        let draw = deterministic_uniform(trace_id, level);
        if draw < adjusted_p {
            return AdmissionDecision {
                allowed: false,
                level,
                reason: Some("deterministic priority-weighted throttle".to_string()),
            };
        }

        AdmissionDecision { allowed: true, level, reason: None }
    }

    /// One background-monitor tick: moves the smoothed throttle rate
    /// toward the current level's target rate by `recovery_factor`,
    /// logging any level transition. Intended to run every 10 seconds.
    pub fn run_monitor_tick(&self) {
        let level = self.current_level();
        let target = level.throttle_rate();
        let mut smoothed = self.smoothed_throttle_rate.lock().expect("smoothed throttle rate lock poisoned");
        let previous = *smoothed;
        *smoothed += (target - *smoothed) * self.config.recovery_factor;
        if (previous - target).abs() > f64::EPSILON {
            tracing::info!(level = ?level, previous_rate = previous, target_rate = target, smoothed_rate = *smoothed, "backpressure level tick");
        }
    }

    /// The smoothed throttle rate maintained by `run_monitor_tick`,
    /// distinct from the discrete, reproducible rate
    /// `should_throttle_event` uses directly.
    pub fn smoothed_throttle_rate(&self) -> f64 {
        *self.smoothed_throttle_rate.lock().expect("smoothed throttle rate lock poisoned")
    }

    /// Spawns the monitor background loop, registering it with
    /// `task_manager`. Exits once `shutdown` observes `true`.
    pub fn start(self: &Arc<Self>, mut task_manager: TaskManager, shutdown: watch::Receiver<bool>) {
        let process_labels = task_manager.process_labels();
        let controller = Arc::clone(self);
        let mut shutdown = shutdown;
        let task_labels = TaskLabels {
            task_cat: "backpressure".into(),
            task_id: "backpressure/monitor".into(),
            task_source: "NA".into(),
        };
        let task_labels_clone = task_labels.clone();
        let handle = tokio::task::spawn(async move {
            let interval = std::time::Duration::from_secs(controller.config.monitor_interval_seconds.max(1));
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        controller.run_monitor_tick();
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
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deterministic_throttle_is_reproducible() {
        let a = deterministic_uniform("trace-1", Level::Critical);
        let b = deterministic_uniform("trace-1", Level::Critical);
        assert_eq!(a, b);
        let c = deterministic_uniform("trace-2", Level::Critical);
        assert_ne!(a, c);
    }

    #[test]
    fn emergency_level_throttles_most_low_priority_traffic() {
        let controller = BackpressureController::new(BackpressureConfig::default());
        let _ = controller.observe(5000, 10.0, 0.1);
        assert_eq!(controller.current_level(), Level::Emergency);

        let mut throttled = 0;
        for i in 0..50 {
            let decision = controller.should_throttle_event(&format!("trace-{i}"), 0, "comp");
            if !decision.allowed {
                throttled += 1;
            }
        }
        assert!(throttled > 25, "expected most low-priority traffic throttled at emergency level, got {throttled}/50");
    }

    #[test]
    fn high_priority_events_are_never_throttled_by_the_deterministic_gate_at_none_level() {
        let controller = BackpressureController::new(BackpressureConfig::default());
        let _ = controller.observe(1, 1.0, 0.01);
        assert_eq!(controller.current_level(), Level::None);
        for i in 0..20 {
            let decision = controller.should_throttle_event(&format!("trace-{i}"), 50, "comp");
            assert!(decision.allowed);
        }
    }

    #[test]
    fn open_circuit_breaker_forces_emergency_rejection() {
        let controller = BackpressureController::new(BackpressureConfig::default());
        for _ in 0..5 {
            controller.record_component_result("flaky", false);
        }
        assert_eq!(controller.circuit_state("flaky"), CircuitState::Open);
        let decision = controller.should_throttle_event("trace-1", 100, "flaky");
        assert!(!decision.allowed);
        assert_eq!(decision.level, Level::Emergency);
    }
}
