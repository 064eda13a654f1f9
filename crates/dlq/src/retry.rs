//! Retry policy: per-event-type configuration and the delay formulas for
//! each strategy.

use rand::Rng;
use serde::{Deserialize, Serialize};
use types::CognitiveEventType;
use validator::Validate;

use crate::classify::FailureCategory;

/// How a failed event's retry delay is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Retry with no delay.
    Immediate,
    /// Delay grows linearly with the attempt number.
    Linear,
    /// Delay grows exponentially with the attempt number.
    Exponential,
    /// Delay depends on the failure category and recent retry success
    /// rate.
    Adaptive,
    /// Retries are gated by an external circuit breaker rather than a
    /// fixed delay.
    CircuitBreaker,
    /// The event is never retried.
    NoRetry,
}

/// Per-event-type retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RetryConfig {
    /// The delay formula to apply.
    pub strategy: RetryStrategy,
    /// Attempts allowed before the event is given up on.
    #[validate(range(min = 1))]
    pub max_attempts: u32,
    /// The base delay, in seconds, the formula scales from.
    #[validate(range(min = 0.0))]
    pub initial_delay_seconds: f64,
    /// An upper bound on the computed delay, in seconds.
    #[validate(range(min = 0.0))]
    pub max_delay_seconds: f64,
    /// The multiplier `EXPONENTIAL` raises to `attempt - 1`.
    #[validate(range(min = 0.0))]
    pub backoff_multiplier: f64,
    /// The fraction of the computed delay applied as uniform jitter in
    /// both directions.
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            max_attempts: 3,
            initial_delay_seconds: 1.0,
            max_delay_seconds: 300.0,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// The default retry policy for `event_type`, falling back to the
/// registry default (exponential, max 3 attempts, 1s initial delay) for
/// every type not explicitly listed.
pub fn default_retry_config(event_type: CognitiveEventType) -> RetryConfig {
    match event_type {
        CognitiveEventType::MemoryWriteInitiated => RetryConfig {
            strategy: RetryStrategy::Exponential,
            max_attempts: 5,
            initial_delay_seconds: 1.0,
            ..RetryConfig::default()
        },
        CognitiveEventType::RecallContextRequested => RetryConfig {
            strategy: RetryStrategy::Adaptive,
            max_attempts: 3,
            initial_delay_seconds: 2.0,
            ..RetryConfig::default()
        },
        CognitiveEventType::AttentionGateAdmit => RetryConfig {
            strategy: RetryStrategy::Linear,
            max_attempts: 2,
            initial_delay_seconds: 0.5,
            ..RetryConfig::default()
        },
        CognitiveEventType::LearningOutcomeReceived => RetryConfig {
            strategy: RetryStrategy::Exponential,
            max_attempts: 7,
            initial_delay_seconds: 0.5,
            ..RetryConfig::default()
        },
        _ => RetryConfig::default(),
    }
}

/// Computes the delay before the next retry attempt, applying jitter and
/// clamping to `max_delay_seconds`.
pub fn calculate_retry_delay(config: &RetryConfig, attempt: u32, category: FailureCategory, retry_success_rate: f64) -> f64 {
    let base = match config.strategy {
        RetryStrategy::Immediate => 0.0,
        RetryStrategy::Linear => config.initial_delay_seconds * attempt as f64,
        RetryStrategy::Exponential => config.initial_delay_seconds * config.backoff_multiplier.powi(attempt as i32 - 1),
        RetryStrategy::Adaptive => {
            let mut delay = match category {
                FailureCategory::Transient => config.initial_delay_seconds * 0.5,
                FailureCategory::Resource => config.initial_delay_seconds * 2.0,
                _ => config.initial_delay_seconds,
            };
            if retry_success_rate < 0.5 {
                delay *= 2.0;
            }
            delay
        }
        RetryStrategy::CircuitBreaker | RetryStrategy::NoRetry => config.initial_delay_seconds,
    };

    let jitter_range = base * config.jitter_factor;
    let jitter = if jitter_range > 0.0 { rand::thread_rng().gen_range(-jitter_range..=jitter_range) } else { 0.0 };
    let delay = (base + jitter).min(config.max_delay_seconds);
    delay.max(0.0)
}

/// Whether an event should be scheduled for another retry: attempts
/// remain, the strategy permits it, the trace is not poison, and the
/// failure category is not one that's never retried.
pub fn should_retry_event(total_attempts: u32, config: &RetryConfig, is_poison: bool, category: FailureCategory) -> bool {
    if total_attempts >= config.max_attempts {
        return false;
    }
    if config.strategy == RetryStrategy::NoRetry {
        return false;
    }
    if is_poison {
        return false;
    }
    !matches!(category, FailureCategory::Validation | FailureCategory::Poison)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exponential_backoff_matches_the_named_scenario() {
        let config = default_retry_config(CognitiveEventType::MemoryWriteInitiated);
        assert_eq!(config.strategy, RetryStrategy::Exponential);
        assert_eq!(config.max_attempts, 5);

        let expected = [1.0, 2.0, 4.0, 8.0, 16.0];
        for (attempt, expected_delay) in (1..=5u32).zip(expected) {
            let delay = calculate_retry_delay(&config, attempt, FailureCategory::Transient, 1.0);
            let tolerance = expected_delay * 0.1;
            assert!(
                (delay - expected_delay).abs() <= tolerance,
                "attempt {attempt}: expected ~{expected_delay}, got {delay}"
            );
        }
    }

    #[test]
    fn max_attempts_rejects_further_retries() {
        let config = default_retry_config(CognitiveEventType::MemoryWriteInitiated);
        assert!(!should_retry_event(5, &config, false, FailureCategory::Transient));
        assert!(should_retry_event(4, &config, false, FailureCategory::Transient));
    }

    #[test]
    fn validation_and_poison_categories_are_never_retried() {
        let config = RetryConfig::default();
        assert!(!should_retry_event(0, &config, false, FailureCategory::Validation));
        assert!(!should_retry_event(0, &config, false, FailureCategory::Poison));
        assert!(!should_retry_event(0, &config, true, FailureCategory::Transient));
    }

    #[test]
    fn adaptive_doubles_resource_delay_and_doubles_again_on_low_success_rate() {
        let config = RetryConfig {
            strategy: RetryStrategy::Adaptive,
            jitter_factor: 0.0,
            ..RetryConfig::default()
        };
        let delay = calculate_retry_delay(&config, 1, FailureCategory::Resource, 0.9);
        assert_eq!(delay, 2.0);
        let delay_low_success = calculate_retry_delay(&config, 1, FailureCategory::Resource, 0.1);
        assert_eq!(delay_low_success, 4.0);
    }

    #[test]
    fn delay_is_clamped_to_max_delay_seconds() {
        let config = RetryConfig {
            strategy: RetryStrategy::Exponential,
            max_attempts: 20,
            initial_delay_seconds: 1.0,
            backoff_multiplier: 2.0,
            max_delay_seconds: 10.0,
            jitter_factor: 0.0,
        };
        let delay = calculate_retry_delay(&config, 10, FailureCategory::Transient, 1.0);
        assert_eq!(delay, 10.0);
    }
}
