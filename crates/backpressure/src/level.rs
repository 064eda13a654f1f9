//! Backpressure level computation: a rolling-window observer over queue
//! depth, p95 latency, and cognitive load, with trend detection used to
//! distinguish a one-off spike from sustained deterioration.

use std::collections::VecDeque;

use crate::config::BackpressureConfig;

const QUEUE_TREND_SAMPLES: usize = 3;
const COGNITIVE_LOAD_TREND_SAMPLES: usize = 3;
const LATENCY_TREND_SAMPLES: usize = 5;

/// The backpressure level, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// No pressure; admit everything.
    None,
    /// Early warning; admit almost everything.
    Low,
    /// Sustained warning-level pressure with a stable trend.
    Medium,
    /// Warning-level pressure that is actively getting worse.
    High,
    /// Critical-level pressure.
    Critical,
    /// Emergency-level pressure; admit almost nothing.
    Emergency,
}

impl Level {
    /// The fraction of otherwise-admissible events let through at this
    /// level.
    pub fn throttle_rate(self) -> f64 {
        match self {
            Level::None => 1.0,
            Level::Low => 0.9,
            Level::Medium => 0.7,
            Level::High => 0.5,
            Level::Critical => 0.25,
            Level::Emergency => 0.1,
        }
    }
}

fn is_trending_worse(window: &VecDeque<f64>, recent_samples: usize, trend_sensitivity: f64) -> bool {
    if window.len() <= recent_samples {
        return false;
    }
    let split = window.len() - recent_samples;
    let older: f64 = window.iter().take(split).sum::<f64>() / split as f64;
    let recent: f64 = window.iter().skip(split).sum::<f64>() / recent_samples as f64;
    if older <= 0.0 {
        return recent > 0.0;
    }
    recent > older * (1.0 + trend_sensitivity)
}

/// Bounded rolling windows of the three pressure dimensions, and the
/// level computation over them.
pub struct LevelObserver {
    capacity: usize,
    queue_depth: VecDeque<f64>,
    latency_ms: VecDeque<f64>,
    cognitive_load: VecDeque<f64>,
}

impl LevelObserver {
    /// Creates an observer with an empty rolling window of `capacity`
    /// samples per dimension.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queue_depth: VecDeque::with_capacity(capacity),
            latency_ms: VecDeque::with_capacity(capacity),
            cognitive_load: VecDeque::with_capacity(capacity),
        }
    }

    fn push(window: &mut VecDeque<f64>, capacity: usize, value: f64) {
        if window.len() == capacity {
            let _ = window.pop_front();
        }
        window.push_back(value);
    }

    /// Records one sample of each dimension and returns the resulting
    /// level.
    pub fn observe(&mut self, config: &BackpressureConfig, queue_depth: u64, p95_latency_ms: f64, cognitive_load: f64) -> Level {
        Self::push(&mut self.queue_depth, self.capacity, queue_depth as f64);
        Self::push(&mut self.latency_ms, self.capacity, p95_latency_ms);
        Self::push(&mut self.cognitive_load, self.capacity, cognitive_load);

        if queue_depth >= config.queue_emergency || p95_latency_ms >= config.latency_emergency_ms || cognitive_load >= config.cognitive_load_emergency {
            return Level::Emergency;
        }
        if queue_depth >= config.queue_critical || p95_latency_ms >= config.latency_critical_ms || cognitive_load >= config.cognitive_load_critical {
            return Level::Critical;
        }

        let warning_breach = queue_depth >= config.queue_warning || p95_latency_ms >= config.latency_warning_ms || cognitive_load >= config.cognitive_load_warning;
        if warning_breach {
            let trending_worse = is_trending_worse(&self.queue_depth, QUEUE_TREND_SAMPLES, config.trend_sensitivity)
                || is_trending_worse(&self.latency_ms, LATENCY_TREND_SAMPLES, config.trend_sensitivity)
                || is_trending_worse(&self.cognitive_load, COGNITIVE_LOAD_TREND_SAMPLES, config.trend_sensitivity);
            return if trending_worse { Level::High } else { Level::Medium };
        }

        let queue_growth = if self.queue_depth.len() > QUEUE_TREND_SAMPLES {
            let split = self.queue_depth.len() - QUEUE_TREND_SAMPLES;
            let older: f64 = self.queue_depth.iter().take(split).sum::<f64>() / split as f64;
            let recent: f64 = self.queue_depth.iter().skip(split).sum::<f64>() / QUEUE_TREND_SAMPLES as f64;
            recent - older
        } else {
            0.0
        };
        let early_warning = (queue_depth as f64) >= 0.7 * config.queue_warning as f64
            || queue_growth > 10.0
            || cognitive_load >= 0.8 * config.cognitive_load_warning;
        if early_warning {
            return Level::Low;
        }

        Level::None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn config() -> BackpressureConfig {
        BackpressureConfig {
            queue_warning: 100,
            queue_critical: 500,
            queue_emergency: 1000,
            cognitive_load_warning: 0.7,
            ..BackpressureConfig::default()
        }
    }

    #[test]
    fn level_transitions_follow_the_named_scenario() {
        let config = config();
        let mut observer = LevelObserver::new(20);

        assert_eq!(observer.observe(&config, 50, 10.0, 0.1), Level::None);
        let after_120 = observer.observe(&config, 120, 10.0, 0.1);
        assert!(matches!(after_120, Level::Medium | Level::High));
        assert_eq!(observer.observe(&config, 200, 10.0, 0.1), Level::High);
        assert_eq!(observer.observe(&config, 600, 10.0, 0.1), Level::Critical);
        assert_eq!(observer.observe(&config, 1100, 10.0, 0.1), Level::Emergency);
    }

    #[test]
    fn insufficient_history_is_never_trending_worse() {
        let window: VecDeque<f64> = [100.0, 110.0].into_iter().collect();
        assert!(!is_trending_worse(&window, 3, 0.1));
    }

    #[test]
    fn throttle_rates_match_the_level_table() {
        assert_eq!(Level::None.throttle_rate(), 1.0);
        assert_eq!(Level::Low.throttle_rate(), 0.9);
        assert_eq!(Level::Medium.throttle_rate(), 0.7);
        assert_eq!(Level::High.throttle_rate(), 0.5);
        assert_eq!(Level::Critical.throttle_rate(), 0.25);
        assert_eq!(Level::Emergency.throttle_rate(), 0.1);
    }
}
