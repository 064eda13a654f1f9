//! Continuous-refill token bucket used for the sustained
//! events-per-second rate limit ahead of priority-weighted throttling.

use std::time::Instant;

/// A token bucket that refills continuously rather than in discrete
/// ticks, so the elapsed-time-since-last-check determines how many
/// tokens have accrued.
pub struct TokenBucket {
    tokens: f64,
    max_events_per_second: f64,
    burst_capacity: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(max_events_per_second: f64, burst_capacity: f64) -> Self {
        Self {
            tokens: burst_capacity,
            max_events_per_second,
            burst_capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.max_events_per_second).min(self.burst_capacity);
        self.last_refill = Instant::now();
    }

    /// Attempts to consume one token. A request is admitted only when at
    /// least 1.0 token is available; partial tokens are never consumed.
    pub fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn burst_capacity_bounds_accrual() {
        let mut bucket = TokenBucket::new(1.0, 3.0);
        for _ in 0..3 {
            assert!(bucket.try_consume());
        }
        assert!(!bucket.try_consume());
    }

    #[test]
    fn tokens_refill_over_time() {
        let mut bucket = TokenBucket::new(1000.0, 1.0);
        assert!(bucket.try_consume());
        assert!(!bucket.try_consume());
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(bucket.try_consume());
    }
}
