//! Per-component circuit breaker gating admission ahead of the
//! backpressure level computation.

use std::time::Instant;

/// The circuit breaker's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests are allowed; failures accumulate toward `failure_threshold`.
    Closed,
    /// Requests are rejected until `recovery_timeout_seconds` has elapsed.
    Open,
    /// A bounded number of probe requests are allowed through to decide
    /// whether to close or reopen.
    HalfOpen,
}

/// One component's circuit breaker.
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    failure_threshold: u32,
    recovery_timeout_seconds: f64,
    half_open_test_requests: u32,
    half_open_successes: u32,
    half_open_probes_issued: u32,
    last_failure_at: Option<Instant>,
}

impl CircuitBreaker {
    /// Creates a new breaker in the `CLOSED` state.
    pub fn new(failure_threshold: u32, recovery_timeout_seconds: f64, half_open_test_requests: u32) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            failure_threshold,
            recovery_timeout_seconds,
            half_open_test_requests,
            half_open_successes: 0,
            half_open_probes_issued: 0,
            last_failure_at: None,
        }
    }

    /// The current state, after transitioning `OPEN` to `HALF_OPEN` if
    /// the recovery timeout has elapsed.
    pub fn state(&mut self) -> CircuitState {
        if self.state == CircuitState::Open {
            if let Some(last_failure) = self.last_failure_at {
                if last_failure.elapsed().as_secs_f64() >= self.recovery_timeout_seconds {
                    self.state = CircuitState::HalfOpen;
                    self.half_open_successes = 0;
                    self.half_open_probes_issued = 0;
                }
            }
        }
        self.state
    }

    /// Whether a request may proceed right now. In `HALF_OPEN`, allows at
    /// most `half_open_test_requests` probes before rejecting further
    /// ones until a verdict is reached.
    pub fn allow(&mut self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if self.half_open_probes_issued < self.half_open_test_requests {
                    self.half_open_probes_issued += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= self.half_open_test_requests {
                    self.state = CircuitState::Closed;
                    self.consecutive_failures = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Records a failed call, opening the breaker if warranted.
    pub fn record_failure(&mut self) {
        self.last_failure_at = Some(Instant::now());
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.failure_threshold {
                    self.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.half_open_successes = 0;
                self.half_open_probes_issued = 0;
            }
            CircuitState::Open => {}
        }
    }
}
