//! Circuit breaker gating outbound calls to the external chunker/embedder
//! (C9). Three states exactly as spec §4.9 describes: Closed, Open,
//! Half-open, with geometric backoff while Open.

use codeintel_config::CircuitBreakerConfig;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: State,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    backoff_exponent: i32,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: State::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            backoff_exponent: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Call before issuing an outbound request. Transitions Open ->
    /// Half-open once `recovery_timeout` has elapsed, allowing one probe
    /// request through; otherwise Open keeps skipping requests entirely
    /// and the backoff exponent grows by one more step.
    pub fn allow_request(&mut self) -> bool {
        match self.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let elapsed = self.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= Duration::from_secs(self.config.recovery_timeout) {
                    self.state = State::HalfOpen;
                    self.consecutive_successes = 0;
                    true
                } else {
                    self.backoff_exponent = self.backoff_exponent.saturating_add(1);
                    false
                }
            }
        }
    }

    pub fn on_success(&mut self) {
        match self.state {
            State::Closed => self.consecutive_failures = 0,
            State::HalfOpen => {
                self.consecutive_successes += 1;
                if self.consecutive_successes >= self.config.success_threshold {
                    self.close();
                }
            }
            State::Open => {}
        }
    }

    pub fn on_failure(&mut self) {
        match self.state {
            State::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.trip();
                }
            }
            State::HalfOpen => self.trip(),
            State::Open => {}
        }
    }

    fn trip(&mut self) {
        self.state = State::Open;
        self.opened_at = Some(Instant::now());
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
    }

    fn close(&mut self) {
        self.state = State::Closed;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.backoff_exponent = 0;
        self.opened_at = None;
    }

    /// `initial_backoff * multiplier^n` capped at `max_backoff`.
    #[must_use]
    pub fn current_backoff(&self) -> Duration {
        let raw = self.config.initial_backoff as f64
            * self.config.backoff_multiplier.powi(self.backoff_exponent);
        Duration::from_secs_f64(raw.min(self.config.max_backoff as f64))
    }

    /// `max(poll_interval, current_backoff)` while Open, `poll_interval`
    /// otherwise (spec §4.9 point 1).
    #[must_use]
    pub fn effective_poll_interval(&self, poll_interval: Duration) -> Duration {
        if self.state == State::Open {
            poll_interval.max(self.current_backoff())
        } else {
            poll_interval
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: 0,
            success_threshold: 2,
            initial_backoff: 5,
            max_backoff: 300,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn trips_after_consecutive_failure_threshold() {
        let mut cb = CircuitBreaker::new(config());
        assert!(cb.allow_request());
        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.state(), State::Closed);
        cb.on_failure();
        assert_eq!(cb.state(), State::Open);
    }

    #[test]
    fn open_skips_requests_until_recovery_timeout_elapses() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig {
            recovery_timeout: 0,
            ..config()
        });
        for _ in 0..3 {
            cb.on_failure();
        }
        assert_eq!(cb.state(), State::Open);
        // recovery_timeout=0 means the very next allow_request probes it.
        assert!(cb.allow_request());
        assert_eq!(cb.state(), State::HalfOpen);
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let mut cb = CircuitBreaker::new(config());
        for _ in 0..3 {
            cb.on_failure();
        }
        cb.allow_request();
        assert_eq!(cb.state(), State::HalfOpen);
        cb.on_success();
        assert_eq!(cb.state(), State::HalfOpen);
        cb.on_success();
        assert_eq!(cb.state(), State::Closed);
    }

    #[test]
    fn half_open_failure_returns_to_open() {
        let mut cb = CircuitBreaker::new(config());
        for _ in 0..3 {
            cb.on_failure();
        }
        cb.allow_request();
        assert_eq!(cb.state(), State::HalfOpen);
        cb.on_failure();
        assert_eq!(cb.state(), State::Open);
    }

    #[test]
    fn backoff_grows_geometrically_and_caps_at_max() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig {
            recovery_timeout: 10_000,
            ..config()
        });
        for _ in 0..3 {
            cb.on_failure();
        }
        assert_eq!(cb.current_backoff(), Duration::from_secs(5));
        assert!(!cb.allow_request());
        assert_eq!(cb.current_backoff(), Duration::from_secs(10));
        for _ in 0..10 {
            cb.allow_request();
        }
        assert_eq!(cb.current_backoff(), Duration::from_secs(300));
    }
}
