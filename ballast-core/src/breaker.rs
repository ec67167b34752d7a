//! Per-server circuit breaker.
//!
//! Each server owns exactly one breaker; breakers never share state, so an
//! unhealthy backend is isolated without serializing traffic to its
//! neighbours. The machine cycles Closed -> Open (threshold reached) ->
//! HalfOpen (reset timeout elapsed) -> Closed (trial success) or back to
//! Open (trial failure), indefinitely.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::CircuitBreakerConfig;

/// The three positions of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; requests flow.
    Closed,
    /// Failing; requests blocked until the reset timeout elapses.
    Open,
    /// Testing the waters; a bounded number of trial requests admitted.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_attempts: u32,
}

/// Failure-isolation state machine owned by exactly one server.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker in the Closed state.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                half_open_attempts: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state, for observation only.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Whether a request may pass right now.
    ///
    /// An Open breaker whose reset timeout has elapsed moves to HalfOpen and
    /// admits the caller as the first trial; HalfOpen admits callers until
    /// its attempt budget is spent.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_attempts = 1;
                    debug!("breaker half-open after reset timeout");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_attempts < self.config.half_open_max_attempts {
                    inner.half_open_attempts += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Note a successful request.
    ///
    /// A HalfOpen trial success fully resets the breaker; while Closed the
    /// failure count drops back to zero. Success while Open is tolerated as
    /// a no-op.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                Self::reset_inner(&mut inner);
                debug!("breaker closed after half-open success");
            }
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    /// Note a failed request.
    ///
    /// A HalfOpen failure trips immediately; while Closed failures count up
    /// to the threshold.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => Self::trip(&mut inner),
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    Self::trip(&mut inner);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Force the breaker Closed and zero all counters.
    pub fn reset(&self) {
        Self::reset_inner(&mut self.lock());
    }

    /// Trip the breaker regardless of state.
    ///
    /// Used by the probe path when consecutive probe failures cross their
    /// own limit, a faster signal than the breaker's request counting.
    pub fn force_open(&self) {
        Self::trip(&mut self.lock());
    }

    fn trip(inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.last_failure = Some(Instant::now());
        inner.failure_count = 0;
        warn!("breaker tripped open");
    }

    fn reset_inner(inner: &mut BreakerInner) {
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.half_open_attempts = 0;
        inner.last_failure = None;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn quick_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_millis(50),
            half_open_max_attempts: 2,
        }
    }

    #[test]
    fn starts_closed_and_allows() {
        let breaker = CircuitBreaker::new(quick_config());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn trips_at_threshold_and_blocks() {
        let breaker = CircuitBreaker::new(quick_config());
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn success_resets_closed_failure_count() {
        let breaker = CircuitBreaker::new(quick_config());
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_after_reset_timeout_with_bounded_attempts() {
        let breaker = CircuitBreaker::new(quick_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(!breaker.allow_request());

        std::thread::sleep(Duration::from_millis(60));
        // First allowed call consumes the transition plus one attempt.
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.allow_request());
        assert!(!breaker.allow_request());
    }

    #[test]
    fn half_open_success_closes_and_is_idempotent() {
        let breaker = CircuitBreaker::new(quick_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.allow_request());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_trips_immediately() {
        let breaker = CircuitBreaker::new(quick_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.allow_request());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn success_while_open_is_a_no_op() {
        let breaker = CircuitBreaker::new(quick_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn force_open_trips_from_closed() {
        let breaker = CircuitBreaker::new(quick_config());
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn reset_restores_closed() {
        let breaker = CircuitBreaker::new(quick_config());
        breaker.force_open();
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_request());
    }
}
