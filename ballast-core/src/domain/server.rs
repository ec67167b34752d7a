//! Backend server model: capacity, health, and latency tracking.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::config::{CircuitBreakerConfig, ServerConfig};

/// Floor for the adaptive outbound timeout.
const MIN_TIMEOUT: Duration = Duration::from_millis(500);

/// One backend instance tracked by the balancer.
///
/// Hot-path counters are atomics; the health and response-time averages are
/// f64 bits behind CAS loops so readers never take a lock. The breaker is
/// the single source of truth for "healthy": a server is healthy iff its
/// breaker is Closed or HalfOpen.
#[derive(Debug)]
pub struct Server {
    /// Socket address of the backend; its immutable identity in the pool.
    pub addr: SocketAddr,
    breaker: CircuitBreaker,
    /// Health score in [0, 100], stored as f64 bits.
    health: AtomicU64,
    /// EWMA of response times in milliseconds, stored as f64 bits.
    avg_response_ms: AtomicU64,
    active_connections: AtomicU32,
    max_concurrent: u32,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    consecutive_probe_failures: AtomicU32,
    drain: AtomicBool,
    ewma_alpha: f64,
    probe_failure_limit: u32,
    health_restore: f64,
}

/// A thread-safe reference to a Server.
pub type SharedServer = Arc<Server>;

impl Server {
    /// Create a server at full health with the given configuration.
    pub fn new(addr: SocketAddr, config: &ServerConfig, breaker: CircuitBreakerConfig) -> Self {
        let max_concurrent =
            (f64::from(config.total_connection_budget) * config.max_capacity_percent) as u32;
        Self {
            addr,
            breaker: CircuitBreaker::new(breaker),
            health: AtomicU64::new(100.0_f64.to_bits()),
            avg_response_ms: AtomicU64::new(config.initial_avg_response_ms.to_bits()),
            active_connections: AtomicU32::new(0),
            max_concurrent: max_concurrent.max(1),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            consecutive_probe_failures: AtomicU32::new(0),
            drain: AtomicBool::new(false),
            ewma_alpha: config.ewma_alpha,
            probe_failure_limit: config.probe_failure_limit,
            health_restore: config.health_restore,
        }
    }

    /// Current health score in [0, 100].
    pub fn health(&self) -> f64 {
        f64::from_bits(self.health.load(Ordering::Relaxed))
    }

    /// Smoothed response time in milliseconds.
    pub fn avg_response_ms(&self) -> f64 {
        f64::from_bits(self.avg_response_ms.load(Ordering::Relaxed))
    }

    /// In-flight request count.
    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Connection ceiling derived from the configured budget.
    pub fn max_concurrent(&self) -> u32 {
        self.max_concurrent
    }

    /// Requests dispatched to this server so far.
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Requests that came back failed.
    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    /// Fraction of the connection ceiling currently in use.
    pub fn load(&self) -> f64 {
        f64::from(self.active_connections()) / f64::from(self.max_concurrent)
    }

    /// Derived health: true iff the breaker is Closed or HalfOpen.
    pub fn is_healthy(&self) -> bool {
        matches!(
            self.breaker.state(),
            CircuitState::Closed | CircuitState::HalfOpen
        )
    }

    /// Breaker state, for observation and scaling decisions.
    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Whether the server has been put into drain mode.
    pub fn is_draining(&self) -> bool {
        self.drain.load(Ordering::Acquire)
    }

    /// Whether `n` more requests fit right now.
    ///
    /// Consults the breaker last: a HalfOpen breaker spends one trial
    /// admission per positive answer, and a capacity-blocked server should
    /// not burn those.
    pub fn can_handle(&self, n: u32) -> bool {
        if self.is_draining() {
            return false;
        }
        if self.active_connections() + n > self.max_concurrent {
            return false;
        }
        self.breaker.allow_request()
    }

    /// Count one in-flight request for the lifetime of the returned guard.
    pub fn begin_request(&self) -> ConnectionGuard<'_> {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
        ConnectionGuard { server: self }
    }

    /// Fold one request outcome into the latency average, the running
    /// totals, and the breaker.
    pub fn record_outcome(&self, success: bool, response_time_ms: f64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        let alpha = self.ewma_alpha;
        Self::update_f64(&self.avg_response_ms, |avg| {
            (1.0 - alpha) * avg + alpha * response_time_ms
        });

        if success {
            self.breaker.record_success();
        } else {
            self.breaker.record_failure();
        }
    }

    /// Fold one probe outcome into health state and the breaker.
    ///
    /// Consecutive probe failures carry their own limit: crossing it forces
    /// the breaker Open regardless of how many request failures the breaker
    /// itself has counted.
    pub fn update_health_from_probe(&self, healthy: bool) {
        if healthy {
            let restore = self.health_restore;
            Self::update_f64(&self.health, |h| (h + restore).min(100.0));
            self.consecutive_probe_failures.store(0, Ordering::Relaxed);
            self.breaker.record_success();
        } else {
            let misses = self.consecutive_probe_failures.fetch_add(1, Ordering::Relaxed) + 1;
            self.breaker.record_failure();
            if misses >= self.probe_failure_limit {
                warn!(server = %self.addr, misses, "probe failure limit reached, forcing breaker open");
                self.breaker.force_open();
            }
        }
    }

    /// Stop accepting new work; existing connections finish naturally.
    ///
    /// Returns false if the server was already draining.
    pub fn enable_drain_mode(&self) -> bool {
        if self.drain.swap(true, Ordering::AcqRel) {
            return false;
        }
        Self::update_f64(&self.health, |_| 0.0);
        self.breaker.record_failure();
        info!(server = %self.addr, "drain mode enabled");
        true
    }

    /// Reduce health by `amount`, saturating at zero.
    ///
    /// Driven by a background tick so a server nobody probes anymore decays
    /// into a removal candidate on its own.
    pub fn decay_health(&self, amount: f64) {
        Self::update_f64(&self.health, |h| (h - amount).max(0.0));
    }

    /// Timeout for any outbound call to this server: `max(500ms, 2 x avg)`.
    pub fn adaptive_timeout(&self) -> Duration {
        let doubled = Duration::from_millis((self.avg_response_ms() * 2.0) as u64);
        doubled.max(MIN_TIMEOUT)
    }

    // Lock-free read-modify-write on an f64 stored as bits.
    fn update_f64(cell: &AtomicU64, f: impl Fn(f64) -> f64) {
        let mut current = cell.load(Ordering::Acquire);
        loop {
            let next = f(f64::from_bits(current)).to_bits();
            match cell.compare_exchange_weak(current, next, Ordering::Release, Ordering::Relaxed) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }
}

/// RAII guard counting one in-flight request; decrements on drop whether
/// the dispatch succeeded or not.
pub struct ConnectionGuard<'a> {
    server: &'a Server,
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.server.active_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_server() -> Server {
        let config = ServerConfig {
            total_connection_budget: 10,
            max_capacity_percent: 0.5,
            ..ServerConfig::default()
        };
        Server::new(
            "127.0.0.1:9000".parse().unwrap(),
            &config,
            CircuitBreakerConfig::default(),
        )
    }

    #[test]
    fn capacity_ceiling_derived_from_budget() {
        let server = test_server();
        assert_eq!(server.max_concurrent(), 5);
    }

    #[test]
    fn connection_guard_counts_in_flight() {
        let server = test_server();
        {
            let _a = server.begin_request();
            let _b = server.begin_request();
            assert_eq!(server.active_connections(), 2);
        }
        assert_eq!(server.active_connections(), 0);
    }

    #[test]
    fn capacity_gate_blocks_at_ceiling() {
        let server = test_server();
        let _guards: Vec<_> = (0..5).map(|_| server.begin_request()).collect();
        assert!(!server.can_handle(1));
    }

    #[test]
    fn ewma_smooths_samples() {
        let server = test_server();
        // Seed 50, alpha 0.2: one 100ms sample moves the average to 60.
        server.record_outcome(true, 100.0);
        assert!((server.avg_response_ms() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn failure_outcomes_feed_the_breaker() {
        let server = test_server();
        for _ in 0..5 {
            server.record_outcome(false, 0.0);
        }
        assert!(!server.is_healthy());
        assert!(!server.can_handle(1));
    }

    #[test]
    fn probe_failures_force_open_before_breaker_threshold() {
        let server = test_server();
        // Default probe limit is 3, below the breaker threshold of 5.
        for _ in 0..3 {
            server.update_health_from_probe(false);
        }
        assert_eq!(server.breaker_state(), CircuitState::Open);
    }

    #[test]
    fn successful_probe_restores_health() {
        let server = test_server();
        server.decay_health(40.0);
        server.update_health_from_probe(true);
        assert!((server.health() - 70.0).abs() < 1e-9);
        // Restoration caps at 100.
        for _ in 0..10 {
            server.update_health_from_probe(true);
        }
        assert!((server.health() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn decay_saturates_at_zero() {
        let server = test_server();
        server.decay_health(250.0);
        assert_eq!(server.health(), 0.0);
    }

    #[test]
    fn drain_mode_zeroes_health_and_refuses_work() {
        let server = test_server();
        assert!(server.enable_drain_mode());
        assert!(!server.enable_drain_mode());
        assert_eq!(server.health(), 0.0);
        assert!(!server.can_handle(1));
    }

    #[test]
    fn adaptive_timeout_has_a_floor() {
        let server = test_server();
        // Seeded average of 50ms doubles to 100ms, below the 500ms floor.
        assert_eq!(server.adaptive_timeout(), Duration::from_millis(500));
        for _ in 0..50 {
            server.record_outcome(true, 400.0);
        }
        assert!(server.adaptive_timeout() > Duration::from_millis(500));
    }
}
