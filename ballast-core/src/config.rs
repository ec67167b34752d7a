//! Configuration surface.
//!
//! Every knob has a default; `BalancerConfig::validate` rejects inconsistent
//! settings eagerly so nothing starts on top of a broken configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tuning for one server's circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures tolerated while Closed before the breaker trips.
    pub failure_threshold: u32,
    /// How long an Open breaker blocks before probing via HalfOpen.
    pub reset_timeout: Duration,
    /// Trial requests admitted per HalfOpen episode.
    pub half_open_max_attempts: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_attempts: 3,
        }
    }
}

/// Capacity and latency-tracking settings shared by all servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Total concurrent-connection budget across the pool's sizing math.
    pub total_connection_budget: u32,
    /// Fraction of the budget a single server may hold, in `(0, 1]`.
    pub max_capacity_percent: f64,
    /// EWMA smoothing factor for response-time samples, in `(0, 1]`.
    pub ewma_alpha: f64,
    /// Seed for the response-time average before any sample arrives.
    pub initial_avg_response_ms: f64,
    /// Consecutive probe failures that force the breaker Open.
    pub probe_failure_limit: u32,
    /// Health restored by one successful probe (capped at 100).
    pub health_restore: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            total_connection_budget: 1000,
            max_capacity_percent: 0.8,
            ewma_alpha: 0.2,
            initial_avg_response_ms: 50.0,
            probe_failure_limit: 3,
            health_restore: 10.0,
        }
    }
}

/// Autoscaler thresholds and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoScalerConfig {
    /// Pool floor; `initialize` brings up exactly this many servers.
    pub min_servers: usize,
    /// Pool ceiling; no signal scales past it.
    pub max_servers: usize,
    /// Requests in the trailing window above which the pool grows.
    pub scale_up_request_threshold: u64,
    /// Requests in the trailing window below which the pool may shrink.
    pub scale_down_request_threshold: u64,
    /// Cadence of the monitor cycle.
    pub check_interval: Duration,
    /// Width of the trailing request-count window.
    pub trailing_window: Duration,
    /// Age past which window buckets are purged.
    pub retention: Duration,
    /// Per-server load fraction that triggers an immediate scale-up.
    pub load_scale_up_threshold: f64,
    /// Average load fraction the pool must stay under to shrink.
    pub load_scale_down_threshold: f64,
    /// How long the average load must stay low before shrinking.
    pub scale_down_stabilization: Duration,
}

impl Default for AutoScalerConfig {
    fn default() -> Self {
        Self {
            min_servers: 2,
            max_servers: 10,
            scale_up_request_threshold: 100,
            scale_down_request_threshold: 20,
            check_interval: Duration::from_secs(30),
            trailing_window: Duration::from_secs(30),
            retention: Duration::from_secs(300),
            load_scale_up_threshold: 0.9,
            load_scale_down_threshold: 0.3,
            scale_down_stabilization: Duration::from_secs(60),
        }
    }
}

/// Retry-cache replay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Entries attempted per ordinary replay pass.
    pub max_batch: usize,
    /// Failed replays tolerated within one pass before it stops early.
    pub max_retries_per_pass: usize,
    /// Cadence of the periodic replay pass.
    pub replay_interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_batch: 25,
            max_retries_per_pass: 3,
            replay_interval: Duration::from_secs(5),
        }
    }
}

/// Probe cadence and health decay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Cadence of the health-check fan-out.
    pub probe_interval: Duration,
    /// Health subtracted from every server each decay tick.
    pub decay_amount: f64,
    /// Cadence of the decay tick.
    pub decay_interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(15),
            decay_amount: 5.0,
            decay_interval: Duration::from_secs(10),
        }
    }
}

/// Port range the allocator hands backend ports out of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortRangeConfig {
    /// First port considered.
    pub start: u16,
    /// Last port considered.
    pub end: u16,
}

impl Default for PortRangeConfig {
    fn default() -> Self {
        Self { start: 5001, end: 65535 }
    }
}

/// The full configuration of one balancer instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// Circuit-breaker tuning applied to every spawned server.
    pub breaker: CircuitBreakerConfig,
    /// Per-server capacity and latency settings.
    pub server: ServerConfig,
    /// Autoscaler thresholds and timing.
    pub scaler: AutoScalerConfig,
    /// Retry-cache replay settings.
    pub retry: RetryConfig,
    /// Probe cadence and health decay.
    pub health: HealthConfig,
    /// Backend port range.
    pub ports: PortRangeConfig,
}

impl BalancerConfig {
    /// Reject inconsistent settings before anything is constructed from them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scaler.max_servers < self.scaler.min_servers {
            return Err(ConfigError::ServerBounds {
                min: self.scaler.min_servers,
                max: self.scaler.max_servers,
            });
        }
        if self.scaler.scale_down_request_threshold >= self.scaler.scale_up_request_threshold {
            return Err(ConfigError::ScaleThresholds {
                down: self.scaler.scale_down_request_threshold,
                up: self.scaler.scale_up_request_threshold,
            });
        }
        for (field, value) in [
            ("failure_threshold", u64::from(self.breaker.failure_threshold)),
            (
                "half_open_max_attempts",
                u64::from(self.breaker.half_open_max_attempts),
            ),
            (
                "total_connection_budget",
                u64::from(self.server.total_connection_budget),
            ),
            ("probe_failure_limit", u64::from(self.server.probe_failure_limit)),
            ("max_batch", self.retry.max_batch as u64),
            ("max_retries_per_pass", self.retry.max_retries_per_pass as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroField { field });
            }
        }
        for (field, value) in [
            ("ewma_alpha", self.server.ewma_alpha),
            ("max_capacity_percent", self.server.max_capacity_percent),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::UnitInterval { field, value });
            }
        }
        if self.ports.start > self.ports.end {
            return Err(ConfigError::PortRange {
                start: self.ports.start,
                end: self.ports.end,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(BalancerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_server_bounds() {
        let mut config = BalancerConfig::default();
        config.scaler.min_servers = 5;
        config.scaler.max_servers = 2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ServerBounds { min: 5, max: 2 })
        ));
    }

    #[test]
    fn rejects_overlapping_scale_thresholds() {
        let mut config = BalancerConfig::default();
        config.scaler.scale_down_request_threshold = 100;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ScaleThresholds { .. })
        ));
    }

    #[test]
    fn rejects_zero_failure_threshold() {
        let mut config = BalancerConfig::default();
        config.breaker.failure_threshold = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroField { .. })));
    }

    #[test]
    fn rejects_out_of_range_alpha() {
        let mut config = BalancerConfig::default();
        config.server.ewma_alpha = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnitInterval { field: "ewma_alpha", .. })
        ));
    }

    #[test]
    fn rejects_empty_port_range() {
        let mut config = BalancerConfig::default();
        config.ports.start = 9000;
        config.ports.end = 8000;
        assert!(matches!(config.validate(), Err(ConfigError::PortRange { .. })));
    }
}
