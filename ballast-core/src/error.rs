//! Construction-time error types.
//!
//! Runtime failures (a backend refusing a request, a probe timing out) are
//! never surfaced as errors; they become boolean outcomes at the transport
//! boundary. Only invalid configuration is allowed to abort startup.

/// A configuration rejected by eager validation, before anything starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The autoscaler ceiling is below its floor.
    #[error("max_servers ({max}) must not be below min_servers ({min})")]
    ServerBounds {
        /// Configured pool floor.
        min: usize,
        /// Configured pool ceiling.
        max: usize,
    },

    /// The scale-down threshold would overlap the scale-up threshold.
    #[error("scale_down_request_threshold ({down}) must be below scale_up_request_threshold ({up})")]
    ScaleThresholds {
        /// Requests-per-window below which the pool shrinks.
        down: u64,
        /// Requests-per-window above which the pool grows.
        up: u64,
    },

    /// A count or budget that must be at least one was zero.
    #[error("{field} must be greater than zero")]
    ZeroField {
        /// Name of the offending configuration field.
        field: &'static str,
    },

    /// A ratio that must lie in `(0, 1]` did not.
    #[error("{field} must be within (0, 1], got {value}")]
    UnitInterval {
        /// Name of the offending configuration field.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// The port range is empty.
    #[error("port range start ({start}) must not exceed end ({end})")]
    PortRange {
        /// First port of the configured range.
        start: u16,
        /// Last port of the configured range.
        end: u16,
    },
}
