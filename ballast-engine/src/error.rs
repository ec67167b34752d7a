//! Engine-side error types.

/// A pool mutation that could not take effect in the real world.
///
/// These are logged and retried on the next monitor cycle; they never stop
/// the monitoring loop.
#[derive(Debug, thiserror::Error)]
pub enum ScaleError {
    /// Every port in the configured range is taken or unavailable.
    #[error("no available ports in {start}..={end}")]
    PortsExhausted {
        /// First port of the scanned range.
        start: u16,
        /// Last port of the scanned range.
        end: u16,
    },

    /// The backend process could not be started.
    #[error("failed to launch backend on port {port}")]
    LaunchFailed {
        /// Port the backend was meant to listen on.
        port: u16,
        /// The underlying spawn error.
        #[source]
        source: std::io::Error,
    },
}
