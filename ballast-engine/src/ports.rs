//! Backend port allocation.

use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use ballast_core::config::PortRangeConfig;

use crate::error::ScaleError;

/// Hands out backend ports from a configured range.
///
/// An explicit injected service rather than process-wide state, so tests can
/// run isolated allocators side by side. Tracks its own grants and falls
/// back to an OS-level bind probe for ports something else already holds.
#[derive(Debug)]
pub struct PortAllocator {
    start: u16,
    end: u16,
    allocated: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    /// Create an allocator over the configured range.
    pub fn new(config: &PortRangeConfig) -> Self {
        Self {
            start: config.start,
            end: config.end,
            allocated: Mutex::new(HashSet::new()),
        }
    }

    /// Reserve the lowest free port in the range.
    pub fn acquire(&self) -> Result<u16, ScaleError> {
        let mut allocated = self.allocated.lock().unwrap_or_else(PoisonError::into_inner);
        for port in self.start..=self.end {
            if allocated.contains(&port) {
                continue;
            }
            if port_is_free(port) {
                allocated.insert(port);
                debug!(port, "port acquired");
                return Ok(port);
            }
        }
        Err(ScaleError::PortsExhausted {
            start: self.start,
            end: self.end,
        })
    }

    /// Return a previously acquired port to the range.
    pub fn release(&self, port: u16) {
        let mut allocated = self.allocated.lock().unwrap_or_else(PoisonError::into_inner);
        if allocated.remove(&port) {
            debug!(port, "port released");
        }
    }
}

fn port_is_free(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}
