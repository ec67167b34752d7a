//! The live server set, atomically published.

use arc_swap::ArcSwap;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use crate::domain::server::SharedServer;

/// The set of live servers, keyed by socket address.
///
/// Membership is copy-on-write over `ArcSwap`, so selection and health-check
/// fan-outs read a consistent snapshot without locks and can never observe a
/// partially-updated set.
#[derive(Debug, Default)]
pub struct ServerPool {
    servers: ArcSwap<Vec<SharedServer>>,
}

impl ServerPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool holding the given servers.
    pub fn with_servers(initial: Vec<SharedServer>) -> Self {
        Self {
            servers: ArcSwap::from_pointee(initial),
        }
    }

    /// A consistent snapshot of every member, draining ones included.
    pub fn snapshot(&self) -> Arc<Vec<SharedServer>> {
        self.servers.load_full()
    }

    /// Number of members, draining ones included.
    pub fn len(&self) -> usize {
        self.servers.load().len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a member by address.
    pub fn get(&self, addr: SocketAddr) -> Option<SharedServer> {
        self.servers.load().iter().find(|s| s.addr == addr).cloned()
    }

    /// Add a server; returns false (and leaves the pool untouched) if a
    /// member with the same address already exists.
    pub fn add(&self, server: SharedServer) -> bool {
        let mut added = false;
        self.servers.rcu(|current| {
            let mut next = Vec::clone(current);
            if next.iter().any(|s| s.addr == server.addr) {
                added = false;
            } else {
                next.push(Arc::clone(&server));
                added = true;
            }
            next
        });
        if added {
            info!(server = %server.addr, members = self.len(), "server added to pool");
        }
        added
    }

    /// Atomically remove the member with the given address.
    pub fn remove(&self, addr: SocketAddr) -> Option<SharedServer> {
        let mut removed = None;
        self.servers.rcu(|current| {
            let mut next = Vec::clone(current);
            removed = next
                .iter()
                .position(|s| s.addr == addr)
                .map(|idx| next.remove(idx));
            next
        });
        if let Some(server) = &removed {
            info!(server = %server.addr, members = self.len(), "server removed from pool");
        }
        removed
    }

    /// The subset eligible for selection right now: not draining, breaker
    /// willing, and capacity for one more request.
    ///
    /// All candidate filtering lives here, upstream of the strategies.
    pub fn candidates(&self) -> Vec<SharedServer> {
        self.servers
            .load()
            .iter()
            .filter(|s| s.can_handle(1))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, ServerConfig};
    use crate::domain::server::Server;

    fn server(port: u16) -> SharedServer {
        Arc::new(Server::new(
            format!("127.0.0.1:{port}").parse().unwrap(),
            &ServerConfig::default(),
            CircuitBreakerConfig::default(),
        ))
    }

    #[test]
    fn add_is_idempotent_per_address() {
        let pool = ServerPool::new();
        let a = server(9001);
        assert!(pool.add(a.clone()));
        assert!(!pool.add(a));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn remove_returns_the_member() {
        let pool = ServerPool::with_servers(vec![server(9001), server(9002)]);
        let removed = pool.remove("127.0.0.1:9001".parse().unwrap());
        assert_eq!(removed.unwrap().addr.port(), 9001);
        assert_eq!(pool.len(), 1);
        assert!(pool.remove("127.0.0.1:9001".parse().unwrap()).is_none());
    }

    #[test]
    fn candidates_exclude_draining_members() {
        let pool = ServerPool::with_servers(vec![server(9001), server(9002)]);
        let draining = pool.get("127.0.0.1:9001".parse().unwrap()).unwrap();
        draining.enable_drain_mode();

        let candidates = pool.candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].addr.port(), 9002);
        // Still a member until its connections reach zero and it is removed.
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn candidates_exclude_tripped_members() {
        let pool = ServerPool::with_servers(vec![server(9001), server(9002)]);
        let failing = pool.get("127.0.0.1:9002".parse().unwrap()).unwrap();
        for _ in 0..5 {
            failing.record_outcome(false, 0.0);
        }

        let candidates = pool.candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].addr.port(), 9001);
    }
}
