//! Server lifecycle: spawning and graceful removal.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tracing::{info, warn};

use ballast_core::config::{CircuitBreakerConfig, ServerConfig};
use ballast_core::domain::pool::ServerPool;
use ballast_core::domain::server::{Server, SharedServer};

use crate::error::ScaleError;
use crate::ports::PortAllocator;
use crate::process::BackendLauncher;
use crate::transport::Transport;

/// How often a draining server is checked for having gone idle.
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Owns the real-world side of pool membership.
///
/// Spawning acquires a port, launches the backend, and registers the server;
/// removal drains gracefully and only then tears the backend down. The
/// balancer and the autoscaler both mutate the pool exclusively through
/// this type. Cloning is cheap: all shared state sits behind `Arc`s.
#[derive(Clone)]
pub struct ServerManager {
    pool: Arc<ServerPool>,
    ports: Arc<PortAllocator>,
    launcher: Arc<dyn BackendLauncher>,
    transport: Arc<dyn Transport>,
    server_config: ServerConfig,
    breaker_config: CircuitBreakerConfig,
}

impl ServerManager {
    /// Wire a manager over the given pool and collaborators.
    pub fn new(
        pool: Arc<ServerPool>,
        ports: Arc<PortAllocator>,
        launcher: Arc<dyn BackendLauncher>,
        transport: Arc<dyn Transport>,
        server_config: ServerConfig,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            pool,
            ports,
            launcher,
            transport,
            server_config,
            breaker_config,
        }
    }

    /// Current pool membership, draining servers included.
    pub fn server_count(&self) -> usize {
        self.pool.len()
    }

    /// The pool this manager mutates.
    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    /// Acquire a port, launch a backend on it, and register the server.
    ///
    /// A launch failure releases the reserved port before surfacing.
    pub fn spawn_server(&self) -> Result<SharedServer, ScaleError> {
        let port = self.ports.acquire()?;
        if let Err(error) = self.launcher.launch(port) {
            self.ports.release(port);
            return Err(error);
        }

        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let server = Arc::new(Server::new(addr, &self.server_config, self.breaker_config.clone()));
        self.pool.add(Arc::clone(&server));
        Ok(server)
    }

    /// Register an externally-created server.
    pub fn register(&self, server: SharedServer) -> bool {
        self.pool.add(server)
    }

    /// The non-draining member with the lowest health; ties go to the one
    /// with the worse response time.
    pub fn least_healthy(&self) -> Option<SharedServer> {
        self.pool
            .snapshot()
            .iter()
            .filter(|s| !s.is_draining())
            .min_by(|a, b| {
                a.health()
                    .partial_cmp(&b.health())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(
                        b.avg_response_ms()
                            .partial_cmp(&a.avg_response_ms())
                            .unwrap_or(std::cmp::Ordering::Equal),
                    )
            })
            .cloned()
    }

    /// Begin the graceful removal protocol for `server`.
    ///
    /// Drain mode takes the server out of selection immediately; an async
    /// task waits for in-flight connections to finish and only then swaps
    /// the server out of the pool and tears its backend down. In-flight
    /// work is never cut.
    pub fn start_removal(&self, server: SharedServer) {
        if !server.enable_drain_mode() {
            // Already on its way out.
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            manager.wait_and_finish(server).await;
        });
    }

    async fn wait_and_finish(&self, server: SharedServer) {
        while server.active_connections() > 0 {
            time::sleep(DRAIN_POLL).await;
        }
        self.finish_removal(&server);
    }

    fn finish_removal(&self, server: &SharedServer) {
        if self.pool.remove(server.addr).is_none() {
            warn!(server = %server.addr, "server already gone from pool");
        }
        self.transport.forget_server(server.addr);
        self.ports.release(server.addr.port());
        self.launcher.terminate(server.addr.port());
        info!(server = %server.addr, "server fully removed");
    }

    /// Drain every member and tear it down once idle. Used at shutdown.
    pub async fn drain_all(&self) {
        let members = self.pool.snapshot();
        for server in members.iter() {
            server.enable_drain_mode();
        }
        for server in members.iter() {
            self.wait_and_finish(Arc::clone(server)).await;
        }
    }
}
