//! The request-handling orchestrator.

use std::sync::Arc;

use tokio::sync::{watch, Notify};
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, info, warn};

use ballast_core::config::BalancerConfig;
use ballast_core::domain::pool::ServerPool;
use ballast_core::domain::request::Request;
use ballast_core::error::ConfigError;
use ballast_core::retry::RetryCache;
use ballast_core::strategy::SelectionStrategy;

use crate::health_check::prober;
use crate::manager::ServerManager;
use crate::ports::PortAllocator;
use crate::process::BackendLauncher;
use crate::scaler::AutoScaler;
use crate::transport::Transport;

/// Wires the pool, strategy, transport, autoscaler, and retry cache into
/// one request-handling entry point, and owns the background loops.
///
/// Request outcomes feed breaker and health state; health and load feed
/// selection and scaling; scaling reshapes the pool selection draws from;
/// and failures land in the retry cache for later replay. One closed loop.
pub struct LoadBalancer {
    pool: Arc<ServerPool>,
    strategy: Arc<dyn SelectionStrategy>,
    transport: Arc<dyn Transport>,
    retry: Arc<RetryCache>,
    scaler: Arc<AutoScaler>,
    manager: Arc<ServerManager>,
    config: BalancerConfig,
    shutdown: watch::Sender<bool>,
    replay_nudge: Notify,
}

impl LoadBalancer {
    /// Validate the configuration and assemble a balancer around it.
    pub fn new(
        config: BalancerConfig,
        strategy: Arc<dyn SelectionStrategy>,
        transport: Arc<dyn Transport>,
        launcher: Arc<dyn BackendLauncher>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;

        let pool = Arc::new(ServerPool::new());
        let ports = Arc::new(PortAllocator::new(&config.ports));
        let manager = Arc::new(ServerManager::new(
            Arc::clone(&pool),
            ports,
            launcher,
            Arc::clone(&transport),
            config.server.clone(),
            config.breaker.clone(),
        ));
        let scaler = Arc::new(AutoScaler::new(config.scaler.clone(), Arc::clone(&manager)));
        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self {
            pool,
            strategy,
            transport,
            retry: Arc::new(RetryCache::new()),
            scaler,
            manager,
            config,
            shutdown,
            replay_nudge: Notify::new(),
        }))
    }

    /// Bring the pool up to its floor. Call once before `start`.
    pub fn initialize(&self) -> Result<(), crate::error::ScaleError> {
        self.scaler.initialize()
    }

    /// Spawn the background loops: probing, health decay, retry replay,
    /// and the autoscaling monitor.
    pub fn start(self: Arc<Self>) {
        prober::spawn_prober(Arc::clone(&self), self.config.health.probe_interval);
        Arc::clone(&self).spawn_decay_loop();
        Arc::clone(&self.scaler).run(self.shutdown.subscribe());
        self.spawn_replay_loop();
        info!("balancer started");
    }

    /// Route one request: track it, pick a server, dispatch, record.
    ///
    /// Any failure, including having no eligible server at all, caches the
    /// request for replay and reports false.
    pub async fn handle_request(&self, request: Request) -> bool {
        self.scaler.track_request();

        let handled = self.try_dispatch(&request).await;
        if handled {
            // A healthy server just answered; good moment to work the
            // backlog down.
            if self.retry.has_pending() {
                self.replay_nudge.notify_one();
            }
        } else {
            self.retry.enqueue(request);
        }
        handled
    }

    // One dispatch attempt, no caching. Shared by the request path and the
    // replay path (the latter does its own re-enqueueing).
    async fn try_dispatch(&self, request: &Request) -> bool {
        let candidates = self.pool.candidates();
        let Some(server) = self.strategy.select(&candidates) else {
            debug!("no eligible server for dispatch");
            return false;
        };

        let _guard = server.begin_request();
        let outcome = self.transport.dispatch(&server, request).await;
        server.record_outcome(outcome.success, outcome.elapsed_ms);
        if !outcome.success {
            warn!(server = %server.addr, "dispatch failed");
        }
        outcome.success
    }

    /// Probe every non-draining member concurrently and fold the results
    /// into breaker and health state. Servers left with an Open breaker go
    /// to the removal path.
    pub async fn perform_health_checks(&self) {
        let mut probes = JoinSet::new();
        for server in self.pool.snapshot().iter() {
            if server.is_draining() {
                continue;
            }
            let server = Arc::clone(server);
            let transport = Arc::clone(&self.transport);
            probes.spawn(async move {
                let healthy = transport.probe(&server).await;
                (server, healthy)
            });
        }

        while let Some(joined) = probes.join_next().await {
            let Ok((server, healthy)) = joined else { continue };
            server.update_health_from_probe(healthy);
            if !server.is_healthy() {
                warn!(server = %server.addr, "unhealthy after probe, removing");
                self.manager.start_removal(server);
            }
        }
    }

    // Run one replay pass against the ordinary dispatch path.
    async fn replay_pending(&self, flush_all: bool) {
        let stats = self
            .retry
            .replay_batch(
                |request| async move { self.try_dispatch(&request).await },
                self.config.retry.max_batch,
                self.config.retry.max_retries_per_pass,
                flush_all,
            )
            .await;

        if stats.skipped {
            debug!("replay pass already running");
        } else if stats.replayed > 0 || stats.requeued > 0 {
            info!(
                replayed = stats.replayed,
                requeued = stats.requeued,
                "replay pass finished"
            );
        }
    }

    fn spawn_decay_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = time::interval(self.config.health.decay_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let amount = self.config.health.decay_amount;
                        for server in self.pool.snapshot().iter() {
                            server.decay_health(amount);
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    fn spawn_replay_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = time::interval(self.config.retry.replay_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.replay_nudge.notified() => {}
                    _ = shutdown.changed() => break,
                }
                if self.retry.has_pending() {
                    self.replay_pending(false).await;
                }
            }
        });
    }

    /// Orderly shutdown: stop the loops, flush the retry cache in full,
    /// then drain and tear down every server.
    pub async fn shutdown(&self) {
        info!("shutting down");
        let _ = self.shutdown.send(true);
        self.replay_pending(true).await;
        self.manager.drain_all().await;
        info!("shutdown complete");
    }

    /// The live server pool.
    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    /// The lifecycle manager, for explicit registration and removal.
    pub fn manager(&self) -> &Arc<ServerManager> {
        &self.manager
    }

    /// The retry cache.
    pub fn retry(&self) -> &Arc<RetryCache> {
        &self.retry
    }

    /// The autoscaler.
    pub fn scaler(&self) -> &Arc<AutoScaler> {
        &self.scaler
    }

    pub(crate) fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}
