//! Periodic driver for the balancer's health-check fan-out.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::balancer::LoadBalancer;

/// Spawns a background task that periodically runs the balancer's
/// health-check fan-out until shutdown.
pub fn spawn_prober(balancer: Arc<LoadBalancer>, interval: Duration) -> JoinHandle<()> {
    let mut shutdown = balancer.shutdown_receiver();

    tokio::spawn(async move {
        let mut ticker = time::interval(interval);

        // Prevent immediately ticking when spawned
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => balancer.perform_health_checks().await,
                _ = shutdown.changed() => break,
            }
        }
    })
}
