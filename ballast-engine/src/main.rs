//! Ballast Engine
//!
//! Entry point for the self-scaling load balancer: assembles the engine,
//! brings the pool up to its floor, starts the background loops, and drives
//! synthetic traffic through it until interrupted.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ballast_core::config::BalancerConfig;
use ballast_core::domain::request::Request;
use ballast_core::strategy::RoundRobin;

use ballast_engine::balancer::LoadBalancer;
use ballast_engine::process::CommandLauncher;
use ballast_engine::transport::HttpTransport;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = BalancerConfig::default();
    let balancer = LoadBalancer::new(
        config,
        Arc::new(RoundRobin::new()),
        Arc::new(HttpTransport::new()),
        // Set BALLAST_BACKEND_CMD to have the engine own backend processes.
        Arc::new(CommandLauncher::from_env()),
    )?;

    balancer.initialize()?;
    Arc::clone(&balancer).start();
    info!("ballast running; press ctrl-c to stop");

    // Synthetic traffic at a jittered cadence, standing in for an inbound
    // listener.
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = drive_one(&balancer) => {}
        }
    }

    balancer.shutdown().await;
    Ok(())
}

async fn drive_one(balancer: &Arc<LoadBalancer>) {
    if balancer.handle_request(Request::default()).await {
        info!("request: ok");
    } else {
        warn!("request: failed");
    }

    let jitter = rand::thread_rng().gen_range(50..2000);
    tokio::time::sleep(Duration::from_millis(jitter)).await;
}
