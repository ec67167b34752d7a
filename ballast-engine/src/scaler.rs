//! Autoscaling monitor.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use ballast_core::config::AutoScalerConfig;

use crate::error::ScaleError;
use crate::manager::ServerManager;

/// Grows and shrinks the pool from two signals: a sliding request-count
/// window and per-server load.
///
/// Capacity pressure (any server near its connection ceiling) scales up
/// immediately; the request-rate thresholds handle the ordinary case; and
/// scale-down additionally requires the average load to have stayed low for
/// a full stabilization window, which keeps a bursty lull from flapping the
/// pool. Evaluation runs under one mutex, so a cycle can never decide to
/// grow and shrink at the same time.
pub struct AutoScaler {
    config: AutoScalerConfig,
    manager: Arc<ServerManager>,
    started: Instant,
    /// Request counts bucketed by whole seconds since `started`.
    window: DashMap<u64, u64>,
    scaling: tokio::sync::Mutex<()>,
    low_load_since: Mutex<Option<Instant>>,
}

impl AutoScaler {
    /// Create a scaler driving the given manager.
    pub fn new(config: AutoScalerConfig, manager: Arc<ServerManager>) -> Self {
        Self {
            config,
            manager,
            started: Instant::now(),
            window: DashMap::new(),
            scaling: tokio::sync::Mutex::new(()),
            low_load_since: Mutex::new(None),
        }
    }

    /// Synchronously bring the pool up to its floor.
    pub fn initialize(&self) -> Result<(), ScaleError> {
        while self.manager.server_count() < self.config.min_servers {
            let server = self.manager.spawn_server()?;
            info!(server = %server.addr, "initial server ready");
        }
        Ok(())
    }

    /// Count one inbound request in the current window bucket.
    pub fn track_request(&self) {
        let bucket = self.started.elapsed().as_secs();
        *self.window.entry(bucket).or_insert(0) += 1;
    }

    /// Requests observed within the trailing window.
    pub fn recent_requests(&self) -> u64 {
        let now = self.started.elapsed().as_secs();
        let horizon = now.saturating_sub(self.config.trailing_window.as_secs());
        self.window
            .iter()
            .filter(|entry| *entry.key() >= horizon)
            .map(|entry| *entry.value())
            .sum()
    }

    fn purge_stale(&self) {
        let now = self.started.elapsed().as_secs();
        let cutoff = now.saturating_sub(self.config.retention.as_secs());
        self.window.retain(|bucket, _| *bucket >= cutoff);
    }

    /// One monitoring cycle: read the signals, then mutate the pool at most
    /// once.
    pub async fn monitor_and_scale(&self) {
        let recent = self.recent_requests();
        self.purge_stale();

        let _guard = self.scaling.lock().await;
        let count = self.manager.server_count();
        let (peak_load, average_load) = self.pool_load();

        if peak_load >= self.config.load_scale_up_threshold && count < self.config.max_servers {
            info!(peak_load, "scaling up on capacity pressure");
            self.scale_up();
            return;
        }

        if recent > self.config.scale_up_request_threshold && count < self.config.max_servers {
            info!(recent, count, "scaling up on request rate");
            self.scale_up();
        } else if recent < self.config.scale_down_request_threshold
            && count > self.config.min_servers
            && self.sustained_low_load(average_load)
        {
            if let Some(victim) = self.manager.least_healthy() {
                info!(recent, count, victim = %victim.addr, "scaling down");
                self.manager.start_removal(victim);
            }
        } else {
            debug!(recent, count, average_load, "no scaling action");
        }
    }

    fn scale_up(&self) {
        match self.manager.spawn_server() {
            Ok(server) => info!(server = %server.addr, total = self.manager.server_count(), "scale-up complete"),
            Err(error) => warn!(%error, "scale-up failed, will retry next cycle"),
        }
    }

    // Peak and average load across non-draining members.
    fn pool_load(&self) -> (f64, f64) {
        let snapshot = self.manager.pool().snapshot();
        let loads: Vec<f64> = snapshot
            .iter()
            .filter(|s| !s.is_draining())
            .map(|s| s.load())
            .collect();
        if loads.is_empty() {
            return (0.0, 0.0);
        }
        let peak = loads.iter().cloned().fold(0.0, f64::max);
        let average = loads.iter().sum::<f64>() / loads.len() as f64;
        (peak, average)
    }

    // True once the average load has stayed below the scale-down threshold
    // for the full stabilization window.
    fn sustained_low_load(&self, average_load: f64) -> bool {
        let mut since = self
            .low_load_since
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if average_load < self.config.load_scale_down_threshold {
            since
                .get_or_insert_with(Instant::now)
                .elapsed()
                >= self.config.scale_down_stabilization
        } else {
            *since = None;
            false
        }
    }

    /// Drive `monitor_and_scale` on its configured cadence until shutdown.
    pub fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(self.config.check_interval);
            // Skip the immediate first tick.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.monitor_and_scale().await,
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}
