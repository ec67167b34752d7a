//! Pluggable server-selection policies.

mod round_robin;
mod weighted;

pub use round_robin::RoundRobin;
pub use weighted::WeightedHealth;

use crate::domain::server::SharedServer;

/// A policy that picks one server out of a candidate set.
///
/// Candidates arrive pre-filtered by the pool (healthy, not draining,
/// capacity to spare); a strategy only decides the order of choice. Picked
/// at construction time, one per balancer.
pub trait SelectionStrategy: Send + Sync {
    /// Pick a server, or `None` when the candidate set offers nothing.
    fn select(&self, candidates: &[SharedServer]) -> Option<SharedServer>;
}
