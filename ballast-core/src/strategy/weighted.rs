//! Health-weighted random selection.

use rand::Rng;

use crate::domain::server::SharedServer;
use crate::strategy::SelectionStrategy;

/// Picks candidates with probability proportional to their health score, so
/// degraded servers still receive a trickle of traffic while healthy ones
/// take most of it.
#[derive(Debug, Default)]
pub struct WeightedHealth;

impl WeightedHealth {
    /// Create the weighted-health policy.
    pub fn new() -> Self {
        Self
    }

    // Deterministic core of the selection: walk the cumulative weights and
    // take the first candidate whose cumulative weight reaches the draw.
    // A draw that floats past the final boundary falls back to the last
    // candidate.
    fn pick_by_draw(candidates: &[SharedServer], draw: f64) -> Option<SharedServer> {
        let mut cumulative = 0.0;
        for server in candidates {
            cumulative += server.health();
            if draw <= cumulative {
                return Some(server.clone());
            }
        }
        candidates.last().cloned()
    }
}

impl SelectionStrategy for WeightedHealth {
    fn select(&self, candidates: &[SharedServer]) -> Option<SharedServer> {
        if candidates.is_empty() {
            return None;
        }
        let total: f64 = candidates.iter().map(|s| s.health()).sum();
        if total <= 0.0 {
            return None;
        }
        let draw = rand::thread_rng().gen::<f64>() * total;
        Self::pick_by_draw(candidates, draw)
    }
}
