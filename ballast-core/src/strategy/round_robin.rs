//! Cursor-based rotation over the candidate list.

use std::sync::{Mutex, PoisonError};

use crate::domain::server::SharedServer;
use crate::strategy::SelectionStrategy;

/// Rotates through candidates in order, one per call.
///
/// The cursor survives across calls; when the candidate list shrinks
/// between calls the cursor wraps to the front instead of indexing out of
/// range.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: Mutex<usize>,
}

impl RoundRobin {
    /// Create a rotation starting at the front of the list.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for RoundRobin {
    fn select(&self, candidates: &[SharedServer]) -> Option<SharedServer> {
        if candidates.is_empty() {
            return None;
        }
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        if *cursor >= candidates.len() {
            *cursor = 0;
        }
        let picked = candidates[*cursor].clone();
        *cursor += 1;
        Some(picked)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::{CircuitBreakerConfig, ServerConfig};
    use crate::domain::server::Server;

    fn servers(ports: &[u16]) -> Vec<SharedServer> {
        ports
            .iter()
            .map(|port| {
                Arc::new(Server::new(
                    format!("127.0.0.1:{port}").parse().unwrap(),
                    &ServerConfig::default(),
                    CircuitBreakerConfig::default(),
                ))
            })
            .collect()
    }

    #[test]
    fn cycles_through_each_candidate_once() {
        let pool = servers(&[9001, 9002, 9003]);
        let strategy = RoundRobin::new();

        let picks: Vec<u16> = (0..6)
            .map(|_| strategy.select(&pool).unwrap().addr.port())
            .collect();
        assert_eq!(picks, vec![9001, 9002, 9003, 9001, 9002, 9003]);
    }

    #[test]
    fn wraps_when_the_list_shrinks() {
        let strategy = RoundRobin::new();
        let three = servers(&[9001, 9002, 9003]);
        strategy.select(&three);
        strategy.select(&three);

        // Cursor now sits at 2; a shrunken list wraps it to the front.
        let one = servers(&[9004]);
        assert_eq!(strategy.select(&one).unwrap().addr.port(), 9004);
    }

    #[test]
    fn empty_candidates_yield_none() {
        let strategy = RoundRobin::new();
        assert!(strategy.select(&[]).is_none());
    }
}
