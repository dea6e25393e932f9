//! Random endpoint selection.

use super::{EndpointRef, Strategy};
use rand::Rng;

/// Picks an endpoint uniformly at random.
///
/// Useful when callers are many and short-lived, where round-robin
/// cursors reset too often to balance anything.
#[derive(Debug, Default)]
pub struct RandomStrategy;

impl RandomStrategy {
    /// Creates a new random strategy.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for RandomStrategy {
    fn select(&self, endpoints: &[EndpointRef<'_>]) -> usize {
        rand::thread_rng().gen_range(0..endpoints.len())
    }

    fn name(&self) -> &'static str {
        "Random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selects_valid_indices() {
        let strategy = RandomStrategy::new();
        let endpoints = [
            EndpointRef {
                node_id: "a",
                local: false,
            },
            EndpointRef {
                node_id: "b",
                local: false,
            },
            EndpointRef {
                node_id: "c",
                local: false,
            },
        ];
        for _ in 0..100 {
            assert!(strategy.select(&endpoints) < 3);
        }
    }

    #[test]
    fn test_eventually_selects_every_endpoint() {
        let strategy = RandomStrategy::new();
        let endpoints = [
            EndpointRef {
                node_id: "a",
                local: false,
            },
            EndpointRef {
                node_id: "b",
                local: false,
            },
        ];
        let mut seen = [false, false];
        for _ in 0..200 {
            seen[strategy.select(&endpoints)] = true;
        }
        assert!(seen[0] && seen[1]);
    }
}
