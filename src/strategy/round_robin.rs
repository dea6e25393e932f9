//! Round-robin endpoint selection.

use super::{EndpointRef, Strategy};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Cycles through endpoints with an atomic per-instance cursor.
///
/// This is the default strategy. Each action or event entry owns its own
/// instance, so the rotation of one entry never disturbs another.
///
/// # Examples
///
/// ```rust
/// use swarmbus::strategy::{EndpointRef, RoundRobinStrategy, Strategy};
///
/// let strategy = RoundRobinStrategy::new();
/// let endpoints = [
///     EndpointRef { node_id: "a", local: false },
///     EndpointRef { node_id: "b", local: false },
/// ];
/// assert_eq!(strategy.select(&endpoints), 0);
/// assert_eq!(strategy.select(&endpoints), 1);
/// assert_eq!(strategy.select(&endpoints), 0);
/// ```
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    cursor: AtomicUsize,
}

impl RoundRobinStrategy {
    /// Creates a new round-robin strategy with the cursor at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for RoundRobinStrategy {
    fn select(&self, endpoints: &[EndpointRef<'_>]) -> usize {
        // The candidate list shrinks and grows as nodes come and go; the
        // modulo keeps the cursor meaningful across size changes.
        self.cursor.fetch_add(1, Ordering::Relaxed) % endpoints.len()
    }

    fn name(&self) -> &'static str {
        "RoundRobin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs<'a>(ids: &'a [&'a str]) -> Vec<EndpointRef<'a>> {
        ids.iter()
            .map(|id| EndpointRef {
                node_id: id,
                local: false,
            })
            .collect()
    }

    #[test]
    fn test_cycles_in_order() {
        let strategy = RoundRobinStrategy::new();
        let endpoints = refs(&["a", "b", "c"]);
        let picks: Vec<usize> = (0..6).map(|_| strategy.select(&endpoints)).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_single_endpoint_always_selected() {
        let strategy = RoundRobinStrategy::new();
        let endpoints = refs(&["only"]);
        for _ in 0..5 {
            assert_eq!(strategy.select(&endpoints), 0);
        }
    }

    #[test]
    fn test_survives_list_shrinking() {
        let strategy = RoundRobinStrategy::new();
        let three = refs(&["a", "b", "c"]);
        let two = refs(&["a", "b"]);
        strategy.select(&three);
        strategy.select(&three);
        // Cursor may be past the end of the shorter list; selection must
        // still return a valid index.
        let idx = strategy.select(&two);
        assert!(idx < 2);
    }
}
