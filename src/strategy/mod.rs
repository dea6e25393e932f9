//! Endpoint selection strategies.
//!
//! A strategy picks one endpoint out of the candidates that survived
//! availability filtering. Strategies are pure apart from their own cursor
//! state; they never see unavailable endpoints and never fail on a
//! non-empty candidate list.

mod random;
mod round_robin;

pub use random::RandomStrategy;
pub use round_robin::RoundRobinStrategy;

/// A lightweight view of a selectable endpoint.
///
/// Strategies receive these instead of full endpoint records so that the
/// same strategy instance can balance both action calls and event
/// deliveries.
#[derive(Clone, Copy, Debug)]
pub struct EndpointRef<'a> {
    /// Node hosting the endpoint.
    pub node_id: &'a str,
    /// Whether the endpoint lives on the local node.
    pub local: bool,
}

/// Picks one endpoint among available candidates.
///
/// # Contract
///
/// `select` is called with a non-empty slice and must return an index into
/// it. Implementations may keep internal cursor state but must not block
/// and must be callable concurrently.
pub trait Strategy: Send + Sync + std::fmt::Debug {
    /// Returns the index of the chosen endpoint.
    fn select(&self, endpoints: &[EndpointRef<'_>]) -> usize;

    /// Returns the strategy name for logging and listings.
    fn name(&self) -> &'static str;
}

/// Strategy selection in [`BrokerConfig`](crate::BrokerConfig).
///
/// Each action and event entry gets its own strategy instance, so cursors
/// advance independently per entry.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum StrategyKind {
    /// Cycle through endpoints with a per-entry cursor.
    #[default]
    RoundRobin,
    /// Pick uniformly at random.
    Random,
}

impl StrategyKind {
    /// Instantiates a fresh strategy of this kind.
    #[must_use]
    pub fn create(self) -> Box<dyn Strategy> {
        match self {
            Self::RoundRobin => Box::new(RoundRobinStrategy::new()),
            Self::Random => Box::new(RandomStrategy::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_creates_matching_strategy() {
        assert_eq!(StrategyKind::RoundRobin.create().name(), "RoundRobin");
        assert_eq!(StrategyKind::Random.create().name(), "Random");
    }
}
