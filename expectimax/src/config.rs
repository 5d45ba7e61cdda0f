//! Search configuration and engine-wide constants.

use std::time::Duration;

/// Number of expansion worker threads.
pub const WORKER_COUNT: usize = 10;

/// Uniform floor mixed into every child's exploration probability so that
/// low-likelihood branches still get sampled.
pub const EXPLORATION_FLOOR: f64 = 0.1;

/// Fraction of the node budget that must be explored before value queries are
/// answered (`max_node_count / WARMUP_DIVISOR`).
pub(crate) const WARMUP_DIVISOR: usize = 100;

/// Backoff when a worker asks for a node but the frontier is empty or the
/// budget is reached.
pub(crate) const FRONTIER_BACKOFF: Duration = Duration::from_millis(1);

/// Backoff applied to value queries that arrive before the tree is warm.
pub(crate) const WARMUP_BACKOFF: Duration = Duration::from_millis(100);

/// Capacity of the real-game move listener channel.
pub(crate) const MOVE_LISTENER_CAPACITY: usize = 4;

/// Capacity of each client request channel.
pub(crate) const REQUEST_CAPACITY: usize = 10;

/// How long a parked worker waits between termination-flag checks.
pub(crate) const WORKER_POLL: Duration = Duration::from_millis(50);

/// Configuration for an expectimax search.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Node budget: expansion stops once the root's descendent count reaches
    /// this value. In-flight expansions are reserved against the budget at
    /// dispatch, so the root's descendent count never exceeds it by more than
    /// [`WORKER_COUNT`].
    pub max_node_count: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_node_count: 100_000,
        }
    }
}

impl SearchConfig {
    pub fn new(max_node_count: usize) -> Self {
        Self { max_node_count }
    }

    /// Create a small-budget config for testing.
    pub fn for_testing() -> Self {
        Self {
            max_node_count: 500,
        }
    }

    /// Builder pattern: set the node budget.
    pub fn with_max_node_count(mut self, n: usize) -> Self {
        self.max_node_count = n;
        self
    }

    /// Tree size below which value queries are deferred while a frontier
    /// remains, to avoid answering from a tree with no depth.
    pub(crate) fn warmup_threshold(&self) -> usize {
        self.max_node_count / WARMUP_DIVISOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SearchConfig::default();
        assert_eq!(config.max_node_count, 100_000);
        assert_eq!(config.warmup_threshold(), 1_000);
    }

    #[test]
    fn test_builder_pattern() {
        let config = SearchConfig::default().with_max_node_count(300);
        assert_eq!(config.max_node_count, 300);
        assert_eq!(config.warmup_threshold(), 3);
    }

    #[test]
    fn test_floor_splits_ten_percent() {
        // The floor and the likelihood share must partition the unit interval.
        assert!((EXPLORATION_FLOOR + 0.9 - 1.0).abs() < 1e-12);
    }
}
