//! Scheduling Strategies
//!
//! A strategy decides which ready actions start next. It only sees node
//! indices (in declaration order) and the number of actions in flight, and
//! never touches run state. The engine rejects any selection that is not a
//! duplicate-free subset of the ready set within the free slots.

use std::fmt;
use std::str::FromStr;

/// Pluggable dispatch policy.
pub trait Strategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Upper bound on simultaneously running actions; 0 means unbounded.
    fn max_concurrency(&self) -> usize;

    /// Picks the actions to start from `ready`.
    ///
    /// # Arguments
    ///
    /// * `ready` - Indices of PENDING actions whose dependencies are satisfied
    /// * `running` - Number of actions currently SCHEDULED or RUNNING
    fn select_next_batch(&self, ready: &[usize], running: usize) -> Vec<usize>;
}

/// Free slots left under a concurrency bound (0 = unbounded).
pub fn free_slots(max_concurrency: usize, running: usize) -> usize {
    if max_concurrency == 0 {
        usize::MAX
    } else {
        max_concurrency.saturating_sub(running)
    }
}

/// Starts every ready action, up to the concurrency bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreeStrategy {
    max_concurrency: usize,
}

impl FreeStrategy {
    pub fn new(max_concurrency: usize) -> Self {
        Self { max_concurrency }
    }
}

impl Strategy for FreeStrategy {
    fn name(&self) -> &str {
        "free"
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    fn select_next_batch(&self, ready: &[usize], running: usize) -> Vec<usize> {
        ready
            .iter()
            .copied()
            .take(free_slots(self.max_concurrency, running))
            .collect()
    }
}

/// Runs one action at a time, in declaration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialStrategy;

impl Strategy for SequentialStrategy {
    fn name(&self) -> &str {
        "sequential"
    }

    fn max_concurrency(&self) -> usize {
        1
    }

    fn select_next_batch(&self, ready: &[usize], running: usize) -> Vec<usize> {
        if running > 0 {
            return Vec::new();
        }
        ready.iter().copied().min().into_iter().collect()
    }
}

/// Built-in strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StrategyKind {
    #[default]
    Free,
    Sequential,
}

impl StrategyKind {
    /// All recognized strategy names.
    pub const NAMES: &'static [&'static str] = &["free", "sequential"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Sequential => "sequential",
        }
    }

    /// Instantiates the strategy.
    pub fn build(self, max_parallel: usize) -> Box<dyn Strategy> {
        match self {
            Self::Free => Box::new(FreeStrategy::new(max_parallel)),
            Self::Sequential => Box::new(SequentialStrategy),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "sequential" => Ok(Self::Sequential),
            other => Err(format!(
                "Unknown strategy '{}' (expected one of: {})",
                other,
                Self::NAMES.join(", ")
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_slots() {
        assert_eq!(free_slots(0, 100), usize::MAX);
        assert_eq!(free_slots(4, 1), 3);
        assert_eq!(free_slots(2, 5), 0);
    }

    #[test]
    fn test_free_unbounded_takes_all() {
        let strategy = FreeStrategy::new(0);
        assert_eq!(strategy.select_next_batch(&[0, 2, 5], 3), vec![0, 2, 5]);
    }

    #[test]
    fn test_free_respects_bound() {
        let strategy = FreeStrategy::new(2);
        assert_eq!(strategy.select_next_batch(&[0, 1, 2], 0), vec![0, 1]);
        assert_eq!(strategy.select_next_batch(&[0, 1, 2], 1), vec![0]);
        assert!(strategy.select_next_batch(&[0, 1, 2], 2).is_empty());
    }

    #[test]
    fn test_sequential_one_at_a_time() {
        let strategy = SequentialStrategy;
        assert_eq!(strategy.select_next_batch(&[4, 1, 3], 0), vec![1]);
        assert!(strategy.select_next_batch(&[4, 1, 3], 1).is_empty());
        assert!(strategy.select_next_batch(&[], 0).is_empty());
        assert_eq!(strategy.max_concurrency(), 1);
    }

    #[test]
    fn test_kind_parse_and_build() {
        assert_eq!("Sequential".parse::<StrategyKind>(), Ok(StrategyKind::Sequential));
        assert!("random".parse::<StrategyKind>().is_err());

        let strategy = StrategyKind::Free.build(3);
        assert_eq!(strategy.name(), "free");
        assert_eq!(strategy.max_concurrency(), 3);
    }
}
