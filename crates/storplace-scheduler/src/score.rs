use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use storplace_core::StorPool;
use tracing::trace;

/// Scoring function trait
///
/// The score is opaque to the search: higher is better, and selections are
/// compared by the sum of their pool scores.
pub trait ScoreFunction: Send + Sync {
    /// Score a storage pool
    fn score(&self, pool: &StorPool) -> f64;

    /// Name of the scoring function
    fn name(&self) -> &str;
}

/// Prefer pools with the most free space
pub struct MostFreeSpace;

impl ScoreFunction for MostFreeSpace {
    fn score(&self, pool: &StorPool) -> f64 {
        let score = pool.free_space_kib.unwrap_or(0) as f64;
        trace!("{} score: {} (free KiB)", pool, score);
        score
    }

    fn name(&self) -> &str {
        "MostFreeSpace"
    }
}

/// Prefer pools with the lowest fill ratio (0-100)
pub struct LeastUsed;

impl ScoreFunction for LeastUsed {
    fn score(&self, pool: &StorPool) -> f64 {
        let score = match (pool.free_space_kib, pool.total_capacity_kib) {
            (Some(free), Some(capacity)) if capacity > 0 => {
                (free as f64 / capacity as f64 * 100.0).clamp(0.0, 100.0)
            }
            _ => 0.0,
        };
        trace!("{} score: {:.1} (% free)", pool, score);
        score
    }

    fn name(&self) -> &str {
        "LeastUsed"
    }
}

/// Every pool is equally good
pub struct Uniform;

impl ScoreFunction for Uniform {
    fn score(&self, _pool: &StorPool) -> f64 {
        1.0
    }

    fn name(&self) -> &str {
        "Uniform"
    }
}

/// Built-in scoring strategies selectable by configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScoreStrategy {
    #[default]
    MostFreeSpace,
    LeastUsed,
    Uniform,
}

impl ScoreStrategy {
    pub fn score_function(&self) -> Box<dyn ScoreFunction> {
        match self {
            ScoreStrategy::MostFreeSpace => Box::new(MostFreeSpace),
            ScoreStrategy::LeastUsed => Box::new(LeastUsed),
            ScoreStrategy::Uniform => Box::new(Uniform),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreStrategy::MostFreeSpace => "most-free-space",
            ScoreStrategy::LeastUsed => "least-used",
            ScoreStrategy::Uniform => "uniform",
        }
    }
}

impl FromStr for ScoreStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "most-free-space" => Ok(ScoreStrategy::MostFreeSpace),
            "least-used" => Ok(ScoreStrategy::LeastUsed),
            "uniform" => Ok(ScoreStrategy::Uniform),
            other => Err(format!(
                "Unknown score strategy '{}', expected most-free-space, least-used or uniform",
                other
            )),
        }
    }
}

impl fmt::Display for ScoreStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storplace_core::{NodeName, ProviderKind, StorPoolName};

    fn pool(free: Option<u64>, capacity: Option<u64>) -> StorPool {
        let mut sp = StorPool::new(
            StorPoolName::new("fast").unwrap(),
            NodeName::new("alpha").unwrap(),
            ProviderKind::Lvm,
        );
        sp.free_space_kib = free;
        sp.total_capacity_kib = capacity;
        sp
    }

    #[test]
    fn test_most_free_space() {
        assert_eq!(MostFreeSpace.score(&pool(Some(2048), None)), 2048.0);
        assert_eq!(MostFreeSpace.score(&pool(None, None)), 0.0);
    }

    #[test]
    fn test_least_used() {
        assert_eq!(LeastUsed.score(&pool(Some(25), Some(100))), 25.0);
        assert_eq!(LeastUsed.score(&pool(Some(25), None)), 0.0);
        assert_eq!(LeastUsed.score(&pool(Some(25), Some(0))), 0.0);
        // Stale estimates above capacity are capped
        assert_eq!(LeastUsed.score(&pool(Some(200), Some(100))), 100.0);
    }

    #[test]
    fn test_uniform() {
        assert_eq!(Uniform.score(&pool(None, None)), 1.0);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "least-used".parse::<ScoreStrategy>().unwrap(),
            ScoreStrategy::LeastUsed
        );
        assert_eq!(
            "Uniform".parse::<ScoreStrategy>().unwrap(),
            ScoreStrategy::Uniform
        );
        assert!("random".parse::<ScoreStrategy>().is_err());
        assert_eq!(ScoreStrategy::default(), ScoreStrategy::MostFreeSpace);
        assert_eq!(
            ScoreStrategy::LeastUsed.score_function().name(),
            "LeastUsed"
        );
    }
}
