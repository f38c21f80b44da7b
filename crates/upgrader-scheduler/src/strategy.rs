//! Concurrency and phasing policies.

use upgrader_state::{StrategySpec, StrategyType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Up to `workers` operations at once.
    Parallel { workers: usize },
    /// A first batch of `max(1, ceil(percent% * n))` operations, then the
    /// remainder, only if the whole batch succeeded.
    Canary { percent: u8, workers: usize },
}

impl Strategy {
    pub fn sequential() -> Self {
        Self::Parallel { workers: 1 }
    }

    pub fn from_spec(spec: &StrategySpec, default_workers: u32) -> Self {
        let workers = spec.workers.unwrap_or(default_workers).max(1) as usize;
        match spec.kind {
            StrategyType::Parallel => Self::Parallel { workers },
            StrategyType::Canary => Self::Canary {
                percent: spec.canary_percent.unwrap_or(100).clamp(1, 100),
                workers,
            },
        }
    }

    pub fn workers(&self) -> usize {
        match self {
            Self::Parallel { workers } | Self::Canary { workers, .. } => *workers,
        }
    }
}

/// Size of the canary batch for `total` operations.
pub fn canary_batch_size(percent: u8, total: usize) -> usize {
    if total == 0 {
        return 0;
    }
    let size = (usize::from(percent) * total).div_ceil(100);
    size.clamp(1, total)
}
