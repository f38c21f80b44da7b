//! Exponential, clamped, jittered backoff between transient step failures.

use std::time::Duration;

use rand::Rng;
use upgrader_core::ExecutorConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    /// Upward-only jitter factor: the sleep is stretched by up to this share.
    pub jitter: f64,
}

impl Backoff {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            base: config.backoff_base(),
            cap: config.backoff_cap(),
            jitter: config.backoff_jitter,
        }
    }

    /// `min(base * 2^(attempt - 1), cap)`, without jitter. `attempt` is
    /// 1-based; 0 is treated as 1.
    pub fn nominal(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    /// The sleep before re-running after failed invocation number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal(attempt);
        if self.jitter <= 0.0 {
            return nominal;
        }
        let stretch = rand::thread_rng().gen_range(0.0..=self.jitter);
        nominal.mul_f64(1.0 + stretch)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&ExecutorConfig::default())
    }
}
