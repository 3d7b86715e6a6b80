use core::time::Duration;

use crate::{config::LedgerConfig, random::RandSource};

/// Bounds the ledger compare-and-swap loop.
///
/// The delay after the `n`th lost race is `backoff_base * 2^(n-1)`, capped at
/// `backoff_max`, plus up to half of that again as random jitter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Delay to wait after losing attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32, rand: &dyn RandSource) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        let backoff = self.backoff_base.saturating_mul(factor).min(self.backoff_max);
        let half = u64::try_from(backoff.as_micros() / 2).unwrap_or(u64::MAX);
        backoff + Duration::from_micros(rand.below(half.saturating_add(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}
