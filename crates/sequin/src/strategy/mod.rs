//! Counter strategies: one implementation per backend family.

mod ledger;
mod locks;
mod retry;
#[cfg(test)]
mod tests;
mod volatile;

use async_trait::async_trait;

pub use ledger::*;
pub use retry::*;
pub use volatile::*;

use crate::{
    config::{BusinessTypeConfig, StrategyKind},
    error::Result,
    segment::IdSegment,
    status::CounterState,
};

/// A backend that owns per-business-type counters and hands out segments.
///
/// Every method receives the business type's resolved [`BusinessTypeConfig`]
/// where it needs one; strategies keep no routing state of their own.
#[async_trait]
pub trait CounterStrategy: Send + Sync + 'static {
    fn kind(&self) -> StrategyKind;

    /// Creates the counter at `config.start_value - 1` if it does not exist.
    /// Safe to race: concurrent callers converge on a single counter.
    async fn ensure_exists(&self, business_type: &str, config: &BusinessTypeConfig) -> Result<()>;

    /// Atomically reserves the next `size` IDs.
    async fn claim_segment(
        &self,
        business_type: &str,
        size: u32,
        config: &BusinessTypeConfig,
    ) -> Result<IdSegment>;

    /// Creates the counter so the next ID is `start_value`. Returns `false`
    /// and changes nothing if the counter already exists.
    async fn init(
        &self,
        business_type: &str,
        start_value: i64,
        config: &BusinessTypeConfig,
    ) -> Result<bool>;

    /// Forces the next ID to be `start_value`, creating the counter if needed.
    async fn reset(
        &self,
        business_type: &str,
        start_value: i64,
        config: &BusinessTypeConfig,
    ) -> Result<()>;

    /// Reads the counter without creating it.
    async fn status(&self, business_type: &str) -> Result<Option<CounterState>>;

    /// Business types that currently have a counter.
    async fn materialized(&self) -> Result<Vec<String>>;

    /// Deletes the counter and any local lock handle. Returns whether a
    /// counter existed.
    async fn remove(&self, business_type: &str) -> Result<bool>;
}

pub(crate) const AUTO_INITIALIZED: &str = "Auto initialized";
