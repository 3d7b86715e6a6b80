use std::sync::Arc;

use async_trait::async_trait;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    config::{BusinessTypeConfig, StrategyKind},
    error::{Error, Result},
    random::{RandSource, ThreadRandom},
    segment::IdSegment,
    status::CounterState,
    store::{LedgerRow, LedgerStore},
    strategy::{AUTO_INITIALIZED, CounterStrategy, RetryPolicy, locks::KeyedLocks},
    time::TimeSource,
};

/// Counter strategy backed by a durable [`LedgerStore`] row.
///
/// A claim reads `max_id`, then issues a conditional update that only lands if
/// `max_id` is unchanged. Losing that race is retried with backoff up to
/// [`RetryPolicy::max_attempts`] times. The store's conditional update is what
/// keeps claims disjoint across processes; the per-business-type in-process
/// lock only spares this process from racing itself.
pub struct LedgerCounterStrategy<S>
where
    S: LedgerStore,
{
    store: S,
    clock: Arc<dyn TimeSource>,
    retry: RetryPolicy,
    rand: Arc<dyn RandSource>,
    locks: KeyedLocks,
}

impl<S> LedgerCounterStrategy<S>
where
    S: LedgerStore,
{
    pub fn new(store: S, retry: RetryPolicy, clock: Arc<dyn TimeSource>) -> Self {
        Self::with_rand(store, retry, clock, Arc::new(ThreadRandom))
    }

    /// Like [`Self::new`] with an explicit jitter source.
    pub fn with_rand(
        store: S,
        retry: RetryPolicy,
        clock: Arc<dyn TimeSource>,
        rand: Arc<dyn RandSource>,
    ) -> Self {
        Self {
            store,
            clock,
            retry,
            rand,
            locks: KeyedLocks::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Number of business types with a live in-process lock handle.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    fn new_row(&self, business_type: &str, start_value: i64, step_size: u32) -> LedgerRow {
        let now = self.clock.current_millis();
        LedgerRow {
            business_type: business_type.to_owned(),
            max_id: start_value - 1,
            step_size,
            total_generated: 0,
            created_at_millis: now,
            updated_at_millis: now,
            remark: Some(AUTO_INITIALIZED.to_owned()),
        }
    }

    async fn insert_row(&self, business_type: &str, start_value: i64, step_size: u32) -> Result<bool> {
        self.store
            .insert_if_absent(self.new_row(business_type, start_value, step_size))
            .await
    }

    /// One read plus one conditional update. `Ok(None)` means the race was
    /// lost or the row vanished.
    async fn try_claim(
        &self,
        business_type: &str,
        size: u32,
        config: &BusinessTypeConfig,
    ) -> Result<Option<IdSegment>> {
        let Some(row) = self.store.select(business_type).await? else {
            #[cfg(feature = "tracing")]
            tracing::warn!(business_type, "ledger row vanished during claim, re-creating");
            self.insert_row(business_type, config.start_value, config.batch_size)
                .await?;
            return Ok(None);
        };

        let delta = i64::from(size);
        let new_max = row
            .max_id
            .checked_add(delta)
            .ok_or_else(|| Error::overflow(business_type))?;
        let now = self.clock.current_millis();
        let updated = self
            .store
            .compare_and_set_max(business_type, row.max_id, new_max, delta, now)
            .await?;
        if updated == 0 {
            return Ok(None);
        }
        IdSegment::ending_at(business_type, new_max, size, now).map(Some)
    }
}

#[async_trait]
impl<S> CounterStrategy for LedgerCounterStrategy<S>
where
    S: LedgerStore,
{
    fn kind(&self) -> StrategyKind {
        StrategyKind::Ledger
    }

    async fn ensure_exists(&self, business_type: &str, config: &BusinessTypeConfig) -> Result<()> {
        if self.store.select(business_type).await?.is_some() {
            return Ok(());
        }
        let _created = self
            .insert_row(business_type, config.start_value, config.batch_size)
            .await?;
        #[cfg(feature = "tracing")]
        {
            if _created {
                tracing::info!(
                    business_type,
                    start_value = config.start_value,
                    "auto-initialized ledger row"
                );
            }
        }
        Ok(())
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self, config)))]
    async fn claim_segment(
        &self,
        business_type: &str,
        size: u32,
        config: &BusinessTypeConfig,
    ) -> Result<IdSegment> {
        if size == 0 {
            return Err(Error::invalid_argument("Segment size must be positive"));
        }
        let lock = self.locks.handle(business_type);
        let max_attempts = self.retry.max_attempts;

        for attempt in 1..=max_attempts {
            let claimed = {
                let _guard = lock.lock().await;
                self.try_claim(business_type, size, config).await?
            };
            if let Some(segment) = claimed {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    business_type,
                    start_id = segment.start_id,
                    end_id = segment.end_id,
                    attempt,
                    "issued ledger segment"
                );
                return Ok(segment);
            }
            if attempt < max_attempts {
                let delay = self.retry.delay(attempt, self.rand.as_ref());
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    business_type,
                    attempt,
                    delay_us = u64::try_from(delay.as_micros()).unwrap_or(u64::MAX),
                    "optimistic lock failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::error!(business_type, attempts = max_attempts, "gave up claiming ledger segment");
        Err(Error::ResourceExhausted {
            business_type: business_type.to_owned(),
            attempts: max_attempts,
        })
    }

    async fn init(
        &self,
        business_type: &str,
        start_value: i64,
        config: &BusinessTypeConfig,
    ) -> Result<bool> {
        if self.store.select(business_type).await?.is_some() {
            #[cfg(feature = "tracing")]
            tracing::info!(business_type, "ledger row already exists");
            return Ok(false);
        }
        let created = self
            .insert_row(business_type, start_value, config.batch_size)
            .await?;
        #[cfg(feature = "tracing")]
        tracing::info!(business_type, start_value, created, "initialized ledger row");
        Ok(created)
    }

    async fn reset(
        &self,
        business_type: &str,
        start_value: i64,
        config: &BusinessTypeConfig,
    ) -> Result<()> {
        let now = self.clock.current_millis();
        let updated = self
            .store
            .reset(business_type, start_value - 1, now)
            .await?;
        if updated == 0 && !self.insert_row(business_type, start_value, config.batch_size).await? {
            // Someone created the row between our reset and insert.
            self.store.reset(business_type, start_value - 1, now).await?;
        }
        #[cfg(feature = "tracing")]
        tracing::info!(business_type, start_value, "reset ledger row");
        Ok(())
    }

    async fn status(&self, business_type: &str) -> Result<Option<CounterState>> {
        Ok(self.store.select(business_type).await?.map(|row| CounterState {
            business_type: row.business_type,
            current_max: row.max_id,
            total_issued: row.total_generated,
            step_size: Some(row.step_size),
            created_at_millis: Some(row.created_at_millis),
            updated_at_millis: Some(row.updated_at_millis),
            note: row.remark,
        }))
    }

    async fn materialized(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .select_all()
            .await?
            .into_iter()
            .map(|row| row.business_type)
            .collect())
    }

    async fn remove(&self, business_type: &str) -> Result<bool> {
        let removed = self.store.delete(business_type).await? > 0;
        self.locks.remove(business_type);
        #[cfg(feature = "tracing")]
        tracing::info!(business_type, removed, "removed ledger row");
        Ok(removed)
    }
}
