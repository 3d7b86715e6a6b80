use core::time::Duration;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    config::{BusinessTypeConfig, StrategyKind, VolatileConfig},
    error::{Error, Result},
    segment::IdSegment,
    status::CounterState,
    store::{CounterWrite, IncrementRequest, KeyValueStore},
    strategy::CounterStrategy,
    time::TimeSource,
};

/// Counter strategy backed by a [`KeyValueStore`].
///
/// Each claim is a single [`KeyValueStore::increment_segment`] round trip, so
/// there is nothing to retry. When a TTL is configured, an idle counter can
/// expire; the next claim then restarts it at the business type's start value
/// and may hand out IDs that were issued before the expiry.
pub struct VolatileCounterStrategy<S>
where
    S: KeyValueStore,
{
    store: S,
    clock: Arc<dyn TimeSource>,
    counter_prefix: String,
    info_prefix: String,
    ttl: Option<Duration>,
}

impl<S> VolatileCounterStrategy<S>
where
    S: KeyValueStore,
{
    pub fn new(store: S, config: &VolatileConfig, clock: Arc<dyn TimeSource>) -> Self {
        let ttl = config.ttl();
        #[cfg(feature = "tracing")]
        {
            if let Some(ttl) = ttl {
                tracing::warn!(
                    ttl_secs = ttl.as_secs(),
                    "volatile counters expire when idle; an expired counter restarts at its start value and may reissue IDs"
                );
            }
        }
        Self {
            store,
            clock,
            counter_prefix: format!("{}counter:", config.namespace),
            info_prefix: format!("{}info:", config.namespace),
            ttl,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn counter_key(&self, business_type: &str) -> String {
        format!("{}{business_type}", self.counter_prefix)
    }

    fn info_key(&self, business_type: &str) -> String {
        format!("{}{business_type}", self.info_prefix)
    }

    async fn write_if_absent(&self, business_type: &str, value: i64) -> Result<bool> {
        let key = self.counter_key(business_type);
        let info_key = self.info_key(business_type);
        self.store
            .init_counter(CounterWrite {
                key: &key,
                info_key: &info_key,
                value,
                ttl: self.ttl,
                now_millis: self.clock.current_millis(),
            })
            .await
    }
}

#[async_trait]
impl<S> CounterStrategy for VolatileCounterStrategy<S>
where
    S: KeyValueStore,
{
    fn kind(&self) -> StrategyKind {
        StrategyKind::Volatile
    }

    async fn ensure_exists(&self, business_type: &str, config: &BusinessTypeConfig) -> Result<()> {
        self.write_if_absent(business_type, config.start_value - 1)
            .await
            .map(|_| ())
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
        let key = self.counter_key(business_type);
        let info_key = self.info_key(business_type);
        let now = self.clock.current_millis();

        let new_max = self
            .store
            .increment_segment(IncrementRequest {
                key: &key,
                info_key: &info_key,
                delta: i64::from(size),
                initial: config.start_value - 1,
                ttl: self.ttl,
                now_millis: now,
            })
            .await?
            .ok_or_else(|| Error::overflow(business_type))?;

        let segment = IdSegment::ending_at(business_type, new_max, size, now)?;
        #[cfg(feature = "tracing")]
        tracing::debug!(
            business_type,
            start_id = segment.start_id,
            end_id = segment.end_id,
            "issued volatile segment"
        );
        Ok(segment)
    }

    async fn init(
        &self,
        business_type: &str,
        start_value: i64,
        _config: &BusinessTypeConfig,
    ) -> Result<bool> {
        let created = self.write_if_absent(business_type, start_value - 1).await?;
        #[cfg(feature = "tracing")]
        {
            if created {
                tracing::info!(business_type, start_value, "initialized volatile counter");
            } else {
                tracing::info!(business_type, "volatile counter already exists");
            }
        }
        Ok(created)
    }

    async fn reset(
        &self,
        business_type: &str,
        start_value: i64,
        _config: &BusinessTypeConfig,
    ) -> Result<()> {
        let key = self.counter_key(business_type);
        let info_key = self.info_key(business_type);
        self.store
            .set_counter(CounterWrite {
                key: &key,
                info_key: &info_key,
                value: start_value - 1,
                ttl: self.ttl,
                now_millis: self.clock.current_millis(),
            })
            .await?;
        #[cfg(feature = "tracing")]
        tracing::info!(business_type, start_value, "reset volatile counter");
        Ok(())
    }

    async fn status(&self, business_type: &str) -> Result<Option<CounterState>> {
        let Some(current_max) = self.store.get_counter(&self.counter_key(business_type)).await?
        else {
            return Ok(None);
        };
        let info = self.store.get_info(&self.info_key(business_type)).await?;
        Ok(Some(CounterState {
            business_type: business_type.to_owned(),
            current_max,
            total_issued: info.as_ref().map_or(0, |i| i.total_generated),
            step_size: None,
            created_at_millis: info.as_ref().and_then(|i| i.created_at_millis),
            updated_at_millis: info.as_ref().map(|i| i.updated_at_millis),
            note: None,
        }))
    }

    async fn materialized(&self) -> Result<Vec<String>> {
        let keys = self.store.scan_prefix(&self.counter_prefix).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.counter_prefix).map(str::to_owned))
            .collect())
    }

    async fn remove(&self, business_type: &str) -> Result<bool> {
        let key = self.counter_key(business_type);
        let info_key = self.info_key(business_type);
        let removed = self.store.delete(&[key.as_str(), info_key.as_str()]).await? > 0;
        #[cfg(feature = "tracing")]
        tracing::info!(business_type, removed, "removed volatile counter");
        Ok(removed)
    }
}
