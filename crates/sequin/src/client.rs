//! Caller-side helpers: what a consumer of the allocation service builds on
//! top of it.

use core::time::Duration;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::{sync::Mutex as AsyncMutex, time::timeout};

use crate::{
    error::{Error, Result},
    fallback::{FallbackGenerator, TimestampFallback},
    segment::IdSegment,
    service::IdAllocationService,
};

/// Per-call budget used by [`ResilientKeyGenerator`] unless overridden.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// The generation half of the allocation contract, as seen by a caller.
///
/// Implemented by [`IdAllocationService`] for in-process use; a remote client
/// implements it over whatever transport it speaks.
#[async_trait]
pub trait IdSource: Send + Sync {
    async fn generate_id(&self, business_type: &str) -> Result<i64>;

    async fn generate_ids(&self, business_type: &str, count: i32) -> Result<Vec<i64>>;

    async fn generate_id_segment(&self, business_type: &str, segment_size: i32)
    -> Result<IdSegment>;
}

#[async_trait]
impl IdSource for IdAllocationService {
    async fn generate_id(&self, business_type: &str) -> Result<i64> {
        Self::generate_id(self, business_type).await
    }

    async fn generate_ids(&self, business_type: &str, count: i32) -> Result<Vec<i64>> {
        Self::generate_ids(self, business_type, count).await
    }

    async fn generate_id_segment(
        &self,
        business_type: &str,
        segment_size: i32,
    ) -> Result<IdSegment> {
        Self::generate_id_segment(self, business_type, segment_size).await
    }
}

#[async_trait]
impl<S> IdSource for Arc<S>
where
    S: IdSource + ?Sized,
{
    async fn generate_id(&self, business_type: &str) -> Result<i64> {
        (**self).generate_id(business_type).await
    }

    async fn generate_ids(&self, business_type: &str, count: i32) -> Result<Vec<i64>> {
        (**self).generate_ids(business_type, count).await
    }

    async fn generate_id_segment(
        &self,
        business_type: &str,
        segment_size: i32,
    ) -> Result<IdSegment> {
        (**self).generate_id_segment(business_type, segment_size).await
    }
}

/// Keys produced by [`ResilientKeyGenerator::generate_keys`].
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct GeneratedKeys {
    pub ids: Vec<i64>,
    /// How many of `ids` came from the fallback generator.
    pub fallbacks: usize,
}

impl GeneratedKeys {
    pub const fn is_degraded(&self) -> bool {
        self.fallbacks > 0
    }
}

/// Generates primary keys for one business type and never fails.
///
/// It first asks for the whole batch in one call. If that call errors, times
/// out or returns the wrong number of IDs, it asks for one ID at a time, and
/// substitutes a fallback ID for each of those calls that fails.
pub struct ResilientKeyGenerator<S, F = TimestampFallback>
where
    S: IdSource,
    F: FallbackGenerator,
{
    source: S,
    fallback: F,
    business_type: String,
    request_timeout: Duration,
}

impl<S> ResilientKeyGenerator<S>
where
    S: IdSource,
{
    /// A generator that falls back to [`TimestampFallback::system`].
    pub fn new(source: S, business_type: impl Into<String>) -> Self {
        Self::with_fallback(source, TimestampFallback::system(), business_type)
    }
}

impl<S, F> ResilientKeyGenerator<S, F>
where
    S: IdSource,
    F: FallbackGenerator,
{
    pub fn with_fallback(source: S, fallback: F, business_type: impl Into<String>) -> Self {
        Self {
            source,
            fallback,
            business_type: business_type.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn business_type(&self) -> &str {
        &self.business_type
    }

    /// Returns exactly `count` keys.
    pub async fn generate_keys(&self, count: usize) -> GeneratedKeys {
        if count == 0 {
            return GeneratedKeys::default();
        }

        match self.try_batch(count).await {
            Ok(ids) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(business_type = %self.business_type, count, "generated keys in one batch");
                return GeneratedKeys { ids, fallbacks: 0 };
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    business_type = %self.business_type,
                    error = %_e,
                    "batch generation failed, falling back to single generation"
                );
            }
        }

        let mut keys = GeneratedKeys {
            ids: Vec::with_capacity(count),
            fallbacks: 0,
        };
        for _index in 0..count {
            match self.bounded(self.source.generate_id(&self.business_type)).await {
                Ok(id) => keys.ids.push(id),
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        business_type = %self.business_type,
                        index = _index,
                        error = %_e,
                        "single generation failed, using fallback"
                    );
                    keys.ids.push(self.fallback.fallback_id(&self.business_type));
                    keys.fallbacks += 1;
                }
            }
        }
        keys
    }

    async fn try_batch(&self, count: usize) -> Result<Vec<i64>> {
        let requested = i32::try_from(count)
            .map_err(|_| Error::invalid_argument("Count does not fit a single request"))?;
        let ids = self
            .bounded(self.source.generate_ids(&self.business_type, requested))
            .await?;
        if ids.len() != count {
            return Err(Error::unavailable(format!(
                "expected {count} ids, got {}",
                ids.len()
            )));
        }
        Ok(ids)
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        timeout(self.request_timeout, call)
            .await
            .map_err(|_| Error::unavailable(format!("timed out after {:?}", self.request_timeout)))?
    }
}

#[derive(Debug, Default)]
struct BufferState {
    segment: Option<IdSegment>,
    last: Option<i64>,
}

/// Hands out IDs from a locally held segment, claiming a new one of
/// `batch_size` IDs whenever the current segment runs dry.
///
/// IDs from one buffer are strictly increasing. They are consecutive across
/// refills unless another caller claimed from the same business type in
/// between.
pub struct SegmentBuffer<S>
where
    S: IdSource,
{
    source: S,
    business_type: String,
    batch_size: i32,
    state: AsyncMutex<BufferState>,
}

impl<S> SegmentBuffer<S>
where
    S: IdSource,
{
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `batch_size` is not positive.
    pub fn new(source: S, business_type: impl Into<String>, batch_size: i32) -> Result<Self> {
        if batch_size <= 0 {
            return Err(Error::invalid_argument("Batch size must be positive"));
        }
        Ok(Self {
            source,
            business_type: business_type.into(),
            batch_size,
            state: AsyncMutex::new(BufferState::default()),
        })
    }

    /// Returns the next ID, refilling from the source if needed.
    pub async fn next_id(&self) -> Result<i64> {
        let mut state = self.state.lock().await;
        let exhausted = state
            .segment
            .as_ref()
            .is_none_or(|segment| segment.remaining_count(state.last) == 0);
        if exhausted {
            let segment = self
                .source
                .generate_id_segment(&self.business_type, self.batch_size)
                .await?;
            #[cfg(feature = "tracing")]
            tracing::debug!(
                business_type = %self.business_type,
                start_id = segment.start_id,
                end_id = segment.end_id,
                "refilled segment buffer"
            );
            state.segment = Some(segment);
            state.last = None;
        }

        let Some(segment) = state.segment.as_ref() else {
            return Err(Error::unavailable("segment buffer is empty"));
        };
        let next = match state.last {
            Some(last) if segment.contains(last) => last + 1,
            _ => segment.start_id,
        };
        state.last = Some(next);
        Ok(next)
    }

    /// IDs left in the current segment without another claim.
    pub async fn remaining(&self) -> u64 {
        let state = self.state.lock().await;
        state
            .segment
            .as_ref()
            .map_or(0, |segment| segment.remaining_count(state.last))
    }
}
