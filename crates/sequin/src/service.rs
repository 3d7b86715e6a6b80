use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    config::{
        BusinessTypeConfig, BusinessTypeRegistry, RegistryConfig, StrategyKind,
        validate_business_type,
    },
    error::{Error, Result},
    router::StrategyRouter,
    segment::IdSegment,
    status::IdStatus,
    store::{MemoryKvStore, MemoryLedgerStore},
    strategy::{LedgerCounterStrategy, RetryPolicy, VolatileCounterStrategy},
    time::{SystemClock, TimeSource},
};

/// Most IDs a single [`IdAllocationService::generate_ids`] call may return.
pub const MAX_IDS_PER_REQUEST: i32 = 10_000;

/// Largest segment [`IdAllocationService::generate_id_segment`] may claim.
pub const MAX_SEGMENT_SIZE: i32 = 100_000;

/// The public allocation contract.
///
/// Every operation validates its input before touching a backend, then
/// delegates to the [`StrategyRouter`]. All generation is built on a single
/// segment claim, so a call either returns every requested ID or fails.
///
/// # Example
///
/// ```
/// use sequin::{IdAllocationService, RegistryConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let service = IdAllocationService::in_memory(&RegistryConfig::default()).unwrap();
/// let segment = service.generate_id_segment("order", 100).await.unwrap();
/// assert_eq!((segment.start_id, segment.end_id), (1, 100));
/// assert_eq!(service.generate_id("order").await.unwrap(), 101);
/// # }
/// ```
#[derive(Debug)]
pub struct IdAllocationService {
    router: StrategyRouter,
}

impl IdAllocationService {
    pub fn new(router: StrategyRouter) -> Self {
        Self { router }
    }

    /// Builds a service over in-memory stores for both strategies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the registry config is invalid.
    pub fn in_memory(config: &RegistryConfig) -> Result<Self> {
        Self::in_memory_with_clock(config, Arc::new(SystemClock))
    }

    /// Like [`Self::in_memory`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the registry config is invalid.
    pub fn in_memory_with_clock(
        config: &RegistryConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        let registry = Arc::new(BusinessTypeRegistry::from_config(config)?);
        let volatile = VolatileCounterStrategy::new(
            MemoryKvStore::new(Arc::clone(&clock)),
            &config.volatile,
            Arc::clone(&clock),
        );
        let ledger = LedgerCounterStrategy::new(
            MemoryLedgerStore::new(config.ledger.table.clone()),
            RetryPolicy::from_config(&config.ledger),
            clock,
        );
        let router = StrategyRouter::new(registry)
            .with_strategy(Arc::new(volatile))
            .with_strategy(Arc::new(ledger));
        Ok(Self::new(router))
    }

    pub fn router(&self) -> &StrategyRouter {
        &self.router
    }

    /// Returns the next ID for `business_type`.
    pub async fn generate_id(&self, business_type: &str) -> Result<i64> {
        Ok(self.generate_id_segment(business_type, 1).await?.start_id)
    }

    /// Returns `count` consecutive IDs. A `count` of zero or less yields an
    /// empty list without touching the backend.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub async fn generate_ids(&self, business_type: &str, count: i32) -> Result<Vec<i64>> {
        validate_business_type(business_type)?;
        if count <= 0 {
            return Ok(Vec::new());
        }
        if count > MAX_IDS_PER_REQUEST {
            return Err(Error::invalid_argument(format!(
                "Count cannot exceed {MAX_IDS_PER_REQUEST}"
            )));
        }
        let segment = self.claim(business_type, count).await?;
        Ok(segment.ids().collect())
    }

    /// Claims a contiguous block of `segment_size` IDs.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub async fn generate_id_segment(
        &self,
        business_type: &str,
        segment_size: i32,
    ) -> Result<IdSegment> {
        validate_business_type(business_type)?;
        if segment_size <= 0 {
            return Err(Error::invalid_argument("Segment size must be positive"));
        }
        if segment_size > MAX_SEGMENT_SIZE {
            return Err(Error::invalid_argument(format!(
                "Segment size cannot exceed {MAX_SEGMENT_SIZE}"
            )));
        }
        self.claim(business_type, segment_size).await
    }

    async fn claim(&self, business_type: &str, size: i32) -> Result<IdSegment> {
        let size = u32::try_from(size)
            .map_err(|_| Error::invalid_argument("Segment size must be positive"))?;
        self.router.claim(business_type, size).await
    }

    /// Forces the next ID for `business_type` to be `start_value`.
    ///
    /// Not serialized against in-flight claims on the same business type: a
    /// claim racing a reset may land before or after it.
    pub async fn reset_id_counter(&self, business_type: &str, start_value: i64) -> Result<()> {
        validate_business_type(business_type)?;
        validate_start_value(start_value)?;
        self.router.reset(business_type, start_value).await
    }

    /// Status of one business type. Never creates a counter; an unseen
    /// business type reports `available: false`.
    pub async fn get_id_status(&self, business_type: &str) -> Result<IdStatus> {
        validate_business_type(business_type)?;
        self.router.status(business_type).await
    }

    pub async fn get_all_id_status(&self) -> Result<Vec<IdStatus>> {
        self.router.all_status().await
    }

    /// Creates the counter so the next ID is `start_value`. Does nothing if it
    /// already exists.
    pub async fn init_business_type(&self, business_type: &str, start_value: i64) -> Result<()> {
        validate_business_type(business_type)?;
        validate_start_value(start_value)?;
        self.router.init(business_type, start_value).await.map(|_| ())
    }

    /// Deletes the counter, wherever it lives. Removing an unknown business
    /// type is not an error.
    pub async fn remove_business_type(&self, business_type: &str) -> Result<()> {
        validate_business_type(business_type)?;
        self.router.remove(business_type).await.map(|_| ())
    }

    /// Adds or replaces the routing entry for `business_type`. Existing
    /// counters are left untouched.
    pub fn register_business_type(
        &self,
        business_type: &str,
        config: BusinessTypeConfig,
    ) -> Result<Option<BusinessTypeConfig>> {
        let previous = self.router.registry().register(business_type, config)?;
        #[cfg(feature = "tracing")]
        tracing::info!(business_type, replaced = previous.is_some(), "registered business type");
        Ok(previous)
    }

    /// Drops the routing entry for `business_type` so it falls back to the
    /// defaults. Existing counters are left untouched.
    pub fn deregister_business_type(
        &self,
        business_type: &str,
    ) -> Result<Option<BusinessTypeConfig>> {
        validate_business_type(business_type)?;
        let previous = self.router.registry().deregister(business_type);
        #[cfg(feature = "tracing")]
        tracing::info!(business_type, existed = previous.is_some(), "deregistered business type");
        Ok(previous)
    }

    /// Whether the strategy of `kind` serves `business_type`.
    pub fn supports(&self, kind: StrategyKind, business_type: &str) -> bool {
        self.router.supports(kind, business_type)
    }
}

fn validate_start_value(start_value: i64) -> Result<()> {
    if start_value < 1 {
        return Err(Error::invalid_argument("Start value must be positive"));
    }
    Ok(())
}
