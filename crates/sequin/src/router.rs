use std::{collections::BTreeMap, sync::Arc};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    config::{BusinessTypeConfig, BusinessTypeRegistry, StrategyKind},
    error::{Error, Result},
    segment::IdSegment,
    status::IdStatus,
    strategy::CounterStrategy,
};

/// Sends each business type to the strategy its config names.
///
/// The router owns the [`BusinessTypeRegistry`] and one strategy per
/// [`StrategyKind`]. A business type that resolves to a kind with no installed
/// strategy cannot be served or created, and every operation on it fails with
/// [`Error::NotFound`].
pub struct StrategyRouter {
    registry: Arc<BusinessTypeRegistry>,
    strategies: BTreeMap<StrategyKind, Arc<dyn CounterStrategy>>,
}

impl StrategyRouter {
    pub fn new(registry: Arc<BusinessTypeRegistry>) -> Self {
        Self {
            registry,
            strategies: BTreeMap::new(),
        }
    }

    /// Installs `strategy` under its own kind, replacing any previous one.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn CounterStrategy>) -> Self {
        self.strategies.insert(strategy.kind(), strategy);
        self
    }

    pub fn registry(&self) -> &BusinessTypeRegistry {
        &self.registry
    }

    /// Installed strategy kinds, in order.
    pub fn kinds(&self) -> impl Iterator<Item = StrategyKind> + '_ {
        self.strategies.keys().copied()
    }

    /// Resolves `business_type` to its strategy and effective config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no strategy of the configured kind is
    /// installed.
    pub fn resolve(
        &self,
        business_type: &str,
    ) -> Result<(&Arc<dyn CounterStrategy>, BusinessTypeConfig)> {
        let config = self.registry.resolve(business_type);
        match self.strategies.get(&config.strategy) {
            Some(strategy) => Ok((strategy, config)),
            None => {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    business_type,
                    strategy = %config.strategy,
                    "no strategy installed for business type"
                );
                Err(Error::not_found(business_type))
            }
        }
    }

    /// Whether the strategy of `kind` is the one serving `business_type`.
    pub fn supports(&self, kind: StrategyKind, business_type: &str) -> bool {
        self.registry.strategy_for(business_type) == kind && self.strategies.contains_key(&kind)
    }

    /// Ensures the counter exists, then claims `size` IDs from it.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub async fn claim(&self, business_type: &str, size: u32) -> Result<IdSegment> {
        let (strategy, config) = self.resolve(business_type)?;
        strategy.ensure_exists(business_type, &config).await?;
        strategy.claim_segment(business_type, size, &config).await
    }

    pub async fn init(&self, business_type: &str, start_value: i64) -> Result<bool> {
        let (strategy, config) = self.resolve(business_type)?;
        strategy.init(business_type, start_value, &config).await
    }

    pub async fn reset(&self, business_type: &str, start_value: i64) -> Result<()> {
        let (strategy, config) = self.resolve(business_type)?;
        strategy.reset(business_type, start_value, &config).await
    }

    pub async fn status(&self, business_type: &str) -> Result<IdStatus> {
        let (strategy, config) = self.resolve(business_type)?;
        Ok(match strategy.status(business_type).await? {
            Some(state) => IdStatus::from_state(state, &config),
            None => IdStatus::unavailable(business_type, &config),
        })
    }

    /// Status of every materialized counter across all installed strategies,
    /// grouped by strategy kind and sorted by business type within each.
    pub async fn all_status(&self) -> Result<Vec<IdStatus>> {
        let mut statuses = Vec::new();
        for (&kind, strategy) in &self.strategies {
            let mut business_types = strategy.materialized().await?;
            business_types.sort();
            for business_type in business_types {
                // Removed between listing and reading.
                let Some(state) = strategy.status(&business_type).await? else {
                    continue;
                };
                let config = BusinessTypeConfig {
                    strategy: kind,
                    ..self.registry.resolve(&business_type)
                };
                statuses.push(IdStatus::from_state(state, &config));
            }
        }
        Ok(statuses)
    }

    /// Deletes the counter from every installed strategy, so a counter left
    /// behind by an earlier routing entry goes too. Returns whether anything
    /// was deleted.
    pub async fn remove(&self, business_type: &str) -> Result<bool> {
        let mut removed = false;
        for strategy in self.strategies.values() {
            removed |= strategy.remove(business_type).await?;
        }
        Ok(removed)
    }
}

impl core::fmt::Debug for StrategyRouter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StrategyRouter")
            .field("registry", &self.registry)
            .field("strategies", &self.strategies.keys().collect::<Vec<_>>())
            .finish()
    }
}
