//! Business-type registry and backend configuration.
//!
//! Every business type resolves to a [`BusinessTypeConfig`]: either an explicit
//! entry (loaded at startup or registered at runtime) or a default derived from
//! the process-wide [`RegistryConfig::default_strategy`].

use core::{fmt, str::FromStr, time::Duration};
use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Longest business type accepted anywhere in the crate, in characters.
pub const MAX_BUSINESS_TYPE_LEN: usize = 50;

/// The backend family that owns a business type's counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum StrategyKind {
    /// Fast counter in a key-value store with optional key expiry.
    Volatile,
    /// Durable counter row advanced by compare-and-swap.
    Ledger,
}

impl StrategyKind {
    /// Canonical lower-case code.
    pub const fn code(self) -> &'static str {
        match self {
            Self::Volatile => "volatile",
            Self::Ledger => "ledger",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "volatile" | "redis" => Ok(Self::Volatile),
            "ledger" | "postgresql" | "postgres" => Ok(Self::Ledger),
            other => Err(Error::invalid_argument(format!(
                "Unknown strategy kind: {other}"
            ))),
        }
    }
}

/// Allocation settings for one business type.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct BusinessTypeConfig {
    pub strategy: StrategyKind,
    pub batch_size: u32,
    pub start_value: i64,
}

impl BusinessTypeConfig {
    /// Creates a validated config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `batch_size` is zero or
    /// `start_value` is below 1.
    pub fn new(strategy: StrategyKind, batch_size: u32, start_value: i64) -> Result<Self> {
        let config = Self {
            strategy,
            batch_size,
            start_value,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::invalid_argument("Batch size must be positive"));
        }
        if self.start_value < 1 {
            return Err(Error::invalid_argument("Start value must be positive"));
        }
        Ok(())
    }
}

/// Settings for the volatile (key-value) backend.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct VolatileConfig {
    /// Prefix prepended to every key the strategy touches.
    pub namespace: String,
    /// Key expiry, refreshed on each claim. `None` disables expiry.
    pub ttl_secs: Option<u64>,
    /// Batch size for business types without an explicit entry.
    pub batch_size: u32,
}

impl VolatileConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

impl Default for VolatileConfig {
    fn default() -> Self {
        Self {
            namespace: "sequin:id:".to_owned(),
            ttl_secs: None,
            batch_size: 100,
        }
    }
}

/// Settings for the ledger (relational) backend.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct LedgerConfig {
    /// Table holding one counter row per business type.
    pub table: String,
    /// Batch size for business types without an explicit entry.
    pub batch_size: u32,
    /// Upper bound on compare-and-swap attempts per claim.
    pub max_attempts: u32,
    /// First backoff delay after a lost race.
    pub backoff_base_ms: u64,
    /// Ceiling for the exponential backoff delay.
    pub backoff_max_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            table: "id_generator".to_owned(),
            batch_size: 1000,
            max_attempts: 32,
            backoff_base_ms: 1,
            backoff_max_ms: 50,
        }
    }
}

/// Everything needed to build a [`BusinessTypeRegistry`] and its backends.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct RegistryConfig {
    pub default_strategy: StrategyKind,
    pub volatile: VolatileConfig,
    pub ledger: LedgerConfig,
    pub business_types: HashMap<String, BusinessTypeConfig>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_strategy: StrategyKind::Volatile,
            volatile: VolatileConfig::default(),
            ledger: LedgerConfig::default(),
            business_types: HashMap::new(),
        }
    }
}

/// Maps business types to their allocation settings.
///
/// Lookups never fail: a business type without an explicit entry resolves to
/// the default strategy, that strategy's default batch size, and a start value
/// of 1. Entries can be added or dropped at runtime; doing so changes routing
/// only and never touches counters.
#[derive(Debug)]
pub struct BusinessTypeRegistry {
    default_strategy: StrategyKind,
    volatile_batch_size: u32,
    ledger_batch_size: u32,
    entries: RwLock<HashMap<String, BusinessTypeConfig>>,
}

impl BusinessTypeRegistry {
    /// Builds a registry from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if any entry has an invalid name,
    /// batch size or start value, or if a default batch size is zero.
    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        if config.volatile.batch_size == 0 || config.ledger.batch_size == 0 {
            return Err(Error::invalid_argument("Batch size must be positive"));
        }
        for (business_type, entry) in &config.business_types {
            validate_business_type(business_type)?;
            entry.validate()?;
        }
        Ok(Self {
            default_strategy: config.default_strategy,
            volatile_batch_size: config.volatile.batch_size,
            ledger_batch_size: config.ledger.batch_size,
            entries: RwLock::new(config.business_types.clone()),
        })
    }

    pub const fn default_strategy(&self) -> StrategyKind {
        self.default_strategy
    }

    /// Default batch size for business types served by `strategy`.
    pub const fn default_batch_size(&self, strategy: StrategyKind) -> u32 {
        match strategy {
            StrategyKind::Volatile => self.volatile_batch_size,
            StrategyKind::Ledger => self.ledger_batch_size,
        }
    }

    /// Returns the effective config for `business_type`.
    pub fn resolve(&self, business_type: &str) -> BusinessTypeConfig {
        self.entries
            .read()
            .get(business_type)
            .cloned()
            .unwrap_or_else(|| BusinessTypeConfig {
                strategy: self.default_strategy,
                batch_size: self.default_batch_size(self.default_strategy),
                start_value: 1,
            })
    }

    pub fn strategy_for(&self, business_type: &str) -> StrategyKind {
        self.resolve(business_type).strategy
    }

    pub fn is_configured(&self, business_type: &str) -> bool {
        self.entries.read().contains_key(business_type)
    }

    /// Adds or replaces an explicit entry, returning the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the name or config is invalid.
    pub fn register(
        &self,
        business_type: &str,
        config: BusinessTypeConfig,
    ) -> Result<Option<BusinessTypeConfig>> {
        validate_business_type(business_type)?;
        config.validate()?;
        Ok(self.entries.write().insert(business_type.to_owned(), config))
    }

    /// Drops an explicit entry so the business type falls back to defaults.
    pub fn deregister(&self, business_type: &str) -> Option<BusinessTypeConfig> {
        self.entries.write().remove(business_type)
    }

    /// Snapshot of explicit entries, sorted by name.
    pub fn configured(&self) -> Vec<(String, BusinessTypeConfig)> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

/// Checks the shared business-type naming rule.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if the name is blank or longer than
/// [`MAX_BUSINESS_TYPE_LEN`] characters.
pub fn validate_business_type(business_type: &str) -> Result<()> {
    if business_type.trim().is_empty() {
        return Err(Error::invalid_argument(
            "Business type cannot be null or empty",
        ));
    }
    if business_type.chars().count() > MAX_BUSINESS_TYPE_LEN {
        return Err(Error::invalid_argument(format!(
            "Business type length cannot exceed {MAX_BUSINESS_TYPE_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(entries: &[(&str, BusinessTypeConfig)]) -> BusinessTypeRegistry {
        let config = RegistryConfig {
            business_types: entries
                .iter()
                .map(|(k, v)| ((*k).to_owned(), v.clone()))
                .collect(),
            ..RegistryConfig::default()
        };
        BusinessTypeRegistry::from_config(&config).unwrap()
    }

    #[test]
    fn unknown_business_type_resolves_to_defaults() {
        let registry = registry_with(&[]);
        let resolved = registry.resolve("never-configured");
        assert_eq!(resolved.strategy, StrategyKind::Volatile);
        assert_eq!(resolved.batch_size, 100);
        assert_eq!(resolved.start_value, 1);
        assert!(!registry.is_configured("never-configured"));
    }

    #[test]
    fn default_batch_size_follows_default_strategy() {
        let config = RegistryConfig {
            default_strategy: StrategyKind::Ledger,
            ..RegistryConfig::default()
        };
        let registry = BusinessTypeRegistry::from_config(&config).unwrap();
        assert_eq!(registry.resolve("x").batch_size, 1000);
        assert_eq!(registry.strategy_for("x"), StrategyKind::Ledger);
    }

    #[test]
    fn explicit_entry_wins() {
        let entry = BusinessTypeConfig::new(StrategyKind::Ledger, 20, 500).unwrap();
        let registry = registry_with(&[("order", entry.clone())]);
        assert_eq!(registry.resolve("order"), entry);
        assert_eq!(registry.strategy_for("article"), StrategyKind::Volatile);
    }

    #[test]
    fn register_and_deregister_at_runtime() {
        let registry = registry_with(&[]);
        let entry = BusinessTypeConfig::new(StrategyKind::Ledger, 10, 7).unwrap();
        assert_eq!(registry.register("user", entry.clone()).unwrap(), None);
        assert_eq!(registry.resolve("user"), entry);
        assert_eq!(registry.configured().len(), 1);
        assert_eq!(registry.deregister("user"), Some(entry));
        assert_eq!(registry.strategy_for("user"), StrategyKind::Volatile);
    }

    #[test]
    fn invalid_entries_are_rejected() {
        assert!(BusinessTypeConfig::new(StrategyKind::Volatile, 0, 1).is_err());
        assert!(BusinessTypeConfig::new(StrategyKind::Volatile, 1, 0).is_err());

        let registry = registry_with(&[]);
        let bad = BusinessTypeConfig {
            strategy: StrategyKind::Ledger,
            batch_size: 10,
            start_value: -5,
        };
        assert!(matches!(
            registry.register("user", bad),
            Err(Error::InvalidArgument { .. })
        ));
        let ok = BusinessTypeConfig::new(StrategyKind::Ledger, 10, 1).unwrap();
        assert!(registry.register("   ", ok).is_err());
    }

    #[test]
    fn business_type_length_is_counted_in_chars() {
        assert!(validate_business_type(&"a".repeat(50)).is_ok());
        assert!(validate_business_type(&"a".repeat(51)).is_err());
        // 50 multi-byte characters are still within the limit.
        assert!(validate_business_type(&"订".repeat(50)).is_ok());
        assert!(validate_business_type("").is_err());
    }

    #[test]
    fn strategy_kind_accepts_legacy_codes() {
        assert_eq!("redis".parse::<StrategyKind>().unwrap(), StrategyKind::Volatile);
        assert_eq!("VOLATILE".parse::<StrategyKind>().unwrap(), StrategyKind::Volatile);
        assert_eq!("postgresql".parse::<StrategyKind>().unwrap(), StrategyKind::Ledger);
        assert_eq!(" ledger ".parse::<StrategyKind>().unwrap(), StrategyKind::Ledger);
        assert!("mysql".parse::<StrategyKind>().is_err());
        assert_eq!(StrategyKind::Ledger.to_string(), "ledger");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn registry_config_from_json() {
        let raw = r#"{
            "defaultStrategy": "LEDGER",
            "volatile": { "ttlSecs": 3600 },
            "businessTypes": {
                "order": { "strategy": "VOLATILE", "batchSize": 50, "startValue": 1000 }
            }
        }"#;
        let config: RegistryConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.default_strategy, StrategyKind::Ledger);
        assert_eq!(config.volatile.ttl(), Some(Duration::from_secs(3600)));
        assert_eq!(config.volatile.namespace, "sequin:id:");
        assert_eq!(config.ledger, LedgerConfig::default());
        assert_eq!(config.business_types["order"].start_value, 1000);
    }
}
