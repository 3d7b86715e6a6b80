use crate::config::{BusinessTypeConfig, StrategyKind};

/// Snapshot of one materialized counter as a strategy sees it.
///
/// `current_max` is the last ID handed out (or `start_value - 1` before the
/// first claim). `total_issued` counts every ID ever claimed since creation or
/// the last reset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CounterState {
    pub business_type: String,
    pub current_max: i64,
    pub total_issued: i64,
    /// Batch size recorded alongside the counter, if the backend keeps one.
    pub step_size: Option<u32>,
    pub created_at_millis: Option<i64>,
    pub updated_at_millis: Option<i64>,
    pub note: Option<String>,
}

/// Read-only view of a business type returned by the status operations.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct IdStatus {
    pub business_type: String,
    pub current_max_id: i64,
    pub total_generated: i64,
    pub strategy: StrategyKind,
    pub batch_size: u32,
    /// `false` when the business type has no counter yet, or it was removed.
    pub available: bool,
    pub created_at_millis: Option<i64>,
    pub updated_at_millis: Option<i64>,
    pub note: Option<String>,
}

impl IdStatus {
    /// Status for a business type that has no counter.
    pub fn unavailable(business_type: &str, config: &BusinessTypeConfig) -> Self {
        Self {
            business_type: business_type.to_owned(),
            current_max_id: 0,
            total_generated: 0,
            strategy: config.strategy,
            batch_size: config.batch_size,
            available: false,
            created_at_millis: None,
            updated_at_millis: None,
            note: None,
        }
    }

    /// Projects a materialized counter. A batch size stored with the counter
    /// takes precedence over the configured one.
    pub fn from_state(state: CounterState, config: &BusinessTypeConfig) -> Self {
        Self {
            business_type: state.business_type,
            current_max_id: state.current_max,
            total_generated: state.total_issued,
            strategy: config.strategy,
            batch_size: state.step_size.unwrap_or(config.batch_size),
            available: true,
            created_at_millis: state.created_at_millis,
            updated_at_millis: state.updated_at_millis,
            note: state.note,
        }
    }
}
