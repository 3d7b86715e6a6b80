use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;

/// One counter row in the ledger table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerRow {
    pub business_type: String,
    pub max_id: i64,
    pub step_size: u32,
    pub total_generated: i64,
    pub created_at_millis: i64,
    pub updated_at_millis: i64,
    pub remark: Option<String>,
}

/// A relational table holding one counter row per business type.
///
/// `business_type` is the primary key. `max_id` doubles as the optimistic
/// lock version: [`LedgerStore::compare_and_set_max`] only succeeds while it
/// still holds the value the caller read.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Unique-key insert. Returns `false` if a row already exists.
    async fn insert_if_absent(&self, row: LedgerRow) -> Result<bool>;

    async fn select(&self, business_type: &str) -> Result<Option<LedgerRow>>;

    /// `UPDATE .. SET max_id = new_max, total_generated = total_generated +
    /// increment, updated_at = now WHERE business_type = ? AND max_id =
    /// expected`. Returns the number of rows affected.
    async fn compare_and_set_max(
        &self,
        business_type: &str,
        expected: i64,
        new_max: i64,
        increment: i64,
        now_millis: i64,
    ) -> Result<u64>;

    /// Unconditional `SET max_id = max_id, total_generated = 0`. Returns the
    /// number of rows affected.
    async fn reset(&self, business_type: &str, max_id: i64, now_millis: i64) -> Result<u64>;

    async fn delete(&self, business_type: &str) -> Result<u64>;

    /// Every row, ordered by business type.
    async fn select_all(&self) -> Result<Vec<LedgerRow>>;
}

/// In-memory [`LedgerStore`].
#[derive(Debug)]
pub struct MemoryLedgerStore {
    table: String,
    rows: Mutex<BTreeMap<String, LedgerRow>>,
}

impl MemoryLedgerStore {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new("id_generator")
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert_if_absent(&self, row: LedgerRow) -> Result<bool> {
        let mut rows = self.rows.lock();
        if rows.contains_key(&row.business_type) {
            return Ok(false);
        }
        rows.insert(row.business_type.clone(), row);
        Ok(true)
    }

    async fn select(&self, business_type: &str) -> Result<Option<LedgerRow>> {
        Ok(self.rows.lock().get(business_type).cloned())
    }

    async fn compare_and_set_max(
        &self,
        business_type: &str,
        expected: i64,
        new_max: i64,
        increment: i64,
        now_millis: i64,
    ) -> Result<u64> {
        let mut rows = self.rows.lock();
        match rows.get_mut(business_type) {
            Some(row) if row.max_id == expected => {
                row.max_id = new_max;
                row.total_generated = row.total_generated.saturating_add(increment);
                row.updated_at_millis = now_millis;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn reset(&self, business_type: &str, max_id: i64, now_millis: i64) -> Result<u64> {
        let mut rows = self.rows.lock();
        let Some(row) = rows.get_mut(business_type) else {
            return Ok(0);
        };
        row.max_id = max_id;
        row.total_generated = 0;
        row.updated_at_millis = now_millis;
        Ok(1)
    }

    async fn delete(&self, business_type: &str) -> Result<u64> {
        Ok(u64::from(self.rows.lock().remove(business_type).is_some()))
    }

    async fn select_all(&self) -> Result<Vec<LedgerRow>> {
        Ok(self.rows.lock().values().cloned().collect())
    }
}
