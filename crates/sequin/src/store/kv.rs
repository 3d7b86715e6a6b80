use core::time::Duration;
use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{error::Result, time::TimeSource};

/// Metadata hash kept next to a volatile counter.
///
/// It is folded in the same atomic unit as the counter, but only the counter
/// key itself decides which IDs are free.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CounterInfo {
    pub max_id: i64,
    pub total_generated: i64,
    pub created_at_millis: Option<i64>,
    pub updated_at_millis: i64,
}

/// Arguments to [`KeyValueStore::increment_segment`].
#[derive(Clone, Copy, Debug)]
pub struct IncrementRequest<'a> {
    pub key: &'a str,
    pub info_key: &'a str,
    pub delta: i64,
    /// Seed value when the counter key is absent (first use or expired).
    pub initial: i64,
    pub ttl: Option<Duration>,
    pub now_millis: i64,
}

/// Arguments to [`KeyValueStore::init_counter`] and
/// [`KeyValueStore::set_counter`].
#[derive(Clone, Copy, Debug)]
pub struct CounterWrite<'a> {
    pub key: &'a str,
    pub info_key: &'a str,
    pub value: i64,
    pub ttl: Option<Duration>,
    pub now_millis: i64,
}

/// A key-value store with atomic counters and expiring keys, shaped after
/// what a Redis deployment offers through a server-side script.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Atomically seeds the counter with `initial` if absent, adds `delta`,
    /// refreshes the expiry and folds the claim into the metadata hash.
    ///
    /// Returns the new counter value, or `None` if the addition would overflow
    /// (in which case nothing is written).
    async fn increment_segment(&self, request: IncrementRequest<'_>) -> Result<Option<i64>>;

    /// Writes the counter and a fresh metadata hash only if the counter is
    /// absent. Returns whether it wrote.
    async fn init_counter(&self, write: CounterWrite<'_>) -> Result<bool>;

    /// Unconditionally overwrites the counter and zeroes the issued total.
    async fn set_counter(&self, write: CounterWrite<'_>) -> Result<()>;

    async fn get_counter(&self, key: &str) -> Result<Option<i64>>;

    async fn get_info(&self, info_key: &str) -> Result<Option<CounterInfo>>;

    /// Lists live keys starting with `prefix`, sorted.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Deletes the given keys and returns how many existed.
    async fn delete(&self, keys: &[&str]) -> Result<u64>;
}

#[derive(Debug)]
struct Expiring<T> {
    value: T,
    expires_at: Option<i64>,
}

impl<T> Expiring<T> {
    fn live(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|deadline| now < deadline)
    }

    fn refresh(&mut self, ttl: Option<Duration>, now: i64) {
        if let Some(ttl) = ttl {
            self.expires_at = Some(deadline(ttl, now));
        }
    }
}

fn deadline(ttl: Duration, now: i64) -> i64 {
    now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

#[derive(Debug, Default)]
struct KvState {
    counters: HashMap<String, Expiring<i64>>,
    infos: HashMap<String, Expiring<CounterInfo>>,
}

impl KvState {
    fn purge(&mut self, now: i64) {
        self.counters.retain(|_, e| e.live(now));
        self.infos.retain(|_, e| e.live(now));
    }

    fn write_fresh(&mut self, write: &CounterWrite<'_>, created_at: Option<i64>) {
        let expires_at = write.ttl.map(|ttl| deadline(ttl, write.now_millis));
        self.counters.insert(
            write.key.to_owned(),
            Expiring {
                value: write.value,
                expires_at,
            },
        );
        self.infos.insert(
            write.info_key.to_owned(),
            Expiring {
                value: CounterInfo {
                    max_id: write.value,
                    total_generated: 0,
                    created_at_millis: created_at.or(Some(write.now_millis)),
                    updated_at_millis: write.now_millis,
                },
                expires_at,
            },
        );
    }
}

/// In-memory [`KeyValueStore`].
///
/// Key expiry is judged against the supplied [`TimeSource`], so a manual
/// clock can push keys past their deadline in tests.
pub struct MemoryKvStore {
    clock: Arc<dyn TimeSource>,
    state: Mutex<KvState>,
}

impl MemoryKvStore {
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            clock,
            state: Mutex::new(KvState::default()),
        }
    }

    /// Number of live keys, counters and metadata together.
    pub fn len(&self) -> usize {
        let now = self.clock.current_millis();
        let mut state = self.state.lock();
        state.purge(now);
        state.counters.len() + state.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl core::fmt::Debug for MemoryKvStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryKvStore")
            .field("keys", &self.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn increment_segment(&self, request: IncrementRequest<'_>) -> Result<Option<i64>> {
        let now = self.clock.current_millis();
        let mut state = self.state.lock();
        state.purge(now);

        let current = state
            .counters
            .get(request.key)
            .map_or(request.initial, |e| e.value);
        let Some(new_max) = current.checked_add(request.delta) else {
            return Ok(None);
        };

        let counter = state
            .counters
            .entry(request.key.to_owned())
            .or_insert(Expiring {
                value: new_max,
                expires_at: None,
            });
        counter.value = new_max;
        counter.refresh(request.ttl, request.now_millis);

        let info = state
            .infos
            .entry(request.info_key.to_owned())
            .or_insert(Expiring {
                value: CounterInfo {
                    max_id: new_max,
                    total_generated: 0,
                    created_at_millis: Some(request.now_millis),
                    updated_at_millis: request.now_millis,
                },
                expires_at: None,
            });
        info.value.max_id = new_max;
        info.value.total_generated = info.value.total_generated.saturating_add(request.delta);
        info.value.updated_at_millis = request.now_millis;
        info.refresh(request.ttl, request.now_millis);

        Ok(Some(new_max))
    }

    async fn init_counter(&self, write: CounterWrite<'_>) -> Result<bool> {
        let now = self.clock.current_millis();
        let mut state = self.state.lock();
        state.purge(now);
        if state.counters.contains_key(write.key) {
            return Ok(false);
        }
        state.write_fresh(&write, None);
        Ok(true)
    }

    async fn set_counter(&self, write: CounterWrite<'_>) -> Result<()> {
        let now = self.clock.current_millis();
        let mut state = self.state.lock();
        state.purge(now);
        let created_at = state
            .infos
            .get(write.info_key)
            .and_then(|e| e.value.created_at_millis);
        state.write_fresh(&write, created_at);
        Ok(())
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>> {
        let now = self.clock.current_millis();
        let mut state = self.state.lock();
        state.purge(now);
        Ok(state.counters.get(key).map(|e| e.value))
    }

    async fn get_info(&self, info_key: &str) -> Result<Option<CounterInfo>> {
        let now = self.clock.current_millis();
        let mut state = self.state.lock();
        state.purge(now);
        Ok(state.infos.get(info_key).map(|e| e.value.clone()))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now = self.clock.current_millis();
        let mut state = self.state.lock();
        state.purge(now);
        let mut keys: Vec<String> = state
            .counters
            .keys()
            .chain(state.infos.keys())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn delete(&self, keys: &[&str]) -> Result<u64> {
        let now = self.clock.current_millis();
        let mut state = self.state.lock();
        state.purge(now);
        let mut removed = 0;
        for key in keys {
            if state.counters.remove(*key).is_some() {
                removed += 1;
            }
            if state.infos.remove(*key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
