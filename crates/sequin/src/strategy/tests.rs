use core::time::Duration;
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use async_trait::async_trait;

use super::*;
use crate::{
    config::VolatileConfig,
    error::Error,
    store::{
        CounterInfo, CounterWrite, IncrementRequest, KeyValueStore, LedgerRow, LedgerStore,
        MemoryKvStore, MemoryLedgerStore,
    },
    time::ManualClock,
};

const NOW: i64 = 1_700_000_000_000;

fn config(strategy: StrategyKind, start_value: i64) -> BusinessTypeConfig {
    BusinessTypeConfig::new(strategy, 10, start_value).unwrap()
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(2),
    }
}

fn volatile(ttl_secs: Option<u64>) -> (VolatileCounterStrategy<MemoryKvStore>, ManualClock) {
    let clock = ManualClock::new(NOW);
    let store = MemoryKvStore::new(Arc::new(clock.clone()));
    let config = VolatileConfig {
        ttl_secs,
        ..VolatileConfig::default()
    };
    (
        VolatileCounterStrategy::new(store, &config, Arc::new(clock.clone())),
        clock,
    )
}

fn ledger() -> LedgerCounterStrategy<MemoryLedgerStore> {
    ledger_over(MemoryLedgerStore::default(), 8)
}

fn ledger_over<S: LedgerStore>(store: S, max_attempts: u32) -> LedgerCounterStrategy<S> {
    LedgerCounterStrategy::new(
        store,
        fast_retry(max_attempts),
        Arc::new(ManualClock::new(NOW)),
    )
}

async fn run_sequential_claims<S: CounterStrategy>(strategy: &S) {
    let cfg = config(strategy.kind(), 1);
    strategy.ensure_exists("order", &cfg).await.unwrap();

    let first = strategy.claim_segment("order", 100, &cfg).await.unwrap();
    assert_eq!((first.start_id, first.end_id, first.segment_size), (1, 100, 100));
    assert_eq!(first.issued_at_millis, NOW);

    let second = strategy.claim_segment("order", 50, &cfg).await.unwrap();
    assert_eq!((second.start_id, second.end_id), (101, 150));
}

async fn run_claim_without_ensure<S: CounterStrategy>(strategy: &S) {
    let cfg = config(strategy.kind(), 42);
    let segment = strategy.claim_segment("fresh", 3, &cfg).await.unwrap();
    assert_eq!((segment.start_id, segment.end_id), (42, 44));
}

async fn run_ensure_is_idempotent<S: CounterStrategy>(strategy: &S) {
    let cfg = config(strategy.kind(), 1);
    strategy.ensure_exists("order", &cfg).await.unwrap();
    strategy.claim_segment("order", 5, &cfg).await.unwrap();
    strategy.ensure_exists("order", &cfg).await.unwrap();
    let next = strategy.claim_segment("order", 1, &cfg).await.unwrap();
    assert_eq!(next.start_id, 6);
}

async fn run_init_is_idempotent<S: CounterStrategy>(strategy: &S) {
    let cfg = config(strategy.kind(), 1);
    assert!(strategy.init("article", 500, &cfg).await.unwrap());
    assert!(!strategy.init("article", 7, &cfg).await.unwrap());
    let segment = strategy.claim_segment("article", 1, &cfg).await.unwrap();
    assert_eq!(segment.start_id, 500);
}

async fn run_reset<S: CounterStrategy>(strategy: &S) {
    let cfg = config(strategy.kind(), 1);
    strategy.claim_segment("order", 20, &cfg).await.unwrap();
    strategy.reset("order", 1000, &cfg).await.unwrap();

    let state = strategy.status("order").await.unwrap().unwrap();
    assert_eq!(state.current_max, 999);
    assert_eq!(state.total_issued, 0);

    let next = strategy.claim_segment("order", 1, &cfg).await.unwrap();
    assert_eq!(next.start_id, 1000);
}

async fn run_reset_unseen_materializes<S: CounterStrategy>(strategy: &S) {
    let cfg = config(strategy.kind(), 1);
    strategy.reset("never-used", 77, &cfg).await.unwrap();
    assert!(strategy.status("never-used").await.unwrap().is_some());
    let next = strategy.claim_segment("never-used", 1, &cfg).await.unwrap();
    assert_eq!(next.start_id, 77);
}

async fn run_status_is_read_only<S: CounterStrategy>(strategy: &S) {
    assert_eq!(strategy.status("ghost").await.unwrap(), None);
    assert!(strategy.materialized().await.unwrap().is_empty());

    let cfg = config(strategy.kind(), 1);
    strategy.claim_segment("order", 4, &cfg).await.unwrap();
    strategy.claim_segment("order", 6, &cfg).await.unwrap();
    let state = strategy.status("order").await.unwrap().unwrap();
    assert_eq!(state.current_max, 10);
    assert_eq!(state.total_issued, 10);
    assert_eq!(state.updated_at_millis, Some(NOW));
}

async fn run_remove_then_reuse<S: CounterStrategy>(strategy: &S) {
    let cfg = config(strategy.kind(), 500);
    strategy.init("t1", 500, &cfg).await.unwrap();
    assert_eq!(strategy.claim_segment("t1", 1, &cfg).await.unwrap().start_id, 500);

    assert!(strategy.remove("t1").await.unwrap());
    assert_eq!(strategy.status("t1").await.unwrap(), None);
    assert!(!strategy.remove("t1").await.unwrap());

    strategy.ensure_exists("t1", &cfg).await.unwrap();
    assert_eq!(strategy.claim_segment("t1", 1, &cfg).await.unwrap().start_id, 500);
}

async fn run_materialized_lists_business_types<S: CounterStrategy>(strategy: &S) {
    let cfg = config(strategy.kind(), 1);
    for bt in ["user", "article", "order"] {
        strategy.claim_segment(bt, 1, &cfg).await.unwrap();
    }
    let mut listed = strategy.materialized().await.unwrap();
    listed.sort();
    assert_eq!(listed, ["article", "order", "user"]);
}

async fn run_overflow_is_reported<S: CounterStrategy>(strategy: &S) {
    let cfg = config(strategy.kind(), 1);
    strategy.reset("big", i64::MAX - 5, &cfg).await.unwrap();
    assert!(matches!(
        strategy.claim_segment("big", 7, &cfg).await,
        Err(Error::CounterOverflow { .. })
    ));
    let last = strategy.claim_segment("big", 6, &cfg).await.unwrap();
    assert_eq!(last.end_id, i64::MAX);
}

async fn run_zero_size_is_rejected<S: CounterStrategy>(strategy: &S) {
    let cfg = config(strategy.kind(), 1);
    assert!(matches!(
        strategy.claim_segment("order", 0, &cfg).await,
        Err(Error::InvalidArgument { .. })
    ));
}

async fn run_concurrent_claims_are_disjoint<S: CounterStrategy>(strategy: Arc<S>) {
    const WORKERS: usize = 8;
    const CLAIMS: usize = 50;
    const SIZE: u32 = 3;
    let cfg = config(strategy.kind(), 1000);

    let mut handles = Vec::with_capacity(WORKERS);
    for _ in 0..WORKERS {
        let strategy = Arc::clone(&strategy);
        let cfg = cfg.clone();
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::with_capacity(CLAIMS * SIZE as usize);
            for _ in 0..CLAIMS {
                let segment = strategy.claim_segment("shared", SIZE, &cfg).await.unwrap();
                ids.extend(segment.ids());
            }
            ids
        }));
    }

    let mut seen = HashSet::new();
    for handle in futures::future::join_all(handles).await {
        for id in handle.unwrap() {
            assert!(seen.insert(id), "duplicate id {id}");
        }
    }
    let total = WORKERS * CLAIMS * SIZE as usize;
    assert_eq!(seen.len(), total);
    assert_eq!(seen.iter().min(), Some(&1000));
    assert_eq!(seen.iter().max(), Some(&(1000 + total as i64 - 1)));
}

macro_rules! strategy_suite {
    ($module:ident, $make:expr) => {
        mod $module {
            use super::*;

            #[tokio::test]
            async fn sequential_claims() {
                run_sequential_claims(&$make).await;
            }

            #[tokio::test]
            async fn claim_without_ensure() {
                run_claim_without_ensure(&$make).await;
            }

            #[tokio::test]
            async fn ensure_is_idempotent() {
                run_ensure_is_idempotent(&$make).await;
            }

            #[tokio::test]
            async fn init_is_idempotent() {
                run_init_is_idempotent(&$make).await;
            }

            #[tokio::test]
            async fn reset() {
                run_reset(&$make).await;
            }

            #[tokio::test]
            async fn reset_unseen_materializes() {
                run_reset_unseen_materializes(&$make).await;
            }

            #[tokio::test]
            async fn status_is_read_only() {
                run_status_is_read_only(&$make).await;
            }

            #[tokio::test]
            async fn remove_then_reuse() {
                run_remove_then_reuse(&$make).await;
            }

            #[tokio::test]
            async fn materialized_lists_business_types() {
                run_materialized_lists_business_types(&$make).await;
            }

            #[tokio::test]
            async fn overflow_is_reported() {
                run_overflow_is_reported(&$make).await;
            }

            #[tokio::test]
            async fn zero_size_is_rejected() {
                run_zero_size_is_rejected(&$make).await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn concurrent_claims_are_disjoint() {
                run_concurrent_claims_are_disjoint(Arc::new($make)).await;
            }
        }
    };
}

strategy_suite!(volatile_suite, volatile(None).0);
strategy_suite!(ledger_suite, ledger());

#[tokio::test]
async fn volatile_ttl_restarts_counter() {
    let (strategy, clock) = volatile(Some(60));
    assert_eq!(strategy.ttl(), Some(Duration::from_secs(60)));
    let cfg = config(StrategyKind::Volatile, 100);

    assert_eq!(strategy.claim_segment("order", 5, &cfg).await.unwrap().end_id, 104);
    clock.advance(30_000);
    // Claims refresh the deadline.
    assert_eq!(strategy.claim_segment("order", 5, &cfg).await.unwrap().start_id, 105);
    clock.advance(59_000);
    assert!(strategy.status("order").await.unwrap().is_some());

    clock.advance(1_000);
    assert_eq!(strategy.status("order").await.unwrap(), None);
    let restarted = strategy.claim_segment("order", 5, &cfg).await.unwrap();
    assert_eq!(restarted.start_id, 100);
}

#[tokio::test]
async fn volatile_without_ttl_never_expires() {
    let (strategy, clock) = volatile(None);
    let cfg = config(StrategyKind::Volatile, 1);
    strategy.claim_segment("order", 5, &cfg).await.unwrap();
    clock.advance(365 * 24 * 3_600 * 1_000);
    assert_eq!(strategy.claim_segment("order", 1, &cfg).await.unwrap().start_id, 6);
}

#[tokio::test]
async fn volatile_keys_are_namespaced() {
    let (strategy, _) = volatile(None);
    let cfg = config(StrategyKind::Volatile, 1);
    strategy.claim_segment("order", 1, &cfg).await.unwrap();
    assert_eq!(
        strategy.store().scan_prefix("").await.unwrap(),
        ["sequin:id:counter:order", "sequin:id:info:order"]
    );
    assert_eq!(strategy.materialized().await.unwrap(), ["order"]);
}

#[tokio::test]
async fn ledger_row_records_step_size_and_remark() {
    let strategy = ledger();
    let cfg = BusinessTypeConfig::new(StrategyKind::Ledger, 250, 1).unwrap();
    strategy.ensure_exists("order", &cfg).await.unwrap();
    let state = strategy.status("order").await.unwrap().unwrap();
    assert_eq!(state.step_size, Some(250));
    assert_eq!(state.note.as_deref(), Some("Auto initialized"));
    assert_eq!(state.created_at_millis, Some(NOW));
}

#[tokio::test]
async fn ledger_remove_drops_lock_handle() {
    let strategy = ledger();
    let cfg = config(StrategyKind::Ledger, 1);
    strategy.claim_segment("order", 1, &cfg).await.unwrap();
    assert_eq!(strategy.lock_count(), 1);
    strategy.remove("order").await.unwrap();
    assert_eq!(strategy.lock_count(), 0);
}

/// Ledger store that loses the first `lose` conditional updates.
struct ContendedLedger {
    inner: MemoryLedgerStore,
    lose: AtomicU32,
    cas_calls: AtomicU32,
}

impl ContendedLedger {
    fn losing(lose: u32) -> Self {
        Self {
            inner: MemoryLedgerStore::default(),
            lose: AtomicU32::new(lose),
            cas_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl LedgerStore for ContendedLedger {
    async fn insert_if_absent(&self, row: LedgerRow) -> crate::Result<bool> {
        self.inner.insert_if_absent(row).await
    }

    async fn select(&self, business_type: &str) -> crate::Result<Option<LedgerRow>> {
        self.inner.select(business_type).await
    }

    async fn compare_and_set_max(
        &self,
        business_type: &str,
        expected: i64,
        new_max: i64,
        increment: i64,
        now_millis: i64,
    ) -> crate::Result<u64> {
        self.cas_calls.fetch_add(1, Ordering::SeqCst);
        let lost = self
            .lose
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Ok(0);
        }
        self.inner
            .compare_and_set_max(business_type, expected, new_max, increment, now_millis)
            .await
    }

    async fn reset(&self, business_type: &str, max_id: i64, now_millis: i64) -> crate::Result<u64> {
        self.inner.reset(business_type, max_id, now_millis).await
    }

    async fn delete(&self, business_type: &str) -> crate::Result<u64> {
        self.inner.delete(business_type).await
    }

    async fn select_all(&self) -> crate::Result<Vec<LedgerRow>> {
        self.inner.select_all().await
    }
}

#[tokio::test]
async fn ledger_recovers_from_lost_races() {
    let strategy = ledger_over(ContendedLedger::losing(3), 5);
    let cfg = config(StrategyKind::Ledger, 1);
    strategy.ensure_exists("order", &cfg).await.unwrap();

    let segment = strategy.claim_segment("order", 10, &cfg).await.unwrap();
    assert_eq!((segment.start_id, segment.end_id), (1, 10));
    assert_eq!(strategy.store().cas_calls.load(Ordering::SeqCst), 4);

    let next = strategy.claim_segment("order", 10, &cfg).await.unwrap();
    assert_eq!(next.start_id, 11);
}

#[tokio::test]
async fn ledger_gives_up_after_max_attempts() {
    let strategy = ledger_over(ContendedLedger::losing(u32::MAX), 6);
    let cfg = config(StrategyKind::Ledger, 1);
    strategy.ensure_exists("order", &cfg).await.unwrap();

    let err = strategy.claim_segment("order", 10, &cfg).await.unwrap_err();
    assert_eq!(
        err,
        Error::ResourceExhausted {
            business_type: "order".to_owned(),
            attempts: 6,
        }
    );
    assert!(err.is_retryable());
    assert_eq!(strategy.store().cas_calls.load(Ordering::SeqCst), 6);
    assert_eq!(strategy.status("order").await.unwrap().unwrap().current_max, 0);
}

/// Key-value store whose every call fails.
struct DownKv;

#[async_trait]
impl KeyValueStore for DownKv {
    async fn increment_segment(&self, _: IncrementRequest<'_>) -> crate::Result<Option<i64>> {
        Err(Error::unavailable("connection refused"))
    }

    async fn init_counter(&self, _: CounterWrite<'_>) -> crate::Result<bool> {
        Err(Error::unavailable("connection refused"))
    }

    async fn set_counter(&self, _: CounterWrite<'_>) -> crate::Result<()> {
        Err(Error::unavailable("connection refused"))
    }

    async fn get_counter(&self, _: &str) -> crate::Result<Option<i64>> {
        Err(Error::unavailable("connection refused"))
    }

    async fn get_info(&self, _: &str) -> crate::Result<Option<CounterInfo>> {
        Err(Error::unavailable("connection refused"))
    }

    async fn scan_prefix(&self, _: &str) -> crate::Result<Vec<String>> {
        Err(Error::unavailable("connection refused"))
    }

    async fn delete(&self, _: &[&str]) -> crate::Result<u64> {
        Err(Error::unavailable("connection refused"))
    }
}

#[tokio::test]
async fn volatile_backend_errors_propagate() {
    let strategy = VolatileCounterStrategy::new(
        DownKv,
        &VolatileConfig::default(),
        Arc::new(ManualClock::new(NOW)),
    );
    let cfg = config(StrategyKind::Volatile, 1);
    let err = strategy.claim_segment("order", 1, &cfg).await.unwrap_err();
    assert!(matches!(err, Error::Unavailable { .. }));
    assert!(strategy.status("order").await.is_err());
}
