use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use portable_atomic::{AtomicI64, Ordering};

/// A trait for time sources that return wall-clock milliseconds since the
/// UNIX epoch.
///
/// Strategies stamp segments and counter metadata with it, and the in-memory
/// volatile store uses it to decide when a key has expired. Plugging in a
/// [`ManualClock`] makes both deterministic in tests.
///
/// # Example
///
/// ```
/// use sequin::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> i64 {
///         1234
///     }
/// }
///
/// assert_eq!(FixedTime.current_millis(), 1234);
/// ```
pub trait TimeSource: Send + Sync {
    /// Returns the current time in milliseconds since the UNIX epoch.
    fn current_millis(&self) -> i64;
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn current_millis(&self) -> i64 {
        (**self).current_millis()
    }
}

/// The system wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn current_millis(&self) -> i64 {
        // A clock set before 1970 reads as the epoch itself.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying instant, so a test can hand one clone to
/// a store and keep another to advance time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    /// Creates a clock frozen at `millis`.
    pub fn new(millis: i64) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(millis)),
        }
    }

    /// Moves the clock forward by `millis`.
    pub fn advance(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::Relaxed);
    }

    /// Jumps the clock to `millis`.
    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::Relaxed);
    }
}

impl TimeSource for ManualClock {
    fn current_millis(&self) -> i64 {
        self.millis.load(Ordering::Relaxed)
    }
}
