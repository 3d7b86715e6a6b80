use portable_atomic::{AtomicI64, Ordering};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    random::{RandSource, ThreadRandom},
    time::{SystemClock, TimeSource},
};

/// Multiplier applied to the timestamp of a fallback ID; the random low part
/// is drawn from `[0, FALLBACK_SPREAD)`.
pub const FALLBACK_SPREAD: i64 = 10_000;

/// Produces a best-effort ID locally when the allocation service cannot be
/// reached.
///
/// Fallback IDs are not coordinated with the service or with other processes,
/// so they carry a weaker uniqueness guarantee than allocated ones.
pub trait FallbackGenerator: Send + Sync {
    fn fallback_id(&self, business_type: &str) -> i64;
}

/// `now_millis * 10_000 + random[0, 10_000)`, forced strictly increasing
/// within one process.
///
/// IDs land far above anything a counter reaches in practice, which keeps them
/// apart from allocated IDs. Two processes falling back in the same
/// millisecond can still collide.
pub struct TimestampFallback<T = SystemClock, R = ThreadRandom>
where
    T: TimeSource,
    R: RandSource,
{
    last: AtomicI64,
    time: T,
    rand: R,
}

impl TimestampFallback {
    /// A fallback over the system clock and the thread-local RNG.
    pub fn system() -> Self {
        Self::new(SystemClock, ThreadRandom)
    }
}

impl Default for TimestampFallback {
    fn default() -> Self {
        Self::system()
    }
}

impl<T, R> TimestampFallback<T, R>
where
    T: TimeSource,
    R: RandSource,
{
    pub fn new(time: T, rand: R) -> Self {
        Self {
            last: AtomicI64::new(i64::MIN),
            time,
            rand,
        }
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn next_id(&self) -> i64 {
        let jitter = i64::try_from(self.rand.below(FALLBACK_SPREAD as u64)).unwrap_or(0);
        let candidate = self
            .time
            .current_millis()
            .saturating_mul(FALLBACK_SPREAD)
            .saturating_add(jitter);

        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = candidate.max(last.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

impl<T, R> FallbackGenerator for TimestampFallback<T, R>
where
    T: TimeSource,
    R: RandSource,
{
    fn fallback_id(&self, _business_type: &str) -> i64 {
        let id = self.next_id();
        #[cfg(feature = "tracing")]
        tracing::warn!(business_type = _business_type, id, "issued fallback id");
        id
    }
}

impl<T, R> core::fmt::Debug for TimestampFallback<T, R>
where
    T: TimeSource,
    R: RandSource,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TimestampFallback")
            .field("last", &self.last.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
