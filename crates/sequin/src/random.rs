use rand::{Rng, rng};

/// A trait for random sources that return a uniformly distributed integer
/// below a bound.
///
/// Used for backoff jitter and for the low digits of fallback IDs. Plug in a
/// fixed source to make either deterministic in tests.
///
/// # Example
/// ```
/// use sequin::RandSource;
///
/// struct FixedRand;
/// impl RandSource for FixedRand {
///     fn below(&self, bound: u64) -> u64 {
///         bound.saturating_sub(1)
///     }
/// }
///
/// assert_eq!(FixedRand.below(10_000), 9_999);
/// ```
pub trait RandSource: Send + Sync {
    /// Returns a value in `[0, bound)`, or 0 when `bound` is 0.
    fn below(&self, bound: u64) -> u64;
}

/// A `RandSource` that uses the thread-local RNG (`rand::rng()`).
///
/// The type does not store the RNG; every call reaches for the calling
/// thread's generator, so it is safe to share across threads.
#[derive(Default, Clone, Copy, Debug)]
pub struct ThreadRandom;

impl RandSource for ThreadRandom {
    fn below(&self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        rng().random_range(0..bound)
    }
}
