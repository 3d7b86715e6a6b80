/// A result type that defaults to the crate [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors that `sequin` can surface to a caller.
///
/// Every public operation returns either a complete typed result or exactly
/// one of these variants; there are no partial successes. Optimistic-lock
/// conflicts in the ledger strategy are not represented here because they are
/// retried internally and only surface as [`Error::ResourceExhausted`] once the
/// retry budget is spent.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The caller supplied malformed or out-of-range input.
    ///
    /// Raised before any backend call is made. Retrying without changing the
    /// input never helps.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The business type has no materialized counter and the operation is not
    /// allowed to create one.
    #[error("Business type not found: {business_type}")]
    NotFound { business_type: String },

    /// The ledger compare-and-swap loop lost every race it was allowed to
    /// attempt.
    #[error("Gave up on business type {business_type} after {attempts} conflicting attempts")]
    ResourceExhausted { business_type: String, attempts: u32 },

    /// The backing store could not be reached or refused the request.
    #[error("Backend unavailable: {context}")]
    Unavailable { context: String },

    /// Advancing the counter would overflow a signed 64-bit integer.
    #[error("Counter overflow for business type: {business_type}")]
    CounterOverflow { business_type: String },
}

impl Error {
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(business_type: &str) -> Self {
        Self::NotFound {
            business_type: business_type.to_owned(),
        }
    }

    pub(crate) fn overflow(business_type: &str) -> Self {
        Self::CounterOverflow {
            business_type: business_type.to_owned(),
        }
    }

    /// Creates an [`Error::Unavailable`] with the given context.
    ///
    /// Backing-store implementations use this to report transport or server
    /// failures.
    pub fn unavailable(context: impl Into<String>) -> Self {
        Self::Unavailable {
            context: context.into(),
        }
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Contention and outages are transient; bad input, missing counters and
    /// overflow are not.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. } | Self::Unavailable { .. })
    }
}
