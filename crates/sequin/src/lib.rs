//! # sequin
//!
//! Segment-based ID allocation. Each business type ("order", "article",
//! "user", ...) owns an independent sequence of unique, strictly increasing
//! `i64` IDs. Callers claim contiguous segments of that sequence; single IDs
//! and batches are segments of size 1 and `n`.
//!
//! Two counter strategies sit behind one contract:
//!
//! - [`VolatileCounterStrategy`] keeps the counter in a [`KeyValueStore`] and
//!   claims with a single atomic increment. Fast; durability is the store's.
//! - [`LedgerCounterStrategy`] keeps a durable row in a [`LedgerStore`] and
//!   claims with a compare-and-swap loop bounded by a [`RetryPolicy`].
//!
//! A [`StrategyRouter`] picks the strategy per business type from the
//! [`BusinessTypeRegistry`], and [`IdAllocationService`] validates input and
//! exposes the public operations.
//!
//! ```
//! use sequin::{BusinessTypeConfig, IdAllocationService, RegistryConfig, StrategyKind};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> sequin::Result<()> {
//! let mut config = RegistryConfig::default();
//! config.business_types.insert(
//!     "order".to_owned(),
//!     BusinessTypeConfig::new(StrategyKind::Ledger, 1000, 10_000)?,
//! );
//! let service = IdAllocationService::in_memory(&config)?;
//!
//! assert_eq!(service.generate_id("order").await?, 10_000);
//! assert_eq!(service.generate_ids("order", 3).await?, [10_001, 10_002, 10_003]);
//! assert_eq!(service.generate_id("user").await?, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `tracing`: structured logs and spans through the `tracing` crate.
//! - `serde`: `Serialize`/`Deserialize` for configuration and result types.

mod client;
mod config;
mod error;
mod fallback;
mod random;
mod router;
mod segment;
mod service;
mod status;
mod store;
mod strategy;
mod time;

pub use crate::client::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::fallback::*;
pub use crate::random::*;
pub use crate::router::*;
pub use crate::segment::*;
pub use crate::service::*;
pub use crate::status::*;
pub use crate::store::*;
pub use crate::strategy::*;
pub use crate::time::*;
