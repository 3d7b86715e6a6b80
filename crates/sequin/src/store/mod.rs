//! Backing-store contracts for the two counter strategies, plus in-memory
//! implementations of each.
//!
//! Every method on these traits stands for exactly one round trip to the
//! backend. The in-memory stores honour that by doing all the work of a call
//! under a single lock acquisition.

mod kv;
mod ledger;

pub use kv::*;
pub use ledger::*;
