//! HTTP surface of the allocation service.
//!
//! - [`handler`] - routes and request/response bodies.
//! - [`error`] - mapping of library errors to status codes.

pub mod error;
pub mod handler;
