//! Common utilities shared across courier crates
//!
//! This crate provides the pieces every courier component needs:
//! error types and observability (logging/tracing) setup.
//!
//! # Module Organization
//!
//! - [`errors`]: Error types and result aliases
//! - [`observability`]: Logging and tracing initialization

pub mod errors;
pub mod observability;

// Re-export commonly used items at the crate root
pub use errors::{CourierError, CourierResult};
pub use observability::init_tracing;
