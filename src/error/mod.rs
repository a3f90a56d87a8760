//! Error handling
//!
//! Defines error types for the relay server and its per-target deliveries.

pub mod types;

pub use types::*;
