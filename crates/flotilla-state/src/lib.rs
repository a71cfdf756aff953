//! flotilla-state — fleet state persistence for the Flotilla balancer.
//!
//! Holds the durable view of the fleet: processors (workload consumers),
//! resources (fungible compute units), assignments linking the two,
//! execution records, and the append-only decision log written by the
//! balancing engine. Backed by redb with JSON-serialized values; supports
//! both on-disk and in-memory backends (the latter for testing).
//!
//! The balancing engine consumes this crate through the [`ResourceStore`]
//! trait, which captures exactly the read and mutation contracts the engine
//! relies on. [`StateStore`] is the shipped implementation.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{ResourceStore, StateStore};
pub use types::*;
