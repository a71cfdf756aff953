//! flotilla-load — pending-ticket load aggregation.
//!
//! Upstream ticket systems report pending work per *external* processor
//! name. This crate fans out to all configured [`LoadProvider`]s
//! concurrently, tolerates partial provider failure, merges counts by
//! canonical name (after alias mapping), and resolves names to known
//! processor ids. Names that resolve to no known candidate are dropped
//! with a warning — the engine never invents processors from load data.
//!
//! Providers are selected from configuration through a small
//! [`ProviderRegistry`] so deployments can enable exactly the sources
//! they have.

pub mod aggregator;
pub mod provider;
pub mod registry;

pub use aggregator::LoadAggregator;
pub use provider::{FileLoadProvider, LoadProvider, StaticLoadProvider};
pub use registry::{ProviderConfig, ProviderRegistry};
