//! flotilla-balancer — the balancing engine.
//!
//! A periodic control loop that decides, for every workload processor, how
//! many compute resources it should hold right now, and which specific
//! resources to grant or revoke. Each cycle:
//!
//! ```text
//! snapshot      one consistent view: pools, assignments, in-use set,
//!               aggregated pending load (fail-fast on any read error)
//! cleanup       release resources of non-candidates and pool-incoherent
//!               assignments
//! per pool      minimum satisfaction, then excess trimming
//! overflow      serve leftover demand from the general pool
//! ```
//!
//! Scale decisions are gated by the cooling manager to prevent thrashing,
//! every mutation is recorded through an [`AuditSink`], and mutation
//! failures recover locally — only a snapshot failure aborts a cycle.

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod snapshot;

pub use audit::{AuditSink, NullAuditSink, StateAuditSink};
pub use config::EngineConfig;
pub use engine::{CycleReport, Engine};
pub use error::{BalancerError, BalancerResult};
pub use snapshot::Snapshot;
