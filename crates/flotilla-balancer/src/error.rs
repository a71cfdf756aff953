//! Balancing engine error types.

use thiserror::Error;

/// Errors that abort a balancing cycle.
///
/// Mutation failures are deliberately absent: a failed insert or delete is
/// recovered locally inside the cycle and never escalates.
#[derive(Debug, Error)]
pub enum BalancerError {
    /// A store read failed while assembling or re-checking state. Acting on
    /// a partial snapshot is unsafe, so the whole cycle is abandoned before
    /// any further mutation.
    #[error("snapshot failed: {0}")]
    Snapshot(#[from] flotilla_state::StateError),
}

pub type BalancerResult<T> = Result<T, BalancerError>;
