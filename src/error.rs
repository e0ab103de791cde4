//! Unified error type surfaced by [`crate::saga::Saga::run`].

use thiserror::Error;

use crate::dag::DagError;
use crate::store::StorageError;

/// Fatal coordinator-level failures.
///
/// `TransactionFailure` deliberately has no variant here: a failed
/// transaction is always resolved internally by the configured
/// [`crate::policy::RecoveryPolicy`] (retried or turned into a compensation
/// run) and never escapes as a top-level error.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The event store could not durably record an event. The log's
    /// invariants can no longer be trusted, so the saga is abandoned
    /// in place rather than papered over with a best-effort compensation.
    #[error("event store failure: {0}")]
    Storage(#[from] StorageError),

    /// The DAG supplied to [`crate::saga::Saga::new`] violates one of the
    /// structural invariants (single root, single leaf, acyclic, every node
    /// reachable from root and co-reachable to leaf). Raised synchronously
    /// at construction time, never mid-run.
    #[error("DAG invariant violated: {0}")]
    DagInvariant(#[from] DagError),

    /// A log prefix handed to [`crate::saga::Saga::play`] does not match the
    /// shape the replay engine requires (an event referencing a node the DAG
    /// does not contain, or a compensation event with no preceding
    /// transaction end).
    #[error("event log is inconsistent with the DAG: {0}")]
    ReplayInconsistency(String),

    /// A compensation exhausted its configured retry ceiling without
    /// succeeding. Per the recovery contract this is not something the
    /// coordinator can recover from on its own; it surfaces as a
    /// system-level incident for an operator to resolve.
    #[error("compensation for request '{request_id}' failed permanently: {cause}")]
    Compensation { request_id: String, cause: String },
}
