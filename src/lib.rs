//! wyrd - a DAG-driven saga coordinator.
//!
//! A saga is a graph of remote operations ("transactions"), each paired with
//! a compensating action, executed as a long-running unit of work whose
//! atomicity is recovered not by two-phase commit but by running
//! compensations over whatever prefix of transactions actually succeeded.
//!
//! The pieces, dependency-ordered:
//! - [`dag`]: the request graph the coordinator walks.
//! - [`event`] / [`store`]: the append-only log that is the single source
//!   of truth for saga progress.
//! - [`id`]: monotonic envelope ids.
//! - [`runner`]: per-request commit/compensate strategies.
//! - [`policy`]: pluggable forward-vs-backward recovery decisions.
//! - [`scheduler`]: the concurrent forward traversal of the DAG.
//! - [`compensation`]: the backward (compensating) traversal.
//! - [`replay`]: reconstructing scheduler state from a log prefix.
//! - [`saga`]: the façade tying all of the above together.

pub mod compensation;
pub mod config;
pub mod dag;
pub mod error;
pub mod event;
pub mod id;
pub mod policy;
pub mod replay;
pub mod runner;
pub mod saga;
pub mod scheduler;
pub mod store;

pub use config::{CompensationRetryConfig, CoordinatorConfig};
pub use dag::{Capability, Dag, DagBuilder, DagError, NodeId, Request, TaskKind};
pub use error::CoordinatorError;
pub use event::{Envelope, Event};
pub use id::{AtomicIdGenerator, IdGenerator};
pub use policy::{
    BackwardRecovery, ForwardRecovery, ForwardRecoveryConfig, RecoveryDecision, RecoveryPolicy,
};
pub use saga::{Saga, SagaOutcome};
pub use store::{EventStore, InMemoryEventStore, StorageError};
