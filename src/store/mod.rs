//! The append-only event log a saga's progress is recorded in.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::event::{Envelope, Event};

pub use memory::InMemoryEventStore;

/// Failures an [`EventStore`] implementation can report. Any of these is
/// fatal to the saga run that triggered it — per the error model, storage
/// failures are not something a recovery policy can paper over.
#[derive(Debug, Error)]
pub enum StorageError {
    /// [`EventStore::populate`] was called after a live [`EventStore::append`]
    /// has already happened. Replay only makes sense as a prefix loaded
    /// before any live writes.
    #[error("populate() called after a live append has already occurred")]
    AlreadyLive,
    /// The backing store rejected the write for a reason specific to the
    /// implementation (serialization, I/O, connectivity, ...).
    #[error("backing store rejected the write: {0}")]
    Backend(String),
}

/// An append-only, monotonically ordered log of saga [`Event`]s.
///
/// `populate` loads a historical prefix (e.g. recovered from durable
/// storage before this process took over); `append` is the live write path
/// used during a run. Once any `append` has happened, `populate` must
/// refuse — the two are mutually exclusive phases of a single store's
/// lifetime.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append `event`, assigning it the next monotonic id.
    async fn append(&self, event: Event) -> Result<Envelope, StorageError>;

    /// The full log, in append order.
    async fn iterate(&self) -> Vec<Envelope>;

    /// Load a historical prefix before any live append has occurred.
    async fn populate(&self, prefix: Vec<Envelope>) -> Result<(), StorageError>;

    /// Sugar over `iterate().len()`, used by the replay engine to
    /// short-circuit an empty store.
    async fn len(&self) -> usize {
        self.iterate().await.len()
    }

    /// Whether the log holds no events at all.
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
