//! An in-memory [`EventStore`], the batteries-included default analogous to
//! the teacher's `MockEventStore` — real deployments back the trait with a
//! durable store, but the log's invariants are the same either way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::event::{Envelope, Event};
use crate::id::{AtomicIdGenerator, IdGenerator};

use super::{EventStore, StorageError};

/// An [`EventStore`] backed by a `Vec` behind an async `RwLock`.
pub struct InMemoryEventStore {
    log: RwLock<Vec<Envelope>>,
    ids: Arc<dyn IdGenerator>,
    live: AtomicBool,
}

impl InMemoryEventStore {
    /// An empty store using the default [`AtomicIdGenerator`].
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(AtomicIdGenerator::new()))
    }

    /// An empty store using a caller-supplied id generator.
    pub fn with_id_generator(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            log: RwLock::new(Vec::new()),
            ids,
            live: AtomicBool::new(false),
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: Event) -> Result<Envelope, StorageError> {
        self.live.store(true, Ordering::SeqCst);
        let envelope = Envelope {
            id: self.ids.next_id(),
            event,
        };
        self.log.write().await.push(envelope.clone());
        Ok(envelope)
    }

    async fn iterate(&self) -> Vec<Envelope> {
        self.log.read().await.clone()
    }

    async fn populate(&self, prefix: Vec<Envelope>) -> Result<(), StorageError> {
        if self.live.load(Ordering::SeqCst) {
            return Err(StorageError::AlreadyLive);
        }
        let mut log = self.log.write().await;
        if !log.is_empty() {
            return Err(StorageError::AlreadyLive);
        }
        *log = prefix;
        Ok(())
    }
}
