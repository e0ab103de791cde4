//! Per-[`TaskKind`] commit/compensate strategies.
//!
//! Dispatch is a match on a tagged enum rather than a trait-object
//! hierarchy per node: there are exactly three kinds of node and each is a
//! handful of lines, so the tagged-variant form stays the simpler one to
//! read.

use tracing::instrument;

use crate::dag::{Request, TaskKind};
use crate::event::Event;
use crate::store::{EventStore, StorageError};

/// The outcome of driving a [`Request`] one step, distinguishing a business
/// failure (recoverable, handed to the [`crate::policy::RecoveryPolicy`])
/// from a storage failure (fatal, never retried by the runner itself).
#[derive(Debug)]
pub enum RunnerError {
    /// The capability returned `Err`; `cause` is its reason.
    Failed(String),
    /// The event store rejected an append.
    Storage(StorageError),
}

impl From<StorageError> for RunnerError {
    fn from(e: StorageError) -> Self {
        RunnerError::Storage(e)
    }
}

/// Run `request`'s commit path: start/attempt/end (or abort) its
/// transaction, recording every step.
#[instrument(skip(store, request), fields(request = %request.id))]
pub async fn commit(store: &dyn EventStore, node: u64, request: &Request) -> Result<(), RunnerError> {
    match request.runner {
        TaskKind::SagaStart => {
            store.append(Event::SagaStarted).await?;
            Ok(())
        }
        TaskKind::Process => {
            store.append(Event::TransactionStarted { node }).await?;
            match request.transaction.run().await {
                Ok(()) => {
                    store.append(Event::TransactionEnded { node }).await?;
                    Ok(())
                }
                Err(cause) => {
                    store
                        .append(Event::TransactionAborted {
                            node,
                            cause: cause.clone(),
                        })
                        .await?;
                    Err(RunnerError::Failed(cause))
                }
            }
        }
        TaskKind::SagaEnd => {
            store.append(Event::SagaEnded { aborted: false }).await?;
            Ok(())
        }
    }
}

/// Run `request`'s compensation path: start/attempt/end its compensation.
#[instrument(skip(store, request), fields(request = %request.id))]
pub async fn compensate(
    store: &dyn EventStore,
    node: u64,
    request: &Request,
) -> Result<(), RunnerError> {
    match request.runner {
        TaskKind::SagaStart => {
            store.append(Event::SagaEnded { aborted: true }).await?;
            Ok(())
        }
        TaskKind::Process => {
            store.append(Event::CompensationStarted { node }).await?;
            match request.compensation.run().await {
                Ok(()) => {
                    store.append(Event::CompensationEnded { node }).await?;
                    Ok(())
                }
                Err(cause) => Err(RunnerError::Failed(cause)),
            }
        }
        TaskKind::SagaEnd => {
            store.append(Event::SagaEnded { aborted: true }).await?;
            Ok(())
        }
    }
}
