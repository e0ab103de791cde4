//! The backward scheduler: derives which requests need compensating
//! straight from the event log, then compensates them in reverse causal
//! order (descendants before ancestors), running mutually-unordered
//! siblings concurrently.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::config::CompensationRetryConfig;
use crate::dag::{Dag, NodeId};
use crate::error::CoordinatorError;
use crate::event::Event;
use crate::runner::{self, RunnerError};
use crate::store::EventStore;

/// Every node whose transaction ended but whose compensation has not (yet)
/// ended, read directly from the log rather than trusted in-memory state —
/// the log is the one source of truth a crash mid-run cannot desynchronize
/// from.
fn to_compensate(events: &[crate::event::Envelope]) -> HashSet<NodeId> {
    let mut ended = HashSet::new();
    let mut comp_ended = HashSet::new();
    for envelope in events {
        match &envelope.event {
            Event::TransactionEnded { node } => {
                ended.insert(*node);
            }
            Event::CompensationEnded { node } => {
                comp_ended.insert(*node);
            }
            _ => {}
        }
    }
    ended.difference(&comp_ended).copied().collect()
}

/// Compensate every request in `dag` whose transaction has ended but has
/// not yet been compensated, then terminate the saga via the root's
/// compensation (`SagaEnded { aborted: true }`).
#[instrument(skip(dag, store, retry_config))]
pub async fn run_backward(
    dag: &Dag,
    store: Arc<dyn EventStore>,
    retry_config: &CompensationRetryConfig,
) -> Result<(), CoordinatorError> {
    let mut remaining = to_compensate(&store.iterate().await);
    info!(count = remaining.len(), "compensating requests");

    while !remaining.is_empty() {
        let batch: Vec<NodeId> = remaining
            .iter()
            .copied()
            .filter(|id| dag.descendants(*id).is_disjoint(&remaining))
            .collect();
        debug_assert!(
            !batch.is_empty(),
            "DAG is acyclic, so some node in `remaining` must have no remaining descendants"
        );

        let mut handles = Vec::with_capacity(batch.len());
        for node in batch.iter().copied() {
            let store = Arc::clone(&store);
            let request = dag.request(node).expect("compensated node exists").clone();
            let config = retry_config.clone();
            handles.push(tokio::spawn(async move {
                compensate_with_retry(store.as_ref(), node, &request, &config).await
            }));
        }

        for (node, handle) in batch.into_iter().zip(handles) {
            handle
                .await
                .expect("compensation task panicked")
                .map_err(|cause| CoordinatorError::Compensation {
                    request_id: dag.request(node).map(|r| r.id.clone()).unwrap_or_default(),
                    cause,
                })?;
            remaining.remove(&node);
        }
    }

    let root_request = dag.request(dag.root()).expect("root always present").clone();
    runner::compensate(store.as_ref(), dag.root(), &root_request)
        .await
        .map_err(|e| match e {
            RunnerError::Storage(e) => CoordinatorError::Storage(e),
            RunnerError::Failed(cause) => CoordinatorError::Compensation {
                request_id: root_request.id.clone(),
                cause,
            },
        })?;

    Ok(())
}

/// Retry a single node's compensation with exponential backoff until it
/// succeeds or (if configured) the retry ceiling is hit. Unlike transaction
/// retries this is not mediated by the user's [`crate::policy::RecoveryPolicy`]:
/// per the recovery contract a compensation failure is always retried, a
/// rule the default backward policy's "abort on first failure" must not
/// override.
async fn compensate_with_retry(
    store: &dyn EventStore,
    node: NodeId,
    request: &crate::dag::Request,
    config: &CompensationRetryConfig,
) -> Result<(), String> {
    let mut attempts = 0u32;
    loop {
        match runner::compensate(store, node, request).await {
            Ok(()) => return Ok(()),
            Err(RunnerError::Storage(e)) => {
                // Storage failures are fatal elsewhere in the system, but
                // here they arrive as a plain cause string to keep this
                // function's signature focused on the compensation outcome;
                // the caller still surfaces them as `CoordinatorError::Compensation`.
                return Err(format!("event store failure: {e}"));
            }
            Err(RunnerError::Failed(cause)) => {
                attempts += 1;
                if let Some(max) = config.max_attempts {
                    if attempts >= max {
                        warn!(request_id = %request.id, cause, attempts, "compensation retry ceiling hit");
                        return Err(cause);
                    }
                }
                let delay = config
                    .base_delay
                    .saturating_mul(1u32 << attempts.min(10))
                    .min(config.max_delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
