//! The forward scheduler: a concurrent traversal of the DAG that dispatches
//! every ready node (all parents completed) as soon as it is ready, bounded
//! only by an optional concurrency cap, and waits for whatever is in
//! flight to settle before handing control back — it never cancels
//! in-flight work.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, instrument};

use crate::dag::{Dag, NodeId};
use crate::error::CoordinatorError;
use crate::policy::{RecoveryDecision, RecoveryPolicy};
use crate::runner::{self, RunnerError};
use crate::store::EventStore;

/// What the forward traversal settled on.
pub struct ForwardOutcome {
    /// Every node whose commit succeeded, including those seeded in from a
    /// replayed prefix.
    pub completed: HashSet<NodeId>,
    /// Whether a transaction failure caused the run to abort (meaning
    /// backward recovery is now needed) rather than reach the leaf.
    pub aborted: bool,
}

struct State {
    completed: HashSet<NodeId>,
    in_flight: HashSet<NodeId>,
    aborted: bool,
}

/// Drive `dag` forward from whatever `seed_completed` already reflects
/// (typically the result of [`crate::replay::compute`]) until either the
/// leaf commits or a transaction aborts and every in-flight sibling has
/// settled.
#[instrument(skip(dag, store, policy, seed_completed))]
pub async fn run_forward(
    dag: &Dag,
    store: Arc<dyn EventStore>,
    policy: Arc<dyn RecoveryPolicy>,
    max_concurrency: Option<usize>,
    seed_completed: HashSet<NodeId>,
) -> Result<ForwardOutcome, CoordinatorError> {
    let state = Arc::new(Mutex::new(State {
        completed: seed_completed,
        in_flight: HashSet::new(),
        aborted: false,
    }));
    let semaphore = max_concurrency.map(|n| Arc::new(Semaphore::new(n)));
    let mut joinset: JoinSet<(NodeId, Result<(), RunnerError>)> = JoinSet::new();

    dispatch_ready(dag, &store, &policy, &state, &semaphore, &mut joinset).await;

    while let Some(result) = joinset.join_next().await {
        let (node, outcome) = result.expect("task runner panicked");
        let mut storage_failure = None;
        {
            let mut guard = state.lock().await;
            guard.in_flight.remove(&node);
            match outcome {
                Ok(()) => {
                    guard.completed.insert(node);
                }
                Err(RunnerError::Failed(_)) => {
                    guard.aborted = true;
                }
                Err(RunnerError::Storage(e)) => {
                    guard.aborted = true;
                    storage_failure = Some(e);
                }
            }
        }
        if let Some(e) = storage_failure {
            return Err(CoordinatorError::Storage(e));
        }
        dispatch_ready(dag, &store, &policy, &state, &semaphore, &mut joinset).await;
    }

    let guard = state.lock().await;
    info!(completed = guard.completed.len(), aborted = guard.aborted, "forward scheduler settled");
    Ok(ForwardOutcome {
        completed: guard.completed.clone(),
        aborted: guard.aborted,
    })
}

/// Dispatch every node that is ready (not yet completed or in flight, every
/// parent completed) and not blocked by a prior abort.
async fn dispatch_ready(
    dag: &Dag,
    store: &Arc<dyn EventStore>,
    policy: &Arc<dyn RecoveryPolicy>,
    state: &Arc<Mutex<State>>,
    semaphore: &Option<Arc<Semaphore>>,
    joinset: &mut JoinSet<(NodeId, Result<(), RunnerError>)>,
) {
    let ready: Vec<NodeId> = {
        let mut guard = state.lock().await;
        if guard.aborted {
            return;
        }
        let ready: Vec<NodeId> = dag
            .node_ids()
            .filter(|id| {
                !guard.completed.contains(id)
                    && !guard.in_flight.contains(id)
                    && dag.parents_of(*id).iter().all(|p| guard.completed.contains(p))
            })
            .collect();
        for id in &ready {
            guard.in_flight.insert(*id);
        }
        ready
    };

    for node in ready {
        let store = Arc::clone(store);
        let policy = Arc::clone(policy);
        let request = dag.request(node).expect("dispatched node exists").clone();
        let permit = semaphore.as_ref().map(Arc::clone);

        joinset.spawn(async move {
            let _permit = match &permit {
                Some(sem) => Some(sem.clone().acquire_owned().await.expect("semaphore never closed")),
                None => None,
            };
            let mut attempts = 0u32;
            loop {
                match runner::commit(store.as_ref(), node, &request).await {
                    Ok(()) => return (node, Ok(())),
                    Err(RunnerError::Storage(e)) => return (node, Err(RunnerError::Storage(e))),
                    Err(RunnerError::Failed(cause)) => {
                        attempts += 1;
                        match policy
                            .on_transaction_failure(&request.id, &cause, attempts)
                            .await
                        {
                            RecoveryDecision::Retry => continue,
                            RecoveryDecision::Abort => {
                                return (node, Err(RunnerError::Failed(cause)))
                            }
                        }
                    }
                }
            }
        });
    }
}
