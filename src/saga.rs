//! The coordinator's public façade: construct once from a store, a DAG and
//! a recovery policy, optionally [`play`](Saga::play) a historical prefix,
//! then [`run`](Saga::run) to completion. A `Saga` is single-use — once
//! `run` returns, the log holds a terminal `SagaEnded` and calling `run`
//! again is a no-op that replays to the same conclusion (see the replay
//! idempotence property in `tests/scenarios.rs`).

use std::sync::Arc;

use tracing::{info, instrument};

use crate::compensation;
use crate::config::CoordinatorConfig;
use crate::dag::Dag;
use crate::error::CoordinatorError;
use crate::event::Envelope;
use crate::policy::RecoveryPolicy;
use crate::replay;
use crate::scheduler;
use crate::store::EventStore;

/// The result of a completed [`Saga::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SagaOutcome {
    /// `true` if the saga finished by compensating (a transaction failed
    /// and the backward scheduler unwound it), `false` if every
    /// transaction committed and the leaf was reached.
    pub aborted: bool,
}

/// Ties the DAG, event store and recovery policy together into one saga
/// run.
pub struct Saga {
    store: Arc<dyn EventStore>,
    dag: Arc<Dag>,
    policy: Arc<dyn RecoveryPolicy>,
    config: CoordinatorConfig,
}

impl Saga {
    /// A saga with default [`CoordinatorConfig`] (unbounded concurrency,
    /// unbounded compensation retries).
    pub fn new(store: Arc<dyn EventStore>, dag: Arc<Dag>, policy: Arc<dyn RecoveryPolicy>) -> Self {
        Self::with_config(store, dag, policy, CoordinatorConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn EventStore>,
        dag: Arc<Dag>,
        policy: Arc<dyn RecoveryPolicy>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            dag,
            policy,
            config,
        }
    }

    /// Fold a historical log prefix into the store before `run` is called.
    /// Must be called before any live execution has happened on this
    /// store.
    pub async fn play(&self, prefix: Vec<Envelope>) -> Result<(), CoordinatorError> {
        self.store.populate(prefix).await.map_err(Into::into)
    }

    /// Run the saga to its terminal state, resuming from whatever the
    /// store's log already reflects.
    ///
    /// If the log already contains a terminal `SagaEnded`, this is a no-op:
    /// replaying a finished saga and then calling `run` again must not
    /// dispatch anything further.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<SagaOutcome, CoordinatorError> {
        let events = self.store.iterate().await;
        let replay_state = replay::compute(&events, &self.dag)
            .map_err(|e| CoordinatorError::ReplayInconsistency(e.0))?;

        if replay_state.terminated {
            return Ok(SagaOutcome {
                aborted: replay_state.aborted,
            });
        }

        if replay_state.aborted {
            if !replay_state.partially_compensating.is_empty() {
                info!(
                    nodes = ?replay_state.partially_compensating,
                    "redoing compensations a crash left hanging"
                );
            }
            compensation::run_backward(&self.dag, Arc::clone(&self.store), &self.config.compensation_retry)
                .await?;
            return Ok(SagaOutcome { aborted: true });
        }

        if !replay_state.partially_started.is_empty() {
            // A hanging transaction (started, never ended) cannot be
            // trusted to have actually run its remote effect, so it must be
            // redone rather than treated as complete. `completed` already
            // excludes these nodes; this assertion pins that down instead
            // of leaving it as an incidental consequence.
            debug_assert!(
                replay_state
                    .partially_started
                    .is_disjoint(&replay_state.completed),
                "a hanging transaction must never be seeded as completed"
            );
            info!(
                nodes = ?replay_state.partially_started,
                "redoing transactions a crash left hanging"
            );
        }

        let mut seed_completed = replay_state.completed;
        if replay_state.root_started {
            seed_completed.insert(self.dag.root());
        }
        debug_assert!(
            seed_completed.is_disjoint(&replay_state.partially_started),
            "a hanging transaction must never be seeded as completed"
        );

        let outcome = scheduler::run_forward(
            &self.dag,
            Arc::clone(&self.store),
            Arc::clone(&self.policy),
            self.config.max_concurrency,
            seed_completed,
        )
        .await?;

        if outcome.aborted {
            compensation::run_backward(&self.dag, Arc::clone(&self.store), &self.config.compensation_retry)
                .await?;
            Ok(SagaOutcome { aborted: true })
        } else {
            Ok(SagaOutcome { aborted: false })
        }
    }
}
