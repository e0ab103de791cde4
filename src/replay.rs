//! Reconstructs what a log prefix means before live execution resumes:
//! which nodes are done, whether the saga already aborted, which
//! compensations already finished, and — critically — which transactions
//! or compensations were left hanging by a crash and must be redone.

use std::collections::HashSet;

use thiserror::Error;

use crate::dag::{Dag, NodeId};
use crate::event::{Envelope, Event};

/// A log prefix that does not match what the DAG can mean.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ReplayError(pub String);

/// What a log prefix, read against a DAG, reconstructs about saga state.
#[derive(Debug, Default, Clone)]
pub struct ReplayState {
    /// The saga already reached its terminal `SagaEnded`. Nothing further
    /// should ever be dispatched against this log.
    pub terminated: bool,
    /// The saga has aborted (a transaction failed, or any compensation
    /// activity is present) and needs backward recovery rather than
    /// forward continuation.
    pub aborted: bool,
    /// Whether `SagaStarted` has already been recorded.
    pub root_started: bool,
    /// Nodes whose transaction ended and have not (yet) been compensated.
    pub completed: HashSet<NodeId>,
    /// Nodes whose compensation ended.
    pub compensated: HashSet<NodeId>,
    /// Nodes with a `TransactionStarted` but no matching `TransactionEnded`
    /// or `TransactionAborted` — a transaction a crash left hanging.
    /// These must be re-executed on resume: the log cannot tell us whether
    /// the remote effect actually happened, so replay cannot treat them as
    /// complete.
    pub partially_started: HashSet<NodeId>,
    /// Nodes with a `CompensationStarted` but no matching
    /// `CompensationEnded` — a compensation a crash left hanging, which
    /// must likewise be re-invoked.
    pub partially_compensating: HashSet<NodeId>,
}

/// Reconstruct [`ReplayState`] from `events`, validating every event
/// references a node the DAG actually contains and that compensation
/// events never precede the transaction end they compensate.
pub fn compute(events: &[Envelope], dag: &Dag) -> Result<ReplayState, ReplayError> {
    let mut state = ReplayState::default();
    let mut started: HashSet<NodeId> = HashSet::new();
    let mut ended: HashSet<NodeId> = HashSet::new();
    let mut aborted_nodes: HashSet<NodeId> = HashSet::new();
    let mut comp_started: HashSet<NodeId> = HashSet::new();

    for envelope in events {
        if let Some(node) = envelope.event.node() {
            if !dag.contains(node) {
                return Err(ReplayError(format!(
                    "event references node {node} which is not in the DAG"
                )));
            }
        }
        match &envelope.event {
            Event::SagaStarted => state.root_started = true,
            Event::TransactionStarted { node } => {
                started.insert(*node);
            }
            Event::TransactionEnded { node } => {
                ended.insert(*node);
            }
            Event::TransactionAborted { node, .. } => {
                aborted_nodes.insert(*node);
                state.aborted = true;
            }
            Event::CompensationStarted { node } => {
                if !ended.contains(node) {
                    return Err(ReplayError(format!(
                        "node {node} has a CompensationStarted with no preceding TransactionEnded"
                    )));
                }
                comp_started.insert(*node);
                state.aborted = true;
            }
            Event::CompensationEnded { node } => {
                if !ended.contains(node) {
                    return Err(ReplayError(format!(
                        "node {node} has a CompensationEnded with no preceding TransactionEnded"
                    )));
                }
                state.compensated.insert(*node);
                state.aborted = true;
            }
            Event::SagaEnded { aborted } => {
                state.terminated = true;
                state.aborted = state.aborted || *aborted;
            }
        }
    }

    state.completed = ended.difference(&state.compensated).copied().collect();
    state.partially_started = started
        .difference(&ended)
        .filter(|n| !aborted_nodes.contains(*n))
        .copied()
        .collect();
    state.partially_compensating = comp_started
        .difference(&state.compensated)
        .copied()
        .collect();

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{DagBuilder, NoopCapability, Request};
    use std::sync::Arc;

    fn env(id: u64, event: Event) -> Envelope {
        Envelope { id, event }
    }

    fn linear_dag() -> Dag {
        let mut b = DagBuilder::new();
        b.add_node(0, Request::saga_start("start"));
        b.add_node(1, Request::process("a", Arc::new(NoopCapability), Arc::new(NoopCapability)));
        b.add_node(2, Request::process("b", Arc::new(NoopCapability), Arc::new(NoopCapability)));
        b.add_node(3, Request::saga_end("end"));
        b.add_edge(0, 1);
        b.add_edge(1, 2);
        b.add_edge(2, 3);
        b.build().unwrap()
    }

    #[test]
    fn empty_log_replays_to_nothing_started() {
        let dag = linear_dag();
        let state = compute(&[], &dag).unwrap();
        assert!(!state.terminated);
        assert!(!state.aborted);
        assert!(!state.root_started);
        assert!(state.completed.is_empty());
    }

    #[test]
    fn mid_run_prefix_marks_completed_nodes_only() {
        let dag = linear_dag();
        let events = vec![
            env(1, Event::SagaStarted),
            env(2, Event::TransactionStarted { node: 1 }),
            env(3, Event::TransactionEnded { node: 1 }),
        ];
        let state = compute(&events, &dag).unwrap();
        assert!(state.root_started);
        assert!(!state.aborted);
        assert_eq!(state.completed, HashSet::from([1]));
        assert!(state.partially_started.is_empty());
    }

    #[test]
    fn hanging_transaction_is_not_completed() {
        let dag = linear_dag();
        let events = vec![
            env(1, Event::SagaStarted),
            env(2, Event::TransactionStarted { node: 1 }),
            env(3, Event::TransactionEnded { node: 1 }),
            env(4, Event::TransactionStarted { node: 2 }),
            // crash: no TransactionEnded/Aborted for node 2
        ];
        let state = compute(&events, &dag).unwrap();
        assert_eq!(state.completed, HashSet::from([1]));
        assert_eq!(state.partially_started, HashSet::from([2]));
    }

    #[test]
    fn abort_and_compensation_prefix_marks_aborted_and_compensated() {
        let dag = linear_dag();
        let events = vec![
            env(1, Event::SagaStarted),
            env(2, Event::TransactionStarted { node: 1 }),
            env(3, Event::TransactionEnded { node: 1 }),
            env(4, Event::TransactionStarted { node: 2 }),
            env(5, Event::TransactionAborted { node: 2, cause: "boom".into() }),
            env(6, Event::CompensationStarted { node: 1 }),
            env(7, Event::CompensationEnded { node: 1 }),
        ];
        let state = compute(&events, &dag).unwrap();
        assert!(state.aborted);
        assert!(state.completed.is_empty());
        assert_eq!(state.compensated, HashSet::from([1]));
        assert!(state.partially_compensating.is_empty());
    }

    #[test]
    fn terminated_log_is_flagged() {
        let dag = linear_dag();
        let events = vec![
            env(1, Event::SagaStarted),
            env(2, Event::SagaEnded { aborted: false }),
        ];
        let state = compute(&events, &dag).unwrap();
        assert!(state.terminated);
    }

    #[test]
    fn compensation_started_without_transaction_ended_is_inconsistent() {
        let dag = linear_dag();
        let events = vec![env(1, Event::CompensationStarted { node: 1 })];
        assert!(compute(&events, &dag).is_err());
    }

    #[test]
    fn event_referencing_unknown_node_is_inconsistent() {
        let dag = linear_dag();
        let events = vec![env(1, Event::TransactionStarted { node: 999 })];
        assert!(compute(&events, &dag).is_err());
    }
}
