//! The closed event taxonomy a saga's log is built from.

use serde::{Deserialize, Serialize};

use crate::dag::NodeId;

/// A fact recorded about saga progress. Every variant the coordinator ever
/// appends; there is no open extension point, which is what lets the replay
/// engine reason exhaustively about what a log prefix means.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// The saga has begun. Always the first event in the log.
    SagaStarted,
    /// `node`'s transaction is about to run.
    TransactionStarted { node: NodeId },
    /// `node`'s transaction ran to completion.
    TransactionEnded { node: NodeId },
    /// `node`'s transaction failed and will not be retried further.
    TransactionAborted { node: NodeId, cause: String },
    /// `node`'s compensation is about to run.
    CompensationStarted { node: NodeId },
    /// `node`'s compensation ran to completion.
    CompensationEnded { node: NodeId },
    /// The saga has finished. Always the last event in the log.
    /// `aborted` is `true` when the saga finished by compensating rather
    /// than by completing every transaction.
    SagaEnded { aborted: bool },
}

impl Event {
    /// The node this event concerns, if any. `SagaStarted`/`SagaEnded` are
    /// saga-wide and carry no node.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Event::SagaStarted | Event::SagaEnded { .. } => None,
            Event::TransactionStarted { node }
            | Event::TransactionEnded { node }
            | Event::TransactionAborted { node, .. }
            | Event::CompensationStarted { node }
            | Event::CompensationEnded { node } => Some(*node),
        }
    }
}

/// An [`Event`] wrapped with the monotonic id the store assigned it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    pub event: Event,
}
