//! The request graph a saga walks: a single-root, single-leaf DAG of
//! [`Request`]s, each a pair of [`Capability`]s (transaction and
//! compensation) tagged with the [`TaskKind`] that decides how its runner
//! drives it.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Caller-assigned, dense node identifier. Doubles as the key events key
/// off of, so it must be stable for the lifetime of a saga run.
pub type NodeId = u64;

/// A unit of remote work a [`Request`] wraps, run by a task runner and
/// never invoked directly by the coordinator's public API.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Run the operation. `Err` carries the human-readable cause recorded
    /// on `TransactionAborted`/surfaced from a failed compensation.
    async fn run(&self) -> Result<(), String>;
}

/// A [`Capability`] that always succeeds without doing anything. Used to
/// fill the `transaction`/`compensation` slots of the synthetic root and
/// leaf requests, whose runners never actually invoke them.
pub struct NoopCapability;

#[async_trait]
impl Capability for NoopCapability {
    async fn run(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Which runner drives a [`Request`]: the synthetic saga boundary nodes or
/// an ordinary transaction/compensation pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// The DAG's single root. Commits by appending `SagaStarted`; never
    /// fails. Compensates by appending the terminal `SagaEnded { aborted:
    /// true }`.
    SagaStart,
    /// An ordinary transaction/compensation pair.
    Process,
    /// The DAG's single leaf. Commits by appending the terminal
    /// `SagaEnded { aborted: false }`; never fails.
    SagaEnd,
}

/// One node's worth of work: an id, a transaction, its compensation, and
/// the runner that drives both.
#[derive(Clone)]
pub struct Request {
    pub id: String,
    pub transaction: Arc<dyn Capability>,
    pub compensation: Arc<dyn Capability>,
    pub runner: TaskKind,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("runner", &self.runner)
            .finish()
    }
}

impl Request {
    /// The synthetic root request. Its capabilities are never invoked.
    pub fn saga_start(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            transaction: Arc::new(NoopCapability),
            compensation: Arc::new(NoopCapability),
            runner: TaskKind::SagaStart,
        }
    }

    /// The synthetic leaf request. Its capabilities are never invoked.
    pub fn saga_end(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            transaction: Arc::new(NoopCapability),
            compensation: Arc::new(NoopCapability),
            runner: TaskKind::SagaEnd,
        }
    }

    /// An ordinary transaction/compensation pair.
    pub fn process(
        id: impl Into<String>,
        transaction: Arc<dyn Capability>,
        compensation: Arc<dyn Capability>,
    ) -> Self {
        Self {
            id: id.into(),
            transaction,
            compensation,
            runner: TaskKind::Process,
        }
    }
}

/// Structural violations of the DAG contract, raised synchronously at
/// construction time — never mid-run.
#[derive(Debug, Error)]
pub enum DagError {
    #[error("DAG has no nodes; at least a root and a leaf are required")]
    Empty,
    #[error("edge references unknown node {0}")]
    UnknownNode(NodeId),
    #[error("DAG must have exactly one root (no incoming edges), found {0}")]
    MultipleRoots(usize),
    #[error("DAG must have exactly one leaf (no outgoing edges), found {0}")]
    MultipleLeaves(usize),
    #[error("root request must use the SagaStart runner")]
    RootMustBeSagaStart,
    #[error("leaf request must use the SagaEnd runner")]
    LeafMustBeSagaEnd,
    #[error("DAG contains a cycle")]
    Cycle,
    #[error("node {0} is unreachable from the root")]
    Unreachable(NodeId),
    #[error("node {0} cannot reach the leaf")]
    NotCoReachable(NodeId),
}

/// One node of a built [`Dag`].
pub struct Node {
    pub node_id: NodeId,
    pub request: Request,
    pub children: BTreeSet<NodeId>,
}

/// Builds a [`Dag`], validating its structural invariants on [`build`].
///
/// [`build`]: DagBuilder::build
#[derive(Default)]
pub struct DagBuilder {
    requests: HashMap<NodeId, Request>,
    children: HashMap<NodeId, BTreeSet<NodeId>>,
}

impl DagBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. Calling this more than once for the same id
    /// replaces the earlier request.
    pub fn add_node(&mut self, node_id: NodeId, request: Request) -> &mut Self {
        self.requests.insert(node_id, request);
        self.children.entry(node_id).or_default();
        self
    }

    /// Register a `parent -> child` edge. Both ids must have been (or will
    /// be) registered via [`add_node`](Self::add_node) before [`build`] is
    /// called.
    pub fn add_edge(&mut self, parent: NodeId, child: NodeId) -> &mut Self {
        self.children.entry(parent).or_default().insert(child);
        self.children.entry(child).or_default();
        self
    }

    /// Validate and freeze the graph.
    pub fn build(self) -> Result<Dag, DagError> {
        if self.requests.is_empty() {
            return Err(DagError::Empty);
        }

        for (parent, kids) in &self.children {
            if !self.requests.contains_key(parent) {
                return Err(DagError::UnknownNode(*parent));
            }
            for child in kids {
                if !self.requests.contains_key(child) {
                    return Err(DagError::UnknownNode(*child));
                }
            }
        }

        let mut parents: HashMap<NodeId, BTreeSet<NodeId>> = self
            .requests
            .keys()
            .map(|id| (*id, BTreeSet::new()))
            .collect();
        for (parent, kids) in &self.children {
            for child in kids {
                parents.entry(*child).or_default().insert(*parent);
            }
        }

        let roots: Vec<NodeId> = self
            .requests
            .keys()
            .copied()
            .filter(|id| parents.get(id).map(|p| p.is_empty()).unwrap_or(true))
            .collect();
        if roots.len() != 1 {
            return Err(DagError::MultipleRoots(roots.len()));
        }
        let root = roots[0];

        let leaves: Vec<NodeId> = self
            .requests
            .keys()
            .copied()
            .filter(|id| self.children.get(id).map(|c| c.is_empty()).unwrap_or(true))
            .collect();
        if leaves.len() != 1 {
            return Err(DagError::MultipleLeaves(leaves.len()));
        }
        let leaf = leaves[0];

        if self.requests[&root].runner != TaskKind::SagaStart {
            return Err(DagError::RootMustBeSagaStart);
        }
        if self.requests[&leaf].runner != TaskKind::SagaEnd {
            return Err(DagError::LeafMustBeSagaEnd);
        }

        // Kahn's algorithm: a full topological order exists iff the graph
        // is acyclic.
        let mut indegree: HashMap<NodeId, usize> = self
            .requests
            .keys()
            .map(|id| (*id, parents.get(id).map(BTreeSet::len).unwrap_or(0)))
            .collect();
        let mut queue: VecDeque<NodeId> = indegree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(n) = queue.pop_front() {
            visited += 1;
            for child in self.children.get(&n).into_iter().flatten() {
                let deg = indegree.get_mut(child).expect("known node");
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(*child);
                }
            }
        }
        if visited != self.requests.len() {
            return Err(DagError::Cycle);
        }

        // Reachability from root.
        let mut reached = HashSet::new();
        let mut frontier = VecDeque::from([root]);
        reached.insert(root);
        while let Some(n) = frontier.pop_front() {
            for child in self.children.get(&n).into_iter().flatten() {
                if reached.insert(*child) {
                    frontier.push_back(*child);
                }
            }
        }
        if let Some(missing) = self
            .requests
            .keys()
            .find(|id| !reached.contains(*id))
            .copied()
        {
            return Err(DagError::Unreachable(missing));
        }

        // Co-reachability to leaf, walking parent edges backwards.
        let mut co_reached = HashSet::new();
        let mut frontier = VecDeque::from([leaf]);
        co_reached.insert(leaf);
        while let Some(n) = frontier.pop_front() {
            for parent in parents.get(&n).into_iter().flatten() {
                if co_reached.insert(*parent) {
                    frontier.push_back(*parent);
                }
            }
        }
        if let Some(missing) = self
            .requests
            .keys()
            .find(|id| !co_reached.contains(*id))
            .copied()
        {
            return Err(DagError::NotCoReachable(missing));
        }

        let mut requests = self.requests;
        let nodes = self
            .children
            .into_iter()
            .map(|(node_id, children)| {
                let request = requests.remove(&node_id).expect("validated above");
                (
                    node_id,
                    Node {
                        node_id,
                        request,
                        children,
                    },
                )
            })
            .collect();

        Ok(Dag {
            root,
            leaf,
            nodes,
            parents,
        })
    }
}

/// A validated, immutable request graph.
pub struct Dag {
    root: NodeId,
    leaf: NodeId,
    nodes: HashMap<NodeId, Node>,
    parents: HashMap<NodeId, BTreeSet<NodeId>>,
}

impl Dag {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn leaf(&self) -> NodeId {
        self.leaf
    }

    pub fn request(&self, id: NodeId) -> Option<&Request> {
        self.nodes.get(&id).map(|n| &n.request)
    }

    pub fn children_of(&self, id: NodeId) -> &BTreeSet<NodeId> {
        static EMPTY: BTreeSet<NodeId> = BTreeSet::new();
        self.nodes.get(&id).map(|n| &n.children).unwrap_or(&EMPTY)
    }

    pub fn parents_of(&self, id: NodeId) -> &BTreeSet<NodeId> {
        static EMPTY: BTreeSet<NodeId> = BTreeSet::new();
        self.parents.get(&id).unwrap_or(&EMPTY)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// All nodes transitively reachable through `children`, not including
    /// `id` itself.
    pub fn descendants(&self, id: NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut frontier: VecDeque<NodeId> = self.children_of(id).iter().copied().collect();
        while let Some(n) = frontier.pop_front() {
            if seen.insert(n) {
                frontier.extend(self.children_of(n).iter().copied());
            }
        }
        seen
    }
}
