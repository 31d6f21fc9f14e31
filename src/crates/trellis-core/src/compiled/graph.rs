//! Compiled graph structure and edge resolution

use crate::builder::CompileConfig;
use crate::error::{GraphError, Result};
use crate::graph::{
    parallel_source, parallel_step_id, Edge, EdgeTarget, Graph, NodeAction, NodeId, END,
};
use crate::interrupt::ApprovalGate;
use crate::listener::RunListener;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use trellis_checkpoint::{ChannelTable, CheckpointStore, StateData};

/// Where the runner goes next
#[derive(Debug, Clone)]
pub(crate) enum Route {
    /// The terminal sentinel was reached
    End,

    /// One node executes next
    Single(NodeId),

    /// A static parallel fan-out executes next
    Parallel {
        /// Source node the fan-out edge leaves from
        source: NodeId,
        /// Branch nodes, in declaration order
        branches: Vec<NodeId>,
    },
}

impl Route {
    /// The next-node pointer recorded in checkpoints for this route
    pub(crate) fn pointer(&self) -> String {
        match self {
            Route::End => END.to_string(),
            Route::Single(node) => node.clone(),
            Route::Parallel { source, .. } => parallel_step_id(source),
        }
    }
}

/// A validated graph bound to a concrete configuration
///
/// Stateless with respect to any single run: many runs may share one
/// compiled graph concurrently, each with its own state, thread id and
/// output stream. Cloning is cheap (everything inside is shared).
#[derive(Clone)]
pub struct CompiledGraph {
    pub(crate) actions: Arc<HashMap<NodeId, NodeAction>>,
    pub(crate) edges: Arc<HashMap<NodeId, Edge>>,
    pub(crate) channels: ChannelTable,
    pub(crate) store: Option<Arc<dyn CheckpointStore>>,
    pub(crate) gates: Arc<HashMap<NodeId, ApprovalGate>>,
    pub(crate) interrupt_before: Arc<HashSet<NodeId>>,
    pub(crate) interrupt_after: Arc<HashSet<NodeId>>,
    pub(crate) listeners: Arc<Vec<Arc<dyn RunListener>>>,
    pub(crate) release_on_complete: bool,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.actions.len())
            .field("edges", &self.edges.len())
            .field("store", &self.store.is_some())
            .field("gates", &self.gates.len())
            .finish()
    }
}

impl CompiledGraph {
    pub(crate) fn assemble(
        graph: Graph,
        actions: HashMap<NodeId, NodeAction>,
        gates: HashMap<NodeId, ApprovalGate>,
        config: CompileConfig,
    ) -> Self {
        Self {
            actions: Arc::new(actions),
            edges: Arc::new(graph.edges),
            channels: graph.channels,
            store: config.store,
            gates: Arc::new(gates),
            interrupt_before: Arc::new(config.interrupt_before),
            interrupt_after: Arc::new(config.interrupt_after),
            listeners: Arc::new(config.listeners),
            release_on_complete: config.release_on_complete,
        }
    }

    /// Number of executable nodes
    pub fn node_count(&self) -> usize {
        self.actions.len()
    }

    /// Whether a checkpoint store is configured
    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// The configured checkpoint store, if any
    pub fn store(&self) -> Option<&Arc<dyn CheckpointStore>> {
        self.store.as_ref()
    }

    pub(crate) fn action_for(&self, node: &str) -> Result<NodeAction> {
        self.actions.get(node).cloned().ok_or_else(|| {
            GraphError::Configuration(format!("no action compiled for node '{node}'"))
        })
    }

    /// Resolve a node's outgoing edge against the current state
    pub(crate) fn route_from(&self, node: &str, state: &StateData) -> Result<Route> {
        let edge = self
            .edges
            .get(node)
            .ok_or_else(|| GraphError::NoOutgoingEdge {
                node: node.to_string(),
            })?;

        match edge.targets.as_slice() {
            [] => Err(GraphError::NoOutgoingEdge {
                node: node.to_string(),
            }),
            [EdgeTarget::Node(target)] => Ok(Self::single(target)),
            [EdgeTarget::Conditional { router, branches }] => {
                let label = router(state);
                match branches.get(&label) {
                    Some(target) => Ok(Self::single(target)),
                    None => Err(GraphError::Routing {
                        node: node.to_string(),
                        label,
                    }),
                }
            }
            targets => {
                let mut branches = Vec::with_capacity(targets.len());
                for target in targets {
                    match target {
                        EdgeTarget::Node(branch) => branches.push(branch.clone()),
                        EdgeTarget::Conditional { .. } => {
                            return Err(GraphError::Configuration(format!(
                                "parallel edge from '{node}' contains a conditional target"
                            )))
                        }
                    }
                }
                Ok(Route::Parallel {
                    source: node.to_string(),
                    branches,
                })
            }
        }
    }

    /// The join successor shared by a fan-out's branches
    ///
    /// Validation guarantees every branch has a single direct edge to one
    /// common node, so the first branch speaks for all of them.
    pub(crate) fn join_route(&self, branches: &[NodeId]) -> Result<Route> {
        let first = branches.first().ok_or_else(|| {
            GraphError::Configuration("parallel fan-out with no branches".to_string())
        })?;
        let edge = self
            .edges
            .get(first)
            .ok_or_else(|| GraphError::NoOutgoingEdge {
                node: first.clone(),
            })?;
        match edge.targets.as_slice() {
            [EdgeTarget::Node(join)] => Ok(Self::single(join)),
            _ => Err(GraphError::Configuration(format!(
                "parallel branch '{first}' does not have a single direct outgoing edge"
            ))),
        }
    }

    /// Rebuild the run cursor from a checkpoint's next-node pointer
    pub(crate) fn cursor_from_pointer(&self, pointer: &str) -> Result<Route> {
        if pointer == END {
            return Ok(Route::End);
        }
        if let Some(source) = parallel_source(pointer) {
            return match self.route_from(source, &StateData::new())? {
                route @ Route::Parallel { .. } => Ok(route),
                _ => Err(GraphError::Configuration(format!(
                    "checkpoint points at '{pointer}' but '{source}' has no parallel edge"
                ))),
            };
        }
        Ok(Route::Single(pointer.to_string()))
    }

    fn single(target: &str) -> Route {
        if target == END {
            Route::End
        } else {
            Route::Single(target.to_string())
        }
    }
}
