//! Graph data model: nodes, edges, sentinels, and structural validation
//!
//! A graph is an immutable description of work: each node owns an action
//! factory, each edge names one or more possible successors, and the two
//! sentinels [`START`] and [`END`] mark the boundaries. Validation runs
//! once at compile time and rejects every structural defect with a typed
//! error naming the offending node or edge - nothing structural is left to
//! be discovered mid-run.
//!
//! ```text
//!   START ──► plan ──► act ──┬──► review ──► END
//!                            │     ▲
//!               (conditional │     │ (parallel fan-out joins
//!                edge routes │     │  back on one successor)
//!                by label)   └──► lint
//! ```

use crate::builder::CompileConfig;
use crate::error::{GraphError, Result};
use crate::interrupt::Interruption;
use crate::stream::ValueStream;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use trellis_checkpoint::{ChannelTable, StateData, StateUpdate};

/// Node identifier - unique name for each node in the graph
pub type NodeId = String;

/// Sentinel marking where execution begins; never executes itself
pub const START: &str = "__start__";

/// Sentinel marking successful completion; edges target it to finish
pub const END: &str = "__end__";

/// Prefix reserved for engine-internal synthetic node ids
///
/// The fan-out step id lives in this namespace; user node ids must not.
pub const RESERVED_PREFIX: &str = "__";

/// Synthetic step id recorded for a parallel fan-out from `source`
pub(crate) fn parallel_step_id(source: &str) -> String {
    format!("__parallel__({source})")
}

/// Recover the fan-out source from a synthetic step id
pub(crate) fn parallel_source(step_id: &str) -> Option<&str> {
    step_id
        .strip_prefix("__parallel__(")
        .and_then(|rest| rest.strip_suffix(')'))
}

/// What a node action hands back to the runner
pub enum NodeOutput {
    /// A partial state update, merged through the channel table
    Update(StateUpdate),

    /// Suspend the run for external feedback
    Interrupt(Interruption),

    /// A handle to a still-producing stream of values
    ///
    /// The action completes immediately with the handle; the stream's
    /// eventual contents are consumed by the caller, never merged into
    /// state.
    Stream(ValueStream),
}

impl NodeOutput {
    /// An empty update
    pub fn empty() -> Self {
        NodeOutput::Update(StateUpdate::new())
    }
}

impl std::fmt::Debug for NodeOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeOutput::Update(update) => f.debug_tuple("Update").field(update).finish(),
            NodeOutput::Interrupt(interruption) => {
                f.debug_tuple("Interrupt").field(interruption).finish()
            }
            NodeOutput::Stream(_) => f.debug_tuple("Stream").field(&"<stream>").finish(),
        }
    }
}

/// Future returned by a node action
pub type BoxedActionFuture = Pin<Box<dyn Future<Output = Result<NodeOutput>> + Send>>;

/// An asynchronous node action: (state snapshot, run config) -> output
pub type NodeAction =
    Arc<dyn Fn(StateData, crate::config::RunConfig) -> BoxedActionFuture + Send + Sync>;

/// Produces a node's action from the compile-time configuration
///
/// Invoked exactly once per node at compile time; the resulting action is
/// frozen into the compiled graph and invoked zero or many times per run.
pub type ActionFactory = Arc<dyn Fn(&CompileConfig) -> Result<NodeAction> + Send + Sync>;

/// Routing function for conditional edges: state -> label
pub type Router = Arc<dyn Fn(&StateData) -> String + Send + Sync>;

/// A node declaration: identity plus its action factory
#[derive(Clone)]
pub struct NodeSpec {
    /// Unique node id
    pub name: NodeId,

    /// Factory producing the node's action at compile time
    pub factory: ActionFactory,

    /// Embedded compiled graph, when this node wraps a subgraph
    ///
    /// Recorded so the parent compile step can enforce the checkpoint-store
    /// configuration rule before any step executes.
    pub subgraph: Option<Arc<crate::compiled::CompiledGraph>>,
}

impl std::fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSpec")
            .field("name", &self.name)
            .field("factory", &"<factory>")
            .field("subgraph", &self.subgraph.is_some())
            .finish()
    }
}

/// One possible successor named by an edge
#[derive(Clone)]
pub enum EdgeTarget {
    /// Direct transition to a node (or [`END`])
    Node(NodeId),

    /// Routed transition: the router's label picks the target
    Conditional {
        /// Routing function evaluated against the current state
        router: Router,

        /// Label-to-target mapping; an unmapped label is a fatal routing
        /// error at run time
        branches: HashMap<String, NodeId>,
    },
}

impl std::fmt::Debug for EdgeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeTarget::Node(node) => f.debug_tuple("Node").field(node).finish(),
            EdgeTarget::Conditional { branches, .. } => f
                .debug_struct("Conditional")
                .field("router", &"<function>")
                .field("branches", branches)
                .finish(),
        }
    }
}

/// A directed edge: one source, one or more targets
///
/// More than one target denotes a static parallel fan-out.
#[derive(Debug, Clone)]
pub struct Edge {
    /// Source node id (or [`START`])
    pub source: NodeId,

    /// Targets, in declaration order
    pub targets: Vec<EdgeTarget>,
}

/// The pre-compile graph: nodes, edges, channels
///
/// Built through [`GraphBuilder`](crate::builder::GraphBuilder); immutable
/// once validation succeeds.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    /// Declared nodes by id
    pub nodes: HashMap<NodeId, NodeSpec>,

    /// One edge per source node id
    pub edges: HashMap<NodeId, Edge>,

    /// Per-key merge channels
    pub channels: ChannelTable,
}

impl Graph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the graph structure
    ///
    /// Run once at compile time. Every violation is fatal and names the
    /// offending node or edge:
    ///
    /// 1. node ids must be non-blank and outside the reserved `__` prefix;
    /// 2. every edge source must be a declared node or [`START`];
    /// 3. every target (direct, or any conditional branch value) must be a
    ///    declared node or [`END`];
    /// 4. a parallel edge must not name the same target twice, and all of
    ///    its targets must be direct;
    /// 5. every branch of a parallel edge must have a single direct
    ///    outgoing edge, and all branches must share one join successor;
    /// 6. every declared node must have an outgoing edge;
    /// 7. a start edge must exist.
    pub fn validate(&self) -> Result<()> {
        for id in self.nodes.keys() {
            if id.trim().is_empty() {
                return Err(GraphError::Validation(
                    "node id must not be blank".to_string(),
                ));
            }
            if id.starts_with(RESERVED_PREFIX) {
                return Err(GraphError::Validation(format!(
                    "node id '{id}' uses the reserved '{RESERVED_PREFIX}' prefix"
                )));
            }
        }

        if !self.edges.contains_key(START) {
            return Err(GraphError::Validation(
                "graph has no start edge".to_string(),
            ));
        }

        for (source, edge) in &self.edges {
            if source != START && !self.nodes.contains_key(source) {
                return Err(GraphError::Validation(format!(
                    "edge source '{source}' is not a declared node"
                )));
            }

            for target in &edge.targets {
                match target {
                    EdgeTarget::Node(node) => self.check_target(source, node)?,
                    EdgeTarget::Conditional { branches, .. } => {
                        for node in branches.values() {
                            self.check_target(source, node)?;
                        }
                    }
                }
            }

            if edge.targets.len() > 1 {
                self.validate_parallel(source, edge)?;
            }
        }

        for id in self.nodes.keys() {
            if !self.edges.contains_key(id) {
                return Err(GraphError::Validation(format!(
                    "node '{id}' has no outgoing edge"
                )));
            }
        }

        Ok(())
    }

    fn check_target(&self, source: &str, target: &str) -> Result<()> {
        if target != END && !self.nodes.contains_key(target) {
            return Err(GraphError::Validation(format!(
                "edge from '{source}' targets undeclared node '{target}'"
            )));
        }
        Ok(())
    }

    fn validate_parallel(&self, source: &str, edge: &Edge) -> Result<()> {
        let mut seen = HashSet::new();
        let mut joins = HashSet::new();

        for target in &edge.targets {
            let branch = match target {
                EdgeTarget::Node(node) => node,
                EdgeTarget::Conditional { .. } => {
                    return Err(GraphError::Validation(format!(
                        "parallel edge from '{source}' cannot contain conditional targets"
                    )))
                }
            };
            if !seen.insert(branch.clone()) {
                return Err(GraphError::Validation(format!(
                    "parallel edge from '{source}' targets '{branch}' more than once"
                )));
            }
            if branch == END {
                return Err(GraphError::Validation(format!(
                    "parallel edge from '{source}' cannot target '{END}' directly"
                )));
            }

            let outgoing = self.edges.get(branch).ok_or_else(|| {
                GraphError::Validation(format!(
                    "parallel branch '{branch}' of '{source}' has no outgoing edge"
                ))
            })?;
            match outgoing.targets.as_slice() {
                [EdgeTarget::Node(join)] => {
                    joins.insert(join.clone());
                }
                _ => {
                    return Err(GraphError::Validation(format!(
                        "parallel branch '{branch}' of '{source}' must have a single direct outgoing edge"
                    )))
                }
            }
        }

        if joins.len() != 1 {
            return Err(GraphError::Validation(format!(
                "parallel branches of '{source}' must converge on a single join node"
            )));
        }
        Ok(())
    }
}
