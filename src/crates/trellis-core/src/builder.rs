//! Graph construction and compilation
//!
//! [`GraphBuilder`] accumulates nodes, edges and channels, then
//! [`compile`](GraphBuilder::compile) validates the structure, binds it to
//! a [`CompileConfig`] (checkpoint store, gates, breakpoints, listeners)
//! and freezes everything into a [`CompiledGraph`].
//!
//! ```rust
//! use serde_json::json;
//! use trellis_core::{CompileConfig, GraphBuilder, NodeOutput, START, END};
//! use trellis_checkpoint::StateUpdate;
//!
//! # fn main() -> Result<(), trellis_core::GraphError> {
//! let mut builder = GraphBuilder::new();
//! builder.add_node("greet", |_state, _config| {
//!     Box::pin(async move {
//!         Ok(NodeOutput::Update(StateUpdate::from([
//!             ("greeting".to_string(), json!("hello")),
//!         ])))
//!     })
//! });
//! builder.add_edge(START, "greet");
//! builder.add_edge("greet", END);
//!
//! let compiled = builder.compile(CompileConfig::new())?;
//! assert_eq!(compiled.node_count(), 1);
//! # Ok(())
//! # }
//! ```

use crate::compiled::CompiledGraph;
use crate::error::{GraphError, Result};
use crate::graph::{
    ActionFactory, BoxedActionFuture, Edge, EdgeTarget, Graph, NodeAction, NodeId, NodeSpec,
    Router,
};
use crate::interrupt::ApprovalGate;
use crate::listener::RunListener;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use trellis_checkpoint::{Channel, CheckpointStore, StateData};

/// Configuration a graph is bound to at compile time
///
/// Shared by every run of the resulting compiled graph. Without a
/// checkpoint store there is no checkpointing and no resume support; the
/// engine never substitutes a default backend.
#[derive(Clone, Default)]
pub struct CompileConfig {
    /// Checkpoint store persisting each run's history
    pub store: Option<Arc<dyn CheckpointStore>>,

    /// Nodes to pause before executing (state-inspection breakpoints)
    pub interrupt_before: HashSet<NodeId>,

    /// Nodes to pause after executing
    pub interrupt_after: HashSet<NodeId>,

    /// Engine-level approval gates, at most one per node
    pub gates: Vec<ApprovalGate>,

    /// Lifecycle listeners notified on the runner's path
    pub listeners: Vec<Arc<dyn RunListener>>,

    /// Release the thread's checkpoint history when a run completes
    pub release_on_complete: bool,
}

impl std::fmt::Debug for CompileConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileConfig")
            .field("store", &self.store.is_some())
            .field("interrupt_before", &self.interrupt_before)
            .field("interrupt_after", &self.interrupt_after)
            .field("gates", &self.gates.len())
            .field("listeners", &self.listeners.len())
            .field("release_on_complete", &self.release_on_complete)
            .finish()
    }
}

impl CompileConfig {
    /// Create an empty configuration (no store, no gates, no breakpoints)
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a checkpoint store
    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Pause before each of the given nodes
    pub fn with_interrupt_before<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.interrupt_before.extend(nodes.into_iter().map(Into::into));
        self
    }

    /// Pause after each of the given nodes
    pub fn with_interrupt_after<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.interrupt_after.extend(nodes.into_iter().map(Into::into));
        self
    }

    /// Add an approval gate
    pub fn with_gate(mut self, gate: ApprovalGate) -> Self {
        self.gates.push(gate);
        self
    }

    /// Add a lifecycle listener
    pub fn with_listener(mut self, listener: Arc<dyn RunListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Archive the thread's history when a run reaches the end
    pub fn release_on_complete(mut self) -> Self {
        self.release_on_complete = true;
        self
    }
}

/// Fluent builder for graphs
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node from a plain action closure
    pub fn add_node<F>(&mut self, id: impl Into<NodeId>, action: F) -> &mut Self
    where
        F: Fn(StateData, crate::config::RunConfig) -> BoxedActionFuture + Send + Sync + 'static,
    {
        let action: NodeAction = Arc::new(action);
        self.add_node_factory(id, move |_config: &CompileConfig| Ok(action.clone()))
    }

    /// Add a node whose action is produced at compile time
    ///
    /// The factory sees the [`CompileConfig`] the graph is being bound to,
    /// so an action can capture the store, listeners or gate setup.
    pub fn add_node_factory<F>(&mut self, id: impl Into<NodeId>, factory: F) -> &mut Self
    where
        F: Fn(&CompileConfig) -> Result<NodeAction> + Send + Sync + 'static,
    {
        let id = id.into();
        self.graph.nodes.insert(
            id.clone(),
            NodeSpec {
                name: id,
                factory: Arc::new(factory),
                subgraph: None,
            },
        );
        self
    }

    /// Embed a compiled graph as a single node
    ///
    /// The child sees the parent's state as its initial state; the keys its
    /// run introduced or changed merge back as this node's update. See
    /// [`subgraph`](crate::subgraph) for the namespacing and propagation
    /// rules.
    pub fn add_subgraph(&mut self, id: impl Into<NodeId>, subgraph: CompiledGraph) -> &mut Self {
        let id = id.into();
        let child = Arc::new(subgraph);
        let action_child = child.clone();
        let action_id = id.clone();
        let factory: ActionFactory = Arc::new(move |_config: &CompileConfig| {
            Ok(crate::subgraph::subgraph_action(
                action_id.clone(),
                action_child.clone(),
            ))
        });
        self.graph.nodes.insert(
            id.clone(),
            NodeSpec {
                name: id,
                factory,
                subgraph: Some(child),
            },
        );
        self
    }

    /// Add a direct edge
    ///
    /// Repeated calls with the same source accumulate targets; a source
    /// with more than one target is a static parallel fan-out.
    pub fn add_edge(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> &mut Self {
        let from = from.into();
        self.graph
            .edges
            .entry(from.clone())
            .or_insert_with(|| Edge {
                source: from,
                targets: Vec::new(),
            })
            .targets
            .push(EdgeTarget::Node(to.into()));
        self
    }

    /// Add a conditional edge
    ///
    /// The router is evaluated against the current state; its label picks
    /// the target from `branches`. An unmapped label fails the run.
    pub fn add_conditional_edge<F>(
        &mut self,
        from: impl Into<NodeId>,
        router: F,
        branches: HashMap<String, NodeId>,
    ) -> &mut Self
    where
        F: Fn(&StateData) -> String + Send + Sync + 'static,
    {
        let from = from.into();
        let router: Router = Arc::new(router);
        self.graph
            .edges
            .entry(from.clone())
            .or_insert_with(|| Edge {
                source: from,
                targets: Vec::new(),
            })
            .targets
            .push(EdgeTarget::Conditional { router, branches });
        self
    }

    /// Declare a merge channel for a state key
    pub fn add_channel(
        &mut self,
        key: impl Into<String>,
        channel: impl Channel + 'static,
    ) -> &mut Self {
        self.graph.channels.insert(key, channel);
        self
    }

    /// The graph built so far
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Validate and bind the graph to a configuration
    ///
    /// Runs structural validation, enforces the subgraph store rule, then
    /// invokes every node's action factory exactly once. The result is
    /// immutable and stateless with respect to any single run; share it
    /// across concurrent runs freely.
    pub fn compile(self, config: CompileConfig) -> Result<CompiledGraph> {
        self.graph.validate()?;

        for spec in self.graph.nodes.values() {
            if let Some(child) = &spec.subgraph {
                if child.has_store() && config.store.is_none() {
                    return Err(GraphError::Configuration(format!(
                        "subgraph node '{}' has a checkpoint store but the parent graph has none",
                        spec.name
                    )));
                }
            }
        }

        let mut gates = HashMap::new();
        for gate in &config.gates {
            if !self.graph.nodes.contains_key(&gate.node) {
                return Err(GraphError::Configuration(format!(
                    "approval gate targets undeclared node '{}'",
                    gate.node
                )));
            }
            if gates.insert(gate.node.clone(), gate.clone()).is_some() {
                return Err(GraphError::Configuration(format!(
                    "node '{}' has more than one approval gate",
                    gate.node
                )));
            }
        }

        let mut actions = HashMap::new();
        for (id, spec) in &self.graph.nodes {
            actions.insert(id.clone(), (spec.factory)(&config)?);
        }

        Ok(CompiledGraph::assemble(self.graph, actions, gates, config))
    }
}
