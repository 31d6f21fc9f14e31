//! Error types for graph construction and execution
//!
//! Construction-time defects (validation, configuration) and run-time
//! failures (routing, node execution, fan-out branches, persistence) all
//! surface as [`GraphError`]. Interruption is deliberately *not* here: a
//! suspended run is a first-class outcome
//! ([`RunOutcome::Suspended`](crate::stream::RunOutcome)), not a failure.
//!
//! Engine errors are never swallowed: they terminate the run and reach the
//! caller typed. A failed run leaves its last successful checkpoint intact,
//! so callers can retry by starting a new run against the same thread id.

use thiserror::Error;

/// Convenience result type using [`GraphError`]
pub type Result<T> = std::result::Result<T, GraphError>;

/// All errors raised by graph construction, validation and execution
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph structure validation failed at compile time
    ///
    /// The message names the offending node or edge. Always fatal, never
    /// retried.
    #[error("graph validation failed: {0}")]
    Validation(String),

    /// A conditional router returned a label with no mapped target
    #[error("node '{node}' routed to unmapped label '{label}'")]
    Routing {
        /// Source node of the conditional edge
        node: String,
        /// Label the router returned
        label: String,
    },

    /// A node was reached that has no outgoing edge
    #[error("node '{node}' has no outgoing edge")]
    NoOutgoingEdge {
        /// The dead-end node
        node: String,
    },

    /// A node action failed
    ///
    /// No implicit retry happens at the engine level; wrapping the action
    /// is the caller's business.
    #[error("node '{node}' execution failed: {error}")]
    NodeExecution {
        /// Node whose action failed
        node: String,
        /// Error reported by the action
        error: String,
    },

    /// A parallel fan-out branch failed, failing the whole step
    ///
    /// Sibling branch results are discarded; nothing from the step is
    /// merged or checkpointed.
    #[error("parallel branch '{node}' failed: {error}")]
    Branch {
        /// Branch node that failed
        node: String,
        /// Error reported by the branch
        error: String,
    },

    /// A resume call did not supply a decision for a pending item
    #[error("resume at node '{node}' is missing a decision for item '{item}'")]
    MissingDecision {
        /// Node the run is suspended at
        node: String,
        /// Id of the undecided pending item
        item: String,
    },

    /// Invalid engine configuration
    ///
    /// Raised before any step executes, e.g. a checkpointed subgraph under
    /// a store-less parent, or a resume request without a store.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Checkpoint store failure
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] trellis_checkpoint::CheckpointError),

    /// State could not be serialized or deserialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GraphError {
    /// Create a node execution error with context
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Wrap an action error with its node context, unless it already
    /// carries one
    pub(crate) fn in_node(self, node: &str) -> Self {
        match self {
            err @ GraphError::NodeExecution { .. } => err,
            other => GraphError::NodeExecution {
                node: node.to_string(),
                error: other.to_string(),
            },
        }
    }
}
