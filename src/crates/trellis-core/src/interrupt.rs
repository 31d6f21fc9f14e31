//! Suspend-for-feedback protocol: interruptions, decisions, approval gates
//!
//! A run can pause mid-flight and hand control to whoever drives it: a node
//! action returns [`NodeOutput::Interrupt`](crate::graph::NodeOutput), or
//! the engine synthesizes a pause when an [`ApprovalGate`] matches the next
//! node. The [`Interruption`] record carries where the run stopped, the
//! state at that instant, and the items awaiting review. The caller answers
//! each item with a [`Decision`] - addressed by the item's opaque id - and
//! re-invokes the run against the same thread id.
//!
//! ```text
//!   run ──► gate matches node ──► Interruption { items: [id₁…] }
//!                                        │ caller reviews out of band
//!                                        ▼
//!   RunConfig::with_decision(id₁, Decision::…) + resume
//!                                        │
//!            Approve → original args     │
//!            Edit    → substituted args  ├──► node re-entered
//!            Reject  → synthetic result, │
//!                      action skipped    ▼
//! ```
//!
//! Decisions are applied independently per item. Interruptions raised
//! inside a subgraph surface unchanged in content, with [`Interruption::path`]
//! extended so the resume call routes back down to the exact paused node.

use crate::graph::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use trellis_checkpoint::{PendingFeedback, PendingItem, StateData};

/// Caller's verdict on one pending-feedback item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum Decision {
    /// Proceed with the original arguments
    Approve,
    /// Do not perform the operation; a substitute result is produced instead
    Reject,
    /// Proceed, substituting the supplied arguments
    Edit {
        /// Replacement arguments for the operation under review
        args: Value,
    },
}

impl Decision {
    /// Encode for transport inside run-config metadata
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Decode from run-config metadata; `None` for unrecognized shapes
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// A suspended run: where it paused, the state there, and what it awaits
#[derive(Debug, Clone)]
pub struct Interruption {
    /// Node id where execution paused
    pub node: NodeId,

    /// Parent node ids from the outermost graph down to the paused node's
    /// graph; empty for a top-level pause
    pub path: Vec<NodeId>,

    /// State at the point of pause
    pub state: StateData,

    /// Items awaiting a decision; may be empty for plain breakpoints
    pub items: Vec<PendingItem>,
}

impl Interruption {
    /// Create an interruption at a node with the given pending items
    ///
    /// The engine fills in the state snapshot when the action left it empty.
    pub fn new(node: impl Into<NodeId>, items: Vec<PendingItem>) -> Self {
        Self {
            node: node.into(),
            path: Vec::new(),
            state: StateData::new(),
            items,
        }
    }

    /// Serializable record stored with the pause checkpoint
    pub fn pending(&self) -> PendingFeedback {
        PendingFeedback {
            node: self.node.clone(),
            path: self.path.clone(),
            items: self.items.clone(),
        }
    }

    /// Rebuild from a stored pending record plus the checkpointed state
    pub fn from_pending(pending: PendingFeedback, state: StateData) -> Self {
        Self {
            node: pending.node,
            path: pending.path,
            state,
            items: pending.items,
        }
    }

    /// The paused node qualified by its path, e.g. `outer/inner/gate`
    pub fn qualified_node(&self) -> String {
        let mut parts = self.path.clone();
        parts.push(self.node.clone());
        parts.join(crate::subgraph::SUBGRAPH_NS_SEP)
    }

    /// Extend the path with the parent node this interruption crossed
    pub(crate) fn pushed_through(mut self, parent_node: &str) -> Self {
        self.path.insert(0, parent_node.to_string());
        self
    }
}

/// Engine-level approval gate on one node
///
/// When the runner is about to execute the gated node and no decisions are
/// in flight, it synthesizes an [`Interruption`] with a single pending item
/// instead: the configured operation name plus the proposed arguments read
/// from `args_key` in the current state. On resume, Approve runs the node
/// as-is, Edit rewrites `args_key` first, and Reject skips the node
/// entirely, merging a synthetic rejection record under `result_key`.
#[derive(Debug, Clone)]
pub struct ApprovalGate {
    /// Node the gate guards
    pub node: NodeId,

    /// Operation name put under review
    pub operation: String,

    /// State key holding the operation's proposed arguments
    pub args_key: String,

    /// State key that receives the synthetic result on rejection
    pub result_key: String,
}

impl ApprovalGate {
    /// Gate a node, deriving `args_key`/`result_key` from the operation name
    pub fn new(node: impl Into<NodeId>, operation: impl Into<String>) -> Self {
        let operation = operation.into();
        Self {
            node: node.into(),
            args_key: format!("{operation}_args"),
            result_key: format!("{operation}_result"),
            operation,
        }
    }

    /// Override the state key the proposed arguments are read from
    pub fn with_args_key(mut self, key: impl Into<String>) -> Self {
        self.args_key = key.into();
        self
    }

    /// Override the state key the rejection record is written to
    pub fn with_result_key(mut self, key: impl Into<String>) -> Self {
        self.result_key = key.into();
        self
    }

    /// The substitute update merged when the reviewer rejects
    pub(crate) fn rejection_update(&self) -> trellis_checkpoint::StateUpdate {
        let mut update = trellis_checkpoint::StateUpdate::new();
        update.insert(
            self.result_key.clone(),
            json!({
                "operation": self.operation,
                "status": "rejected",
                "message": format!("operation '{}' was rejected by the reviewer", self.operation),
            }),
        );
        update
    }
}
