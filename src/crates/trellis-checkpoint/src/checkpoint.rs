//! Checkpoint data types: immutable snapshots of a run's state
//!
//! A [`Checkpoint`] captures the full state of a run after one node step:
//! the state values, the node that just executed, and the node that will
//! execute next. Checkpoints are never mutated; "updating" one produces a
//! new value with a fresh id via [`Checkpoint::amended`]. A run's history
//! is a newest-first list of checkpoints addressed by an opaque thread id
//! (see [`CheckpointStore`](crate::store::CheckpointStore)).
//!
//! When a run suspends for external feedback, the checkpoint written at the
//! pause point carries a [`PendingFeedback`] record so a later resume call
//! can re-validate that every pending item received a decision.

use crate::channels::StateData;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One pending-feedback item inside a suspended run
///
/// `id` is opaque and globally unique; callers address their decisions by it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingItem {
    /// Opaque id the resume call addresses this item by
    pub id: String,

    /// Name of the operation under review
    pub operation: String,

    /// Proposed arguments for the operation
    pub args: Value,
}

impl PendingItem {
    /// Create an item with a fresh opaque id
    pub fn new(operation: impl Into<String>, args: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation: operation.into(),
            args,
        }
    }
}

/// Suspension record stored with a checkpoint while a run awaits decisions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingFeedback {
    /// Node id where execution paused
    pub node: String,

    /// Node path from the outermost graph down to the paused node
    ///
    /// Empty for a top-level pause; a subgraph pause prepends each parent
    /// node id so resume calls can be routed back down.
    #[serde(default)]
    pub path: Vec<String>,

    /// Items awaiting a decision
    pub items: Vec<PendingItem>,
}

/// Immutable snapshot of a run after one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Globally unique checkpoint id
    pub id: String,

    /// Creation timestamp
    pub ts: DateTime<Utc>,

    /// Full copy of the state at this instant
    pub values: StateData,

    /// Id of the node just executed
    pub node_id: String,

    /// Id of the node to execute next
    pub next_node_id: String,

    /// Present only when the run is suspended awaiting feedback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingFeedback>,
}

impl Checkpoint {
    /// Create a checkpoint with a fresh id and the current timestamp
    pub fn new(
        values: StateData,
        node_id: impl Into<String>,
        next_node_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            values,
            node_id: node_id.into(),
            next_node_id: next_node_id.into(),
            pending: None,
        }
    }

    /// Attach a pending-feedback record
    pub fn with_pending(mut self, pending: PendingFeedback) -> Self {
        self.pending = Some(pending);
        self
    }

    /// Derive a new checkpoint with amended state values
    ///
    /// The result shares this checkpoint's node pointers but carries a fresh
    /// id and timestamp; the original is untouched.
    pub fn amended(&self, values: StateData) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            values,
            node_id: self.node_id.clone(),
            next_node_id: self.next_node_id.clone(),
            pending: self.pending.clone(),
        }
    }

    /// Whether this checkpoint marks a suspended run
    pub fn is_suspended(&self) -> bool {
        self.pending.is_some()
    }
}
