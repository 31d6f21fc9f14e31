//! Per-run configuration
//!
//! A [`RunConfig`] accompanies every invocation: the thread id addressing
//! the run's checkpoint history, an optional checkpoint pin, the resume
//! flag, and free-form metadata. Feedback decisions travel inside the
//! metadata under the well-known [`FEEDBACK_KEY`]; the typed accessors
//! below keep callers away from the raw JSON shape.

use crate::interrupt::Decision;
use crate::stream::StepRecord;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;
use trellis_checkpoint::DEFAULT_THREAD_ID;

/// Metadata key carrying the feedback-decision bundle
pub const FEEDBACK_KEY: &str = "__feedback__";

/// Configuration for one run of a compiled graph
#[derive(Clone, Default)]
pub struct RunConfig {
    /// Opaque thread id addressing this run's checkpoint history
    ///
    /// Absent means the well-known default thread.
    pub thread_id: Option<String>,

    /// Pin a specific historical checkpoint as the resume point
    pub checkpoint_id: Option<String>,

    /// Resume from the thread's stored checkpoint instead of starting fresh
    pub resume: bool,

    /// Free-form metadata handed to every node action
    pub metadata: HashMap<String, Value>,

    /// Sink the runner installs so nested runs can tunnel their step events
    pub(crate) step_tx: Option<UnboundedSender<StepRecord>>,
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("thread_id", &self.thread_id)
            .field("checkpoint_id", &self.checkpoint_id)
            .field("resume", &self.resume)
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl RunConfig {
    /// Create a default configuration (default thread, fresh run)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the thread id
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Pin a specific checkpoint as the resume point
    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    /// Mark this invocation as a resume of the thread's stored run
    pub fn resuming(mut self) -> Self {
        self.resume = true;
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Record a decision for a pending-feedback item
    pub fn with_decision(mut self, item_id: impl Into<String>, decision: Decision) -> Self {
        let bundle = self
            .metadata
            .entry(FEEDBACK_KEY.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(map) = bundle.as_object_mut() {
            map.insert(item_id.into(), decision.to_value());
        }
        self
    }

    /// The effective thread id
    pub fn thread(&self) -> &str {
        self.thread_id.as_deref().unwrap_or(DEFAULT_THREAD_ID)
    }

    /// All recorded decisions, keyed by pending-item id
    pub fn decisions(&self) -> HashMap<String, Decision> {
        let mut decisions = HashMap::new();
        if let Some(map) = self.metadata.get(FEEDBACK_KEY).and_then(Value::as_object) {
            for (id, value) in map {
                if let Some(decision) = Decision::from_value(value) {
                    decisions.insert(id.clone(), decision);
                }
            }
        }
        decisions
    }

    /// The decision recorded for one item, if any
    pub fn decision_for(&self, item_id: &str) -> Option<Decision> {
        self.metadata
            .get(FEEDBACK_KEY)
            .and_then(Value::as_object)
            .and_then(|map| map.get(item_id))
            .and_then(Decision::from_value)
    }
}
