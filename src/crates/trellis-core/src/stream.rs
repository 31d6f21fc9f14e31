//! Run output: the lazy step sequence and streaming branch results
//!
//! A run's output is a single-pass, forward-only stream of [`RunEvent`]s,
//! consumed exactly once by the driving caller. It is not restartable; a
//! new run seeded from a stored checkpoint is how resumption works.
//!
//! Each [`StepRecord`] reports one completed step: the node (or synthetic
//! fan-out step) that ran, the partial update it emitted, the full state
//! after merging, and whether the step was the run's last. When a fan-out
//! branch hands back a still-producing stream instead of a value, the step
//! carries [`BranchStreams`] so the caller can consume token-level output
//! attributed to its originating node.

use crate::error::GraphError;
use crate::graph::NodeId;
use crate::interrupt::Interruption;
use futures::stream::BoxStream;
use futures::StreamExt;
use trellis_checkpoint::{StateData, StateUpdate};

/// Handle to a still-producing stream of values from a node action
pub type ValueStream = BoxStream<'static, serde_json::Value>;

/// A branch's streaming output, tagged with the node that produced it
pub struct TaggedStream {
    /// Node the stream originates from
    pub node: NodeId,

    /// The live stream handle
    pub stream: ValueStream,
}

impl std::fmt::Debug for TaggedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaggedStream")
            .field("node", &self.node)
            .field("stream", &"<stream>")
            .finish()
    }
}

/// Streaming results collected from one step's branches
#[derive(Debug)]
pub struct BranchStreams {
    /// One entry per streaming branch, in branch declaration order
    pub streams: Vec<TaggedStream>,
}

impl BranchStreams {
    /// Nodes that produced a stream, in declaration order
    pub fn sources(&self) -> Vec<&str> {
        self.streams.iter().map(|s| s.node.as_str()).collect()
    }

    /// Combine all branch streams into one, each item tagged with its
    /// originating node id
    ///
    /// Items surface as their branches produce them; no ordering is imposed
    /// across branches.
    pub fn merged(self) -> BoxStream<'static, (NodeId, serde_json::Value)> {
        let tagged = self.streams.into_iter().map(|entry| {
            let node = entry.node;
            entry
                .stream
                .map(move |value| (node.clone(), value))
                .boxed()
        });
        futures::stream::select_all(tagged).boxed()
    }
}

/// One completed step of a run
pub struct StepRecord {
    /// Node that ran, or the synthetic `__parallel__(<source>)` step id;
    /// path-qualified (`parent/child`) when tunneled out of a subgraph
    pub node: NodeId,

    /// Partial update the step emitted. For a fan-out step this maps each
    /// branch node id to that branch's update, so results stay attributable.
    pub update: StateUpdate,

    /// Full state after the step's update was merged
    pub state: StateData,

    /// Streaming branch results, if any branch returned a stream handle
    pub streams: Option<BranchStreams>,

    /// Whether this step routed to the terminal sentinel
    pub is_final: bool,
}

impl std::fmt::Debug for StepRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRecord")
            .field("node", &self.node)
            .field("update", &self.update)
            .field("streams", &self.streams.as_ref().map(|s| s.sources().len()))
            .field("is_final", &self.is_final)
            .finish()
    }
}

/// One event in a run's output sequence
#[derive(Debug)]
pub enum RunEvent {
    /// A node (or fan-out) step completed
    Step(StepRecord),

    /// The run suspended awaiting external decisions; terminal for this
    /// invocation
    Interrupted(Interruption),
}

impl RunEvent {
    /// The step record, if this event is one
    pub fn as_step(&self) -> Option<&StepRecord> {
        match self {
            RunEvent::Step(step) => Some(step),
            RunEvent::Interrupted(_) => None,
        }
    }
}

/// Lazy, single-pass sequence of run events
pub type RunStream = BoxStream<'static, Result<RunEvent, GraphError>>;

/// Terminal result of driving a run to quiescence
#[derive(Debug)]
pub enum RunOutcome {
    /// The run reached the terminal sentinel; carries the final state
    Complete(StateData),

    /// The run paused for external feedback; resume with decisions
    Suspended(Interruption),
}

impl RunOutcome {
    /// Final state of a completed run
    pub fn into_state(self) -> Option<StateData> {
        match self {
            RunOutcome::Complete(state) => Some(state),
            RunOutcome::Suspended(_) => None,
        }
    }

    /// The interruption of a suspended run
    pub fn into_interruption(self) -> Option<Interruption> {
        match self {
            RunOutcome::Complete(_) => None,
            RunOutcome::Suspended(interruption) => Some(interruption),
        }
    }
}
