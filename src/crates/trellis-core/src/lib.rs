//! # trellis-core - graph execution engine
//!
//! An async engine for multi-step, stateful computations: each unit of work
//! is a node, control flow between nodes is a directed graph with
//! conditional and parallel edges, and a whole run can be checkpointed,
//! streamed, interrupted for external feedback, and resumed.
//!
//! ## Architecture
//!
//! ```text
//!  GraphBuilder ── validate ──► CompiledGraph ◄── CompileConfig
//!   • nodes (action factories)      │               • checkpoint store
//!   • edges (direct / conditional   │               • approval gates
//!     / parallel)                   │               • breakpoints, listeners
//!   • channels (per-key merge)      ▼
//!                             stream() / invoke()
//!                                   │ one RunEvent per step
//!          ┌────────────────────────┼───────────────────────┐
//!          ▼                        ▼                       ▼
//!     Step(record)        Interrupted(interruption)   Err(GraphError)
//!     update merged,      paused for decisions,       run terminated,
//!     checkpoint written  resume via RunConfig        last checkpoint
//!                                                     stays resumable
//! ```
//!
//! State is a keyed JSON map; every partial update a node emits is merged
//! through per-key channels (replace, append, reduce) so concurrent branch
//! results combine deterministically. After each successful step the runner
//! appends one checkpoint - state plus the just-run and next node pointers -
//! to the run's thread history, which is what makes crash recovery,
//! inspection and human-in-the-loop resumption possible.
//!
//! ## A minimal run
//!
//! ```rust
//! use serde_json::json;
//! use trellis_core::{CompileConfig, GraphBuilder, NodeOutput, RunOutcome, START, END};
//! use trellis_checkpoint::{Reducer, StateData, StateUpdate};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), trellis_core::GraphError> {
//! let mut builder = GraphBuilder::new();
//! builder.add_channel("x", Reducer::sum());
//! builder.add_node("inc", |_state, _config| {
//!     Box::pin(async move {
//!         Ok(NodeOutput::Update(StateUpdate::from([
//!             ("x".to_string(), json!(1)),
//!         ])))
//!     })
//! });
//! builder.add_edge(START, "inc");
//! builder.add_edge("inc", END);
//!
//! let compiled = builder.compile(CompileConfig::new())?;
//! let outcome = compiled.invoke(StateData::from([("x".to_string(), json!(1))])).await?;
//! match outcome {
//!     RunOutcome::Complete(state) => assert_eq!(state["x"], json!(2.0)),
//!     RunOutcome::Suspended(_) => unreachable!(),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module map
//!
//! - [`graph`] - node/edge model, sentinels, structural validation
//! - [`builder`] - [`GraphBuilder`] and [`CompileConfig`]
//! - [`compiled`] - [`CompiledGraph`]: the runner (`invoke`, `stream`)
//! - [`stream`] - [`RunEvent`], [`StepRecord`], streaming branch results
//! - [`interrupt`] - [`Interruption`], [`Decision`], [`ApprovalGate`]
//! - [`subgraph`] - compiled graphs as parent nodes, thread namespacing
//! - [`config`] - [`RunConfig`]: thread id, checkpoint pin, decisions
//! - [`listener`] - lifecycle hooks
//! - [`error`] - [`GraphError`]
//!
//! Persistence lives in the companion crate
//! [`trellis_checkpoint`](trellis_checkpoint): channels, checkpoint types,
//! and the store backends.

pub mod builder;
pub mod compiled;
pub mod config;
pub mod error;
mod fanout;
pub mod graph;
pub mod interrupt;
pub mod listener;
pub mod stream;
pub mod subgraph;

pub use builder::{CompileConfig, GraphBuilder};
pub use compiled::CompiledGraph;
pub use config::{RunConfig, FEEDBACK_KEY};
pub use error::{GraphError, Result};
pub use graph::{
    ActionFactory, BoxedActionFuture, Edge, EdgeTarget, Graph, NodeAction, NodeId, NodeOutput,
    NodeSpec, Router, END, RESERVED_PREFIX, START,
};
pub use interrupt::{ApprovalGate, Decision, Interruption};
pub use listener::{LogListener, RunListener};
pub use stream::{BranchStreams, RunEvent, RunOutcome, RunStream, StepRecord, TaggedStream, ValueStream};
pub use subgraph::SUBGRAPH_NS_SEP;

// Persistence types callers touch routinely, re-exported for convenience.
pub use trellis_checkpoint::{
    Appender, Channel, ChannelTable, Checkpoint, CheckpointStore, LastValue, MemoryCheckpointStore,
    PendingItem, Reducer, StateData, StateUpdate,
};
