//! Parallel fan-out execution and join classification
//!
//! A parallel edge runs one action per target concurrently, each against a
//! cloned snapshot of the same input state; only the join step afterwards
//! touches the canonical state. The join waits for every branch's
//! immediate future (a branch that hands back a stream completes with the
//! handle, not the stream's contents), then classifies: stream handles are
//! collected tagged by their branch, value results are merged in branch
//! declaration order. Any branch failure fails the whole step and the
//! sibling results are discarded.

use crate::config::RunConfig;
use crate::error::{GraphError, Result};
use crate::graph::{NodeAction, NodeId, NodeOutput};
use crate::stream::TaggedStream;
use trellis_checkpoint::{StateData, StateUpdate};

#[derive(Debug)]
pub(crate) struct BranchResult {
    pub node: NodeId,
    pub output: NodeOutput,
}

/// Branch outputs split by kind, both in declaration order
pub(crate) struct JoinResult {
    pub updates: Vec<(NodeId, StateUpdate)>,
    pub streams: Vec<TaggedStream>,
}

/// Run every branch concurrently and wait for all of them
///
/// Branches are spawned onto the runtime so they genuinely overlap; results
/// come back in declaration order regardless of completion order. The first
/// branch failure (in declaration order) is reported after all branches
/// have settled, so no branch is left running against a dead step.
pub(crate) async fn run_branches(
    branches: Vec<(NodeId, NodeAction)>,
    state: &StateData,
    config: &RunConfig,
) -> Result<Vec<BranchResult>> {
    let mut handles = Vec::with_capacity(branches.len());
    for (node, action) in branches {
        let snapshot = state.clone();
        let run_config = config.clone();
        let handle = tokio::spawn(async move { action(snapshot, run_config).await });
        handles.push((node, handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    let mut failure: Option<GraphError> = None;
    for (node, handle) in handles {
        match handle.await {
            Ok(Ok(output)) => results.push(BranchResult { node, output }),
            Ok(Err(err)) => {
                failure.get_or_insert(GraphError::Branch {
                    node,
                    error: err.to_string(),
                });
            }
            Err(join_err) => {
                failure.get_or_insert(GraphError::Branch {
                    node,
                    error: join_err.to_string(),
                });
            }
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(results),
    }
}

/// Split branch outputs into value updates and stream handles
pub(crate) fn classify(results: Vec<BranchResult>) -> Result<JoinResult> {
    let mut updates = Vec::new();
    let mut streams = Vec::new();
    for result in results {
        match result.output {
            NodeOutput::Update(update) => updates.push((result.node, update)),
            NodeOutput::Stream(stream) => streams.push(TaggedStream {
                node: result.node,
                stream,
            }),
            NodeOutput::Interrupt(_) => {
                return Err(GraphError::Branch {
                    node: result.node,
                    error: "a parallel branch cannot suspend the run".to_string(),
                })
            }
        }
    }
    Ok(JoinResult { updates, streams })
}
