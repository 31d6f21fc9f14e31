//! Subgraph embedding: a compiled graph as a single parent node
//!
//! [`GraphBuilder::add_subgraph`](crate::builder::GraphBuilder::add_subgraph)
//! wraps a compiled graph in a node action. The child sees the parent's
//! current state as its initial state; the keys its run introduced or
//! changed merge back as the node's partial update.
//!
//! # Thread namespacing
//!
//! When the child graph carries a checkpoint store, its runs are addressed
//! by the parent's thread id suffixed with the node id:
//! `<parent-thread>/<node-id>` (separator [`SUBGRAPH_NS_SEP`]). The rule
//! applies at every nesting level, so `jobs-42/review/lint` is the lint
//! subgraph inside the review subgraph of thread `jobs-42` - collision-free
//! at arbitrary depth and recognizable in a store listing. A child with its
//! own store under a store-less parent is rejected at parent compile time.
//!
//! # Signal tunneling
//!
//! Child step events surface in the parent's event sequence unchanged in
//! content, with the node field path-qualified (`node/child_node`). A child
//! interruption propagates with its path extended by the parent node id,
//! and a resume against the parent routes back down: the wrapper sees the
//! child's suspended checkpoint under the namespaced thread id and resumes
//! it with the caller's decisions.

use crate::compiled::CompiledGraph;
use crate::config::RunConfig;
use crate::error::GraphError;
use crate::graph::{NodeAction, NodeId, NodeOutput};
use crate::stream::RunEvent;
use futures::StreamExt;
use std::sync::Arc;
use trellis_checkpoint::{CheckpointStore, StateData, StateUpdate};

/// Separator between a parent thread id and a subgraph node id
pub const SUBGRAPH_NS_SEP: &str = "/";

/// Build the node action that runs `child` inside a parent graph
pub(crate) fn subgraph_action(node_id: NodeId, child: Arc<CompiledGraph>) -> NodeAction {
    Arc::new(move |state: StateData, config: RunConfig| {
        let node_id = node_id.clone();
        let child = child.clone();
        Box::pin(async move {
            let snapshot = state.clone();
            let mut child_config = RunConfig {
                thread_id: child
                    .has_store()
                    .then(|| format!("{}{SUBGRAPH_NS_SEP}{node_id}", config.thread())),
                checkpoint_id: None,
                resume: false,
                metadata: config.metadata.clone(),
                step_tx: None,
            };

            // A suspended checkpoint under the namespaced thread means this
            // invocation is the resume leg of an earlier pause.
            if let (Some(store), Some(thread)) = (child.store(), child_config.thread_id.clone()) {
                if let Some(checkpoint) = store.get(&thread, None).await? {
                    if checkpoint.is_suspended() {
                        child_config.resume = true;
                    }
                }
            }

            let input = if child_config.resume {
                StateData::new()
            } else {
                state
            };

            let mut events = child.stream(input, child_config);
            let mut final_state: Option<StateData> = None;

            while let Some(event) = events.next().await {
                match event? {
                    RunEvent::Step(mut record) => {
                        if record.is_final {
                            final_state = Some(record.state.clone());
                        }
                        if let Some(tx) = &config.step_tx {
                            record.node =
                                format!("{node_id}{SUBGRAPH_NS_SEP}{}", record.node);
                            record.is_final = false;
                            let _ = tx.send(record);
                        }
                    }
                    RunEvent::Interrupted(interruption) => {
                        return Ok(NodeOutput::Interrupt(
                            interruption.pushed_through(&node_id),
                        ));
                    }
                }
            }

            match final_state {
                Some(final_state) => {
                    // Merge-back boundary: only keys the child introduced or
                    // changed form the node's partial update, so values the
                    // child merely inherited are not merged twice through
                    // the parent's channels.
                    let update: StateUpdate = final_state
                        .into_iter()
                        .filter(|(key, value)| snapshot.get(key) != Some(value))
                        .collect();
                    Ok(NodeOutput::Update(update))
                }
                None => Err(GraphError::NodeExecution {
                    node: node_id.clone(),
                    error: "subgraph run ended without a final step".to_string(),
                }),
            }
        })
    })
}
