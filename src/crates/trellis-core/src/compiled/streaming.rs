//! The step-by-step run loop
//!
//! [`CompiledGraph::stream`] walks the graph from the start pointer (or a
//! stored checkpoint) and lazily yields one [`RunEvent`] per step. The
//! sequence is single-pass and forward-only; dropping it between steps
//! cancels the run without writing a checkpoint for any step that never
//! finished.
//!
//! Per iteration the loop: checks breakpoints and approval gates, invokes
//! the node's action (or the fan-out), merges the update through the
//! channel table, resolves the outgoing edge, appends exactly one
//! checkpoint, and yields the step record. Step events tunneled out of a
//! nested subgraph are flushed ahead of the step that produced them.

use super::graph::{CompiledGraph, Route};
use crate::config::RunConfig;
use crate::error::GraphError;
use crate::graph::{parallel_step_id, NodeOutput, END, START};
use crate::interrupt::{Decision, Interruption};
use crate::stream::{BranchStreams, RunEvent, RunStream, StepRecord, TaggedStream};
use crate::fanout;
use async_stream::try_stream;
use serde_json::Value;
use tokio::sync::mpsc;
use trellis_checkpoint::{Checkpoint, CheckpointStore, PendingItem, StateData, StateUpdate};

impl CompiledGraph {
    /// Run the graph, yielding a lazy sequence of step events
    ///
    /// The stream is consumed exactly once. It ends after the final step,
    /// after an [`RunEvent::Interrupted`], or with the first error. A new
    /// run seeded from a stored checkpoint is how resumption works; see
    /// [`RunConfig::resuming`].
    pub fn stream(&self, input: StateData, config: RunConfig) -> RunStream {
        let graph = self.clone();
        Box::pin(try_stream! {
            let thread = config.thread().to_string();
            let store = graph.store.clone();
            let listeners = graph.listeners.clone();

            // Sink for step events tunneled out of nested subgraphs.
            let (step_tx, mut step_rx) = mpsc::unbounded_channel::<StepRecord>();
            let mut config = config;
            config.step_tx = Some(step_tx);

            let resume_requested = config.resume || config.checkpoint_id.is_some();
            let loaded = if resume_requested {
                let store_ref = store.as_ref().ok_or_else(|| GraphError::Configuration(
                    "resume requested but no checkpoint store is configured".to_string(),
                ))?;
                let checkpoint = store_ref.get(&thread, config.checkpoint_id.as_deref()).await?;
                Some(checkpoint.ok_or_else(|| GraphError::Configuration(format!(
                    "no checkpoint to resume for thread '{thread}'"
                )))?)
            } else {
                None
            };

            let mut state: StateData;
            let mut prev: String;
            let mut cursor: Route;
            let mut resumed_pending = None;
            let mut just_resumed = false;

            match loaded {
                Some(checkpoint) => {
                    let Checkpoint { values, node_id, next_node_id, pending, .. } = checkpoint;
                    state = values;
                    if !input.is_empty() {
                        state = graph.channels.apply(&state, &input)?;
                    }
                    if let Some(record) = &pending {
                        let decisions = config.decisions();
                        for item in &record.items {
                            if !decisions.contains_key(&item.id) {
                                Err::<(), GraphError>(GraphError::MissingDecision {
                                    node: record.node.clone(),
                                    item: item.id.clone(),
                                })?;
                            }
                        }
                    }
                    prev = node_id;
                    cursor = graph.cursor_from_pointer(&next_node_id)?;
                    resumed_pending = pending;
                    just_resumed = true;
                    tracing::debug!(thread = %thread, next = %cursor.pointer(), "resuming run");
                }
                None => {
                    state = graph.channels.apply(&StateData::new(), &input)?;
                    prev = START.to_string();
                    cursor = graph.route_from(START, &state)?;
                    tracing::debug!(thread = %thread, "starting run");
                }
            }

            // A start edge that resolves straight to END still yields one
            // final step so the caller observes the seeded state.
            if matches!(cursor, Route::End) {
                if let Some(store) = &store {
                    store.put(&thread, Checkpoint::new(state.clone(), prev.clone(), END)).await?;
                }
                let record = StepRecord {
                    node: prev.clone(),
                    update: input.clone(),
                    state: state.clone(),
                    streams: None,
                    is_final: true,
                };
                for listener in listeners.iter() {
                    listener.on_step(&record.node, &record.update);
                }
                yield RunEvent::Step(record);
            }

            let mut suspended: Option<Interruption> = None;

            loop {
                match cursor.clone() {
                    Route::End => break,

                    Route::Single(node) => {
                        if !just_resumed && graph.interrupt_before.contains(&node) {
                            let mut interruption = Interruption::new(node.clone(), vec![]);
                            interruption.state = state.clone();
                            if let Some(store) = &store {
                                store.put(
                                    &thread,
                                    Checkpoint::new(state.clone(), prev.clone(), node.clone())
                                        .with_pending(interruption.pending()),
                                ).await?;
                            }
                            suspended = Some(interruption);
                            break;
                        }

                        // Engine approval gate: pause with a synthesized
                        // pending item, or apply the decisions in flight.
                        let mut override_update: Option<StateUpdate> = None;
                        if let Some(gate) = graph.gates.get(&node) {
                            let resuming_items = resumed_pending
                                .as_ref()
                                .filter(|p| p.node == node && !p.items.is_empty())
                                .map(|p| p.items.clone());
                            match resuming_items {
                                None => {
                                    let args = state
                                        .get(&gate.args_key)
                                        .cloned()
                                        .unwrap_or(Value::Null);
                                    let item = PendingItem::new(gate.operation.clone(), args);
                                    let mut interruption =
                                        Interruption::new(node.clone(), vec![item]);
                                    interruption.state = state.clone();
                                    if let Some(store) = &store {
                                        store.put(
                                            &thread,
                                            Checkpoint::new(state.clone(), prev.clone(), node.clone())
                                                .with_pending(interruption.pending()),
                                        ).await?;
                                    }
                                    suspended = Some(interruption);
                                    break;
                                }
                                Some(items) => {
                                    let decisions = config.decisions();
                                    for item in &items {
                                        match decisions.get(&item.id) {
                                            Some(Decision::Approve) => {}
                                            Some(Decision::Edit { args }) => {
                                                state.insert(gate.args_key.clone(), args.clone());
                                            }
                                            Some(Decision::Reject) => {
                                                override_update = Some(gate.rejection_update());
                                            }
                                            None => {
                                                Err::<(), GraphError>(GraphError::MissingDecision {
                                                    node: node.clone(),
                                                    item: item.id.clone(),
                                                })?;
                                            }
                                        }
                                    }
                                }
                            }
                        }
                        resumed_pending = None;
                        just_resumed = false;

                        let output = match override_update {
                            Some(update) => NodeOutput::Update(update),
                            None => {
                                let action = graph.action_for(&node)?;
                                tracing::debug!(node = %node, "executing node");
                                action(state.clone(), config.clone()).await.map_err(|err| {
                                    let err = err.in_node(&node);
                                    for listener in listeners.iter() {
                                        listener.on_error(&node, &err);
                                    }
                                    err
                                })?
                            }
                        };

                        // Flush events tunneled out of a subgraph before
                        // reporting the step that produced them.
                        while let Ok(forwarded) = step_rx.try_recv() {
                            yield RunEvent::Step(forwarded);
                        }

                        match output {
                            NodeOutput::Interrupt(mut interruption) => {
                                if interruption.node.is_empty() {
                                    interruption.node = node.clone();
                                }
                                if interruption.state.is_empty() {
                                    interruption.state = state.clone();
                                }
                                if let Some(store) = &store {
                                    store.put(
                                        &thread,
                                        Checkpoint::new(state.clone(), prev.clone(), node.clone())
                                            .with_pending(interruption.pending()),
                                    ).await?;
                                }
                                suspended = Some(interruption);
                                break;
                            }
                            NodeOutput::Update(update) => {
                                state = graph.channels.apply(&state, &update)?;
                                let next = graph.route_from(&node, &state)?;
                                if let Some(store) = &store {
                                    store.put(
                                        &thread,
                                        Checkpoint::new(state.clone(), node.clone(), next.pointer()),
                                    ).await?;
                                }
                                let is_final = matches!(next, Route::End);
                                let record = StepRecord {
                                    node: node.clone(),
                                    update,
                                    state: state.clone(),
                                    streams: None,
                                    is_final,
                                };
                                for listener in listeners.iter() {
                                    listener.on_step(&record.node, &record.update);
                                }
                                yield RunEvent::Step(record);
                                prev = node.clone();
                                cursor = next;
                                if !is_final && graph.interrupt_after.contains(&node) {
                                    let mut interruption = Interruption::new(node.clone(), vec![]);
                                    interruption.state = state.clone();
                                    suspended = Some(interruption);
                                    break;
                                }
                            }
                            NodeOutput::Stream(handle) => {
                                // The handle completes the step; the stream's
                                // contents are the caller's to consume and are
                                // never merged into state.
                                let next = graph.route_from(&node, &state)?;
                                if let Some(store) = &store {
                                    store.put(
                                        &thread,
                                        Checkpoint::new(state.clone(), node.clone(), next.pointer()),
                                    ).await?;
                                }
                                let is_final = matches!(next, Route::End);
                                let record = StepRecord {
                                    node: node.clone(),
                                    update: StateUpdate::new(),
                                    state: state.clone(),
                                    streams: Some(BranchStreams {
                                        streams: vec![TaggedStream {
                                            node: node.clone(),
                                            stream: handle,
                                        }],
                                    }),
                                    is_final,
                                };
                                for listener in listeners.iter() {
                                    listener.on_step(&record.node, &record.update);
                                }
                                yield RunEvent::Step(record);
                                prev = node.clone();
                                cursor = next;
                                if !is_final && graph.interrupt_after.contains(&node) {
                                    let mut interruption = Interruption::new(node.clone(), vec![]);
                                    interruption.state = state.clone();
                                    suspended = Some(interruption);
                                    break;
                                }
                            }
                        }
                    }

                    Route::Parallel { source, branches } => {
                        resumed_pending = None;
                        just_resumed = false;
                        let step_id = parallel_step_id(&source);

                        let mut actions = Vec::with_capacity(branches.len());
                        for branch in &branches {
                            actions.push((branch.clone(), graph.action_for(branch)?));
                        }
                        tracing::debug!(source = %source, branches = branches.len(), "running fan-out");

                        let results = fanout::run_branches(actions, &state, &config)
                            .await
                            .map_err(|err| {
                                for listener in listeners.iter() {
                                    listener.on_error(&step_id, &err);
                                }
                                err
                            })?;
                        let join = fanout::classify(results)?;

                        // Branch updates merge into the same base state in
                        // declaration order, never completion order.
                        let branch_updates: Vec<StateUpdate> =
                            join.updates.iter().map(|(_, update)| update.clone()).collect();
                        state = graph.channels.apply_all(&state, &branch_updates)?;

                        let next = graph.join_route(&branches)?;
                        if let Some(store) = &store {
                            store.put(
                                &thread,
                                Checkpoint::new(state.clone(), step_id.clone(), next.pointer()),
                            ).await?;
                        }

                        while let Ok(forwarded) = step_rx.try_recv() {
                            yield RunEvent::Step(forwarded);
                        }

                        let mut update = StateUpdate::new();
                        for (branch, branch_update) in join.updates {
                            update.insert(
                                branch,
                                Value::Object(branch_update.into_iter().collect()),
                            );
                        }
                        let streams = if join.streams.is_empty() {
                            None
                        } else {
                            Some(BranchStreams { streams: join.streams })
                        };
                        let is_final = matches!(next, Route::End);
                        let record = StepRecord {
                            node: step_id.clone(),
                            update,
                            state: state.clone(),
                            streams,
                            is_final,
                        };
                        for listener in listeners.iter() {
                            listener.on_step(&record.node, &record.update);
                        }
                        yield RunEvent::Step(record);
                        prev = step_id;
                        cursor = next;
                    }
                }
            }

            if let Some(interruption) = suspended {
                for listener in listeners.iter() {
                    listener.on_interrupt(&interruption);
                }
                tracing::info!(node = %interruption.qualified_node(), "run suspended");
                yield RunEvent::Interrupted(interruption);
            } else {
                for listener in listeners.iter() {
                    listener.on_complete(&state);
                }
                tracing::debug!(thread = %thread, "run completed");
                if graph.release_on_complete {
                    if let Some(store) = &store {
                        let released = store.release(&thread).await?;
                        tracing::info!(thread = %thread, tag = %released.tag, "checkpoint history released");
                    }
                }
            }
        })
    }
}
