//! End-to-end runner tests: linear flows, conditional routing, fan-out,
//! gates, and crash recovery against a real checkpoint store.

use futures::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use trellis_core::{
    ApprovalGate, Appender, CheckpointStore, CompileConfig, Decision, GraphBuilder, GraphError,
    MemoryCheckpointStore,
    NodeOutput, Reducer, RunConfig, RunEvent, RunOutcome, StateData, StateUpdate, END, START,
};

fn update(key: &str, value: serde_json::Value) -> StateUpdate {
    StateUpdate::from([(key.to_string(), value)])
}

fn emit(
    key: &'static str,
    value: serde_json::Value,
) -> impl Fn(StateData, RunConfig) -> trellis_core::BoxedActionFuture {
    move |_state, _config| {
        let value = value.clone();
        Box::pin(async move { Ok(NodeOutput::Update(update(key, value))) })
    }
}

fn final_state(outcome: RunOutcome) -> StateData {
    match outcome {
        RunOutcome::Complete(state) => state,
        RunOutcome::Suspended(interruption) => {
            panic!("unexpected suspension at {}", interruption.qualified_node())
        }
    }
}

// START -> a -> b -> END with an additive channel: a contributes 1, b
// contributes 1, final x is 2.
#[tokio::test]
async fn linear_run_accumulates_through_additive_channel() {
    let mut builder = GraphBuilder::new();
    builder.add_channel("x", Reducer::sum());
    builder.add_node("a", emit("x", json!(1)));
    builder.add_node("b", emit("x", json!(1)));
    builder.add_edge(START, "a");
    builder.add_edge("a", "b");
    builder.add_edge("b", END);

    let compiled = builder.compile(CompileConfig::new()).unwrap();
    let state = final_state(compiled.invoke(StateData::new()).await.unwrap());
    assert_eq!(state["x"].as_f64(), Some(2.0));
}

// Conditional edge: a routes to b on "go" and to END on "stop"; the router
// stops once x reaches 2. Expect exactly a, b, a.
#[tokio::test]
async fn conditional_routing_terminates_after_expected_hops() {
    let mut builder = GraphBuilder::new();
    builder.add_channel("x", Reducer::sum());
    builder.add_node("a", emit("x", json!(1)));
    builder.add_node("b", |_state, _config| {
        Box::pin(async move { Ok(NodeOutput::empty()) })
    });
    builder.add_edge(START, "a");
    builder.add_conditional_edge(
        "a",
        |state| {
            if state.get("x").and_then(|x| x.as_f64()).unwrap_or(0.0) >= 2.0 {
                "stop".to_string()
            } else {
                "go".to_string()
            }
        },
        HashMap::from([
            ("go".to_string(), "b".to_string()),
            ("stop".to_string(), END.to_string()),
        ]),
    );
    builder.add_edge("b", "a");

    let compiled = builder.compile(CompileConfig::new()).unwrap();
    let mut events = compiled.stream(StateData::new(), RunConfig::new());

    let mut visited = Vec::new();
    while let Some(event) = events.next().await {
        if let RunEvent::Step(step) = event.unwrap() {
            visited.push(step.node.clone());
            if step.is_final {
                assert_eq!(step.state["x"].as_f64(), Some(2.0));
            }
        }
    }
    assert_eq!(visited, vec!["a", "b", "a"]);
}

#[tokio::test]
async fn unmapped_label_is_a_fatal_routing_error() {
    let mut builder = GraphBuilder::new();
    builder.add_node("a", emit("x", json!(1)));
    builder.add_edge(START, "a");
    builder.add_conditional_edge(
        "a",
        |_state| "nowhere".to_string(),
        HashMap::from([("done".to_string(), END.to_string())]),
    );

    let compiled = builder.compile(CompileConfig::new()).unwrap();
    let err = compiled.invoke(StateData::new()).await.unwrap_err();
    assert!(matches!(
        err,
        GraphError::Routing { ref node, ref label } if node == "a" && label == "nowhere"
    ));
}

fn fanout_builder(slow_first: bool) -> GraphBuilder {
    let mut builder = GraphBuilder::new();
    builder.add_channel("log", Appender);
    builder.add_node("a", emit("log", json!(["a"])));
    let b_delay = if slow_first { 40 } else { 0 };
    builder.add_node("b", move |_state, _config| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(b_delay)).await;
            Ok(NodeOutput::Update(update("log", json!(["b"]))))
        })
    });
    builder.add_node("c", emit("log", json!(["c"])));
    builder.add_node("collect", |_state, _config| {
        Box::pin(async move { Ok(NodeOutput::empty()) })
    });
    builder.add_edge(START, "a");
    builder.add_edge("a", "b");
    builder.add_edge("a", "c");
    builder.add_edge("b", "collect");
    builder.add_edge("c", "collect");
    builder.add_edge("collect", END);
    builder
}

// Fan-out of a into {b, c}: the append channel must see b before c because
// that is the declaration order, even when b's future resolves last.
#[tokio::test]
async fn parallel_merge_follows_declaration_order_not_completion_order() {
    let compiled = fanout_builder(true).compile(CompileConfig::new()).unwrap();
    let state = final_state(compiled.invoke(StateData::new()).await.unwrap());
    assert_eq!(state["log"], json!(["a", "b", "c"]));
}

#[tokio::test]
async fn repeated_parallel_runs_are_deterministic() {
    let compiled = Arc::new(fanout_builder(true).compile(CompileConfig::new()).unwrap());
    for _ in 0..5 {
        let state = final_state(compiled.invoke(StateData::new()).await.unwrap());
        assert_eq!(state["log"], json!(["a", "b", "c"]));
    }
}

#[tokio::test]
async fn fanout_step_reports_per_branch_updates() {
    let compiled = fanout_builder(false).compile(CompileConfig::new()).unwrap();
    let mut events = compiled.stream(StateData::new(), RunConfig::new());

    let mut saw_fanout = false;
    while let Some(event) = events.next().await {
        if let RunEvent::Step(step) = event.unwrap() {
            if step.node == "__parallel__(a)" {
                saw_fanout = true;
                assert_eq!(step.update["b"]["log"], json!(["b"]));
                assert_eq!(step.update["c"]["log"], json!(["c"]));
            }
        }
    }
    assert!(saw_fanout);
}

// One branch failing must fail the whole step and leave the canonical
// state exactly where the previous checkpoint put it.
#[tokio::test]
async fn failing_branch_discards_sibling_results() {
    let store = Arc::new(MemoryCheckpointStore::new());

    let mut builder = GraphBuilder::new();
    builder.add_channel("log", Appender);
    builder.add_node("a", emit("log", json!(["a"])));
    builder.add_node("ok", emit("log", json!(["ok"])));
    builder.add_node("bad", |_state, _config| {
        Box::pin(async move {
            Err::<NodeOutput, _>(GraphError::node_execution("bad", "branch exploded"))
        })
    });
    builder.add_node("collect", |_state, _config| {
        Box::pin(async move { Ok(NodeOutput::empty()) })
    });
    builder.add_edge(START, "a");
    builder.add_edge("a", "ok");
    builder.add_edge("a", "bad");
    builder.add_edge("ok", "collect");
    builder.add_edge("bad", "collect");
    builder.add_edge("collect", END);

    let compiled = builder
        .compile(CompileConfig::new().with_store(store.clone()))
        .unwrap();
    let config = RunConfig::new().with_thread_id("isolation");
    let err = compiled
        .invoke_with_config(StateData::new(), config)
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::Branch { ref node, .. } if node == "bad"));

    // The last checkpoint is a's step; nothing from the fan-out landed.
    let latest = store.get("isolation", None).await.unwrap().unwrap();
    assert_eq!(latest.node_id, "a");
    assert_eq!(latest.values["log"], json!(["a"]));
}

#[tokio::test]
async fn every_step_appends_one_checkpoint() {
    let store = Arc::new(MemoryCheckpointStore::new());

    let mut builder = GraphBuilder::new();
    builder.add_node("a", emit("x", json!(1)));
    builder.add_node("b", emit("y", json!(2)));
    builder.add_edge(START, "a");
    builder.add_edge("a", "b");
    builder.add_edge("b", END);

    let compiled = builder
        .compile(CompileConfig::new().with_store(store.clone()))
        .unwrap();
    let config = RunConfig::new().with_thread_id("audit");
    final_state(compiled.invoke_with_config(StateData::new(), config).await.unwrap());

    let history = store.list("audit").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].node_id, "b");
    assert_eq!(history[0].next_node_id, END);
    assert_eq!(history[1].node_id, "a");
    assert_eq!(history[1].next_node_id, "b");
}

// A failed run leaves its last checkpoint resumable: the retry re-enters
// at the failed node without re-running the nodes before it.
#[tokio::test]
async fn failed_run_resumes_from_last_checkpoint()
{
    let store = Arc::new(MemoryCheckpointStore::new());
    let a_runs = Arc::new(AtomicUsize::new(0));
    let b_attempts = Arc::new(AtomicUsize::new(0));

    let mut builder = GraphBuilder::new();
    builder.add_channel("log", Appender);
    let a_counter = a_runs.clone();
    builder.add_node("a", move |_state, _config| {
        let a_counter = a_counter.clone();
        Box::pin(async move {
            a_counter.fetch_add(1, Ordering::SeqCst);
            Ok(NodeOutput::Update(update("log", json!(["a"]))))
        })
    });
    let b_counter = b_attempts.clone();
    builder.add_node("b", move |_state, _config| {
        let b_counter = b_counter.clone();
        Box::pin(async move {
            if b_counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(GraphError::node_execution("b", "transient failure"))
            } else {
                Ok(NodeOutput::Update(update("log", json!(["b"]))))
            }
        })
    });
    builder.add_edge(START, "a");
    builder.add_edge("a", "b");
    builder.add_edge("b", END);

    let compiled = builder
        .compile(CompileConfig::new().with_store(store.clone()))
        .unwrap();

    let config = RunConfig::new().with_thread_id("retry");
    let err = compiled
        .invoke_with_config(StateData::new(), config.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::NodeExecution { ref node, .. } if node == "b"));

    let outcome = compiled.resume(config).await.unwrap();
    let state = final_state(outcome);
    assert_eq!(state["log"], json!(["a", "b"]));
    assert_eq!(a_runs.load(Ordering::SeqCst), 1, "a must not re-run");
    assert_eq!(b_attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn resume_without_store_is_a_configuration_error() {
    let mut builder = GraphBuilder::new();
    builder.add_node("a", emit("x", json!(1)));
    builder.add_edge(START, "a");
    builder.add_edge("a", END);

    let compiled = builder.compile(CompileConfig::new()).unwrap();
    let err = compiled.resume(RunConfig::new()).await.unwrap_err();
    assert!(matches!(err, GraphError::Configuration(_)));
}

fn gated_builder(tool_runs: Arc<AtomicUsize>) -> GraphBuilder {
    let mut builder = GraphBuilder::new();
    builder.add_node("draft", emit("send_mail_args", json!({"to": "ops", "body": "hi"})));
    builder.add_node("tool", move |state, _config| {
        let tool_runs = tool_runs.clone();
        Box::pin(async move {
            tool_runs.fetch_add(1, Ordering::SeqCst);
            let args = state.get("send_mail_args").cloned().unwrap_or(json!(null));
            Ok(NodeOutput::Update(update(
                "send_mail_result",
                json!({"status": "sent", "args": args}),
            )))
        })
    });
    builder.add_edge(START, "draft");
    builder.add_edge("draft", "tool");
    builder.add_edge("tool", END);
    builder
}

// Scenario: a gated node suspends with one pending item; resuming with a
// rejection must not invoke the gated operation and must substitute a
// result distinguishable from the approved path.
#[tokio::test]
async fn rejected_gate_skips_the_operation() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let tool_runs = Arc::new(AtomicUsize::new(0));

    let compiled = gated_builder(tool_runs.clone())
        .compile(
            CompileConfig::new()
                .with_store(store.clone())
                .with_gate(ApprovalGate::new("tool", "send_mail")),
        )
        .unwrap();

    let config = RunConfig::new().with_thread_id("reject-run");
    let outcome = compiled
        .invoke_with_config(StateData::new(), config.clone())
        .await
        .unwrap();
    let interruption = match outcome {
        RunOutcome::Suspended(interruption) => interruption,
        RunOutcome::Complete(_) => panic!("expected a suspension"),
    };
    assert_eq!(interruption.node, "tool");
    assert_eq!(interruption.items.len(), 1);
    assert_eq!(interruption.items[0].operation, "send_mail");
    assert_eq!(interruption.items[0].args["to"], json!("ops"));

    let state = final_state(
        compiled
            .resume(config.with_decision(interruption.items[0].id.clone(), Decision::Reject))
            .await
            .unwrap(),
    );
    assert_eq!(tool_runs.load(Ordering::SeqCst), 0, "gated operation must not run");
    assert_eq!(state["send_mail_result"]["status"], json!("rejected"));
    assert_eq!(state["send_mail_result"]["operation"], json!("send_mail"));
}

// Interrupt-then-approve must land on exactly the state an uninterrupted
// run produces.
#[tokio::test]
async fn approved_resume_matches_uninterrupted_run() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let gated_runs = Arc::new(AtomicUsize::new(0));
    let plain_runs = Arc::new(AtomicUsize::new(0));

    let gated = gated_builder(gated_runs.clone())
        .compile(
            CompileConfig::new()
                .with_store(store)
                .with_gate(ApprovalGate::new("tool", "send_mail")),
        )
        .unwrap();
    let plain = gated_builder(plain_runs)
        .compile(CompileConfig::new())
        .unwrap();

    let config = RunConfig::new().with_thread_id("approve-run");
    let interruption = gated
        .invoke_with_config(StateData::new(), config.clone())
        .await
        .unwrap()
        .into_interruption()
        .expect("gate must suspend the run");

    let resumed = final_state(
        gated
            .resume(config.with_decision(interruption.items[0].id.clone(), Decision::Approve))
            .await
            .unwrap(),
    );
    let uninterrupted = final_state(plain.invoke(StateData::new()).await.unwrap());

    assert_eq!(resumed, uninterrupted);
    assert_eq!(gated_runs.load(Ordering::SeqCst), 1);
    assert_eq!(resumed["send_mail_result"]["status"], json!("sent"));
}

#[tokio::test]
async fn edited_decision_substitutes_arguments() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let tool_runs = Arc::new(AtomicUsize::new(0));

    let compiled = gated_builder(tool_runs)
        .compile(
            CompileConfig::new()
                .with_store(store)
                .with_gate(ApprovalGate::new("tool", "send_mail")),
        )
        .unwrap();

    let config = RunConfig::new().with_thread_id("edit-run");
    let interruption = compiled
        .invoke_with_config(StateData::new(), config.clone())
        .await
        .unwrap()
        .into_interruption()
        .unwrap();

    let state = final_state(
        compiled
            .resume(config.with_decision(
                &interruption.items[0].id,
                Decision::Edit { args: json!({"to": "audit", "body": "edited"}) },
            ))
            .await
            .unwrap(),
    );
    assert_eq!(state["send_mail_result"]["args"]["to"], json!("audit"));
}

#[tokio::test]
async fn resume_without_decisions_is_rejected() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let compiled = gated_builder(Arc::new(AtomicUsize::new(0)))
        .compile(
            CompileConfig::new()
                .with_store(store)
                .with_gate(ApprovalGate::new("tool", "send_mail")),
        )
        .unwrap();

    let config = RunConfig::new().with_thread_id("undecided");
    compiled
        .invoke_with_config(StateData::new(), config.clone())
        .await
        .unwrap();

    let err = compiled.resume(config).await.unwrap_err();
    assert!(matches!(err, GraphError::MissingDecision { ref node, .. } if node == "tool"));
}

#[tokio::test]
async fn breakpoint_pauses_and_plain_resume_continues() {
    let store = Arc::new(MemoryCheckpointStore::new());

    let mut builder = GraphBuilder::new();
    builder.add_channel("log", Appender);
    builder.add_node("a", emit("log", json!(["a"])));
    builder.add_node("b", emit("log", json!(["b"])));
    builder.add_edge(START, "a");
    builder.add_edge("a", "b");
    builder.add_edge("b", END);

    let compiled = builder
        .compile(
            CompileConfig::new()
                .with_store(store)
                .with_interrupt_before(["b"]),
        )
        .unwrap();

    let config = RunConfig::new().with_thread_id("breakpoint");
    let interruption = compiled
        .invoke_with_config(StateData::new(), config.clone())
        .await
        .unwrap()
        .into_interruption()
        .expect("breakpoint must pause");
    assert_eq!(interruption.node, "b");
    assert!(interruption.items.is_empty());
    assert_eq!(interruption.state["log"], json!(["a"]));

    let state = final_state(compiled.resume(config).await.unwrap());
    assert_eq!(state["log"], json!(["a", "b"]));
}

#[tokio::test]
async fn release_on_complete_archives_the_thread() {
    let store = Arc::new(MemoryCheckpointStore::new());

    let mut builder = GraphBuilder::new();
    builder.add_node("a", emit("x", json!(1)));
    builder.add_edge(START, "a");
    builder.add_edge("a", END);

    let compiled = builder
        .compile(
            CompileConfig::new()
                .with_store(store.clone())
                .release_on_complete(),
        )
        .unwrap();

    let config = RunConfig::new().with_thread_id("released");
    final_state(compiled.invoke_with_config(StateData::new(), config).await.unwrap());

    assert!(store.get("released", None).await.unwrap().is_none());
}

// Independent threads can run concurrently against one compiled graph and
// one store without observing each other.
#[tokio::test]
async fn concurrent_threads_stay_isolated() {
    let store = Arc::new(MemoryCheckpointStore::new());

    let mut builder = GraphBuilder::new();
    builder.add_node("echo", |state, _config| {
        Box::pin(async move {
            let who = state.get("who").cloned().unwrap_or(json!("nobody"));
            Ok(NodeOutput::Update(update("seen", who)))
        })
    });
    builder.add_edge(START, "echo");
    builder.add_edge("echo", END);

    let compiled = Arc::new(
        builder
            .compile(CompileConfig::new().with_store(store.clone()))
            .unwrap(),
    );

    let mut handles = Vec::new();
    for i in 0..8 {
        let compiled = compiled.clone();
        handles.push(tokio::spawn(async move {
            let config = RunConfig::new().with_thread_id(format!("worker-{i}"));
            let input = StateData::from([("who".to_string(), json!(format!("agent-{i}")))]);
            final_state(compiled.invoke_with_config(input, config).await.unwrap())
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let state = handle.await.unwrap();
        assert_eq!(state["seen"], json!(format!("agent-{i}")));
    }
    for i in 0..8 {
        let latest = store
            .get(&format!("worker-{i}"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.values["seen"], json!(format!("agent-{i}")));
    }
}

// Suspension survives the process: a second compiled instance over the
// same file-backed store picks the paused run up from disk.
#[tokio::test]
async fn suspended_run_resumes_through_a_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let tool_runs = Arc::new(AtomicUsize::new(0));

    let build = |tool_runs: Arc<AtomicUsize>| {
        let store = Arc::new(
            trellis_checkpoint::FileCheckpointStore::new(dir.path()).unwrap(),
        );
        gated_builder(tool_runs)
            .compile(
                CompileConfig::new()
                    .with_store(store)
                    .with_gate(ApprovalGate::new("tool", "send_mail")),
            )
            .unwrap()
    };

    let config = RunConfig::new().with_thread_id("durable");
    let first = build(tool_runs.clone());
    let interruption = first
        .invoke_with_config(StateData::new(), config.clone())
        .await
        .unwrap()
        .into_interruption()
        .expect("gate must suspend");
    drop(first);

    // Fresh compiled graph, fresh store handle, same directory.
    let second = build(tool_runs.clone());
    let state = final_state(
        second
            .resume(config.with_decision(interruption.items[0].id.clone(), Decision::Approve))
            .await
            .unwrap(),
    );
    assert_eq!(state["send_mail_result"]["status"], json!("sent"));
    assert_eq!(tool_runs.load(Ordering::SeqCst), 1);
}
