//! Subgraph embedding: state reconciliation, thread namespacing, and
//! interruption propagation through nested graphs.

use futures::StreamExt;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use trellis_core::{
    ApprovalGate, Appender, CheckpointStore, CompileConfig, Decision, GraphBuilder,
    MemoryCheckpointStore,
    NodeOutput, RunConfig, RunEvent, RunOutcome, StateData, StateUpdate, END, START,
    SUBGRAPH_NS_SEP,
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

#[tokio::test]
async fn child_final_state_merges_into_parent() {
    let mut child = GraphBuilder::new();
    child.add_node("inner_work", emit("inner_done", json!(true)));
    child.add_edge(START, "inner_work");
    child.add_edge("inner_work", END);
    let child = child.compile(CompileConfig::new()).unwrap();

    let mut parent = GraphBuilder::new();
    parent.add_node("before", emit("outer", json!("ready")));
    parent.add_subgraph("stage", child);
    parent.add_edge(START, "before");
    parent.add_edge("before", "stage");
    parent.add_edge("stage", END);

    let compiled = parent.compile(CompileConfig::new()).unwrap();
    let state = final_state(compiled.invoke(StateData::new()).await.unwrap());

    assert_eq!(state["outer"], json!("ready"));
    assert_eq!(state["inner_done"], json!(true));
}

#[tokio::test]
async fn child_sees_parent_state_as_initial_state() {
    let mut child = GraphBuilder::new();
    child.add_node("reader", |state, _config| {
        Box::pin(async move {
            let seen = state.get("outer").cloned().unwrap_or(json!(null));
            Ok(NodeOutput::Update(update("child_saw", seen)))
        })
    });
    child.add_edge(START, "reader");
    child.add_edge("reader", END);
    let child = child.compile(CompileConfig::new()).unwrap();

    let mut parent = GraphBuilder::new();
    parent.add_node("before", emit("outer", json!("from-parent")));
    parent.add_subgraph("stage", child);
    parent.add_edge(START, "before");
    parent.add_edge("before", "stage");
    parent.add_edge("stage", END);

    let compiled = parent.compile(CompileConfig::new()).unwrap();
    let state = final_state(compiled.invoke(StateData::new()).await.unwrap());
    assert_eq!(state["child_saw"], json!("from-parent"));
}

#[tokio::test]
async fn shared_store_namespaces_the_child_thread() {
    let store = Arc::new(MemoryCheckpointStore::new());

    let mut child = GraphBuilder::new();
    child.add_node("inner_work", emit("inner_done", json!(true)));
    child.add_edge(START, "inner_work");
    child.add_edge("inner_work", END);
    let child = child
        .compile(CompileConfig::new().with_store(store.clone()))
        .unwrap();

    let mut parent = GraphBuilder::new();
    parent.add_subgraph("stage", child);
    parent.add_edge(START, "stage");
    parent.add_edge("stage", END);
    let compiled = parent
        .compile(CompileConfig::new().with_store(store.clone()))
        .unwrap();

    let config = RunConfig::new().with_thread_id("job-7");
    final_state(
        compiled
            .invoke_with_config(StateData::new(), config)
            .await
            .unwrap(),
    );

    let child_thread = format!("job-7{SUBGRAPH_NS_SEP}stage");
    let child_history = store.list(&child_thread).await.unwrap();
    assert!(!child_history.is_empty(), "child history must be namespaced");
    let parent_history = store.list("job-7").await.unwrap();
    assert!(!parent_history.is_empty());
}

#[tokio::test]
async fn child_steps_tunnel_into_parent_stream() {
    let mut child = GraphBuilder::new();
    child.add_node("inner_work", emit("inner_done", json!(true)));
    child.add_edge(START, "inner_work");
    child.add_edge("inner_work", END);
    let child = child.compile(CompileConfig::new()).unwrap();

    let mut parent = GraphBuilder::new();
    parent.add_subgraph("stage", child);
    parent.add_edge(START, "stage");
    parent.add_edge("stage", END);
    let compiled = parent.compile(CompileConfig::new()).unwrap();

    let mut events = compiled.stream(StateData::new(), RunConfig::new());
    let mut nodes = Vec::new();
    while let Some(event) = events.next().await {
        if let RunEvent::Step(step) = event.unwrap() {
            nodes.push(step.node.clone());
        }
    }

    // The child's step surfaces path-qualified, ahead of the parent step
    // that produced it.
    assert_eq!(nodes, vec!["stage/inner_work", "stage"]);
}

#[tokio::test]
async fn child_interruption_propagates_and_resumes_down() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let tool_runs = Arc::new(AtomicUsize::new(0));

    let mut child = GraphBuilder::new();
    child.add_node("draft", emit("deploy_args", json!({"env": "prod"})));
    let tool_counter = tool_runs.clone();
    child.add_node("deploy", move |_state, _config| {
        let tool_counter = tool_counter.clone();
        Box::pin(async move {
            tool_counter.fetch_add(1, Ordering::SeqCst);
            Ok(NodeOutput::Update(update("deploy_result", json!({"status": "deployed"}))))
        })
    });
    child.add_edge(START, "draft");
    child.add_edge("draft", "deploy");
    child.add_edge("deploy", END);
    let child = child
        .compile(
            CompileConfig::new()
                .with_store(store.clone())
                .with_gate(ApprovalGate::new("deploy", "deploy")),
        )
        .unwrap();

    let mut parent = GraphBuilder::new();
    parent.add_channel("log", Appender);
    parent.add_node("before", emit("log", json!(["before"])));
    parent.add_subgraph("stage", child);
    parent.add_node("after", emit("log", json!(["after"])));
    parent.add_edge(START, "before");
    parent.add_edge("before", "stage");
    parent.add_edge("stage", "after");
    parent.add_edge("after", END);
    let compiled = parent
        .compile(CompileConfig::new().with_store(store.clone()))
        .unwrap();

    let config = RunConfig::new().with_thread_id("rollout");
    let interruption = compiled
        .invoke_with_config(StateData::new(), config.clone())
        .await
        .unwrap()
        .into_interruption()
        .expect("child gate must suspend the parent run");

    // Unchanged in content, tagged with the route back down.
    assert_eq!(interruption.node, "deploy");
    assert_eq!(interruption.path, vec!["stage"]);
    assert_eq!(interruption.qualified_node(), "stage/deploy");
    assert_eq!(interruption.items.len(), 1);
    assert_eq!(interruption.items[0].operation, "deploy");
    assert_eq!(tool_runs.load(Ordering::SeqCst), 0);

    let state = final_state(
        compiled
            .resume(config.with_decision(interruption.items[0].id.clone(), Decision::Approve))
            .await
            .unwrap(),
    );
    assert_eq!(tool_runs.load(Ordering::SeqCst), 1);
    assert_eq!(state["deploy_result"]["status"], json!("deployed"));
    assert_eq!(state["log"], json!(["before", "after"]));
}

#[tokio::test]
async fn nested_subgraphs_namespace_recursively() {
    let store = Arc::new(MemoryCheckpointStore::new());

    let mut innermost = GraphBuilder::new();
    innermost.add_node("leaf", emit("depth", json!(2)));
    innermost.add_edge(START, "leaf");
    innermost.add_edge("leaf", END);
    let innermost = innermost
        .compile(CompileConfig::new().with_store(store.clone()))
        .unwrap();

    let mut middle = GraphBuilder::new();
    middle.add_subgraph("inner", innermost);
    middle.add_edge(START, "inner");
    middle.add_edge("inner", END);
    let middle = middle
        .compile(CompileConfig::new().with_store(store.clone()))
        .unwrap();

    let mut outer = GraphBuilder::new();
    outer.add_subgraph("mid", middle);
    outer.add_edge(START, "mid");
    outer.add_edge("mid", END);
    let compiled = outer
        .compile(CompileConfig::new().with_store(store.clone()))
        .unwrap();

    let config = RunConfig::new().with_thread_id("root");
    let state = final_state(
        compiled
            .invoke_with_config(StateData::new(), config)
            .await
            .unwrap(),
    );
    assert_eq!(state["depth"], json!(2));

    let deepest = store.list("root/mid/inner").await.unwrap();
    assert!(!deepest.is_empty(), "deep nesting must stay collision-free");
}
