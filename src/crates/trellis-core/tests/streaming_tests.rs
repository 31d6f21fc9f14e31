//! Streaming results: branches that hand back live streams instead of
//! values, and how they surface through the step sequence.

use futures::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use trellis_core::{
    CompileConfig, GraphBuilder, NodeOutput, Reducer, RunConfig, RunEvent, StateData, StateUpdate,
    END, START,
};

fn token_stream(tokens: &'static [&'static str]) -> NodeOutput {
    NodeOutput::Stream(
        futures::stream::iter(tokens.iter().map(|t| json!(t)))
            .boxed(),
    )
}

#[tokio::test]
async fn fanout_exposes_streams_and_merges_values() {
    let mut builder = GraphBuilder::new();
    builder.add_channel("tally", Reducer::sum());
    builder.add_node("fork", |_state, _config| {
        Box::pin(async move { Ok(NodeOutput::empty()) })
    });
    builder.add_node("talker", |_state, _config| {
        Box::pin(async move { Ok(token_stream(&["hel", "lo"])) })
    });
    builder.add_node("counter", |_state, _config| {
        Box::pin(async move {
            Ok(NodeOutput::Update(StateUpdate::from([(
                "tally".to_string(),
                json!(1),
            )])))
        })
    });
    builder.add_node("join", |_state, _config| {
        Box::pin(async move { Ok(NodeOutput::empty()) })
    });
    builder.add_edge(START, "fork");
    builder.add_edge("fork", "talker");
    builder.add_edge("fork", "counter");
    builder.add_edge("talker", "join");
    builder.add_edge("counter", "join");
    builder.add_edge("join", END);

    let compiled = builder.compile(CompileConfig::new()).unwrap();
    let mut events = compiled.stream(StateData::new(), RunConfig::new());

    let mut tokens: Vec<(String, serde_json::Value)> = Vec::new();
    let mut merged_tally = None;
    while let Some(event) = events.next().await {
        if let RunEvent::Step(step) = event.unwrap() {
            if step.node == "__parallel__(fork)" {
                // The value branch merged; the streaming branch did not.
                merged_tally = step.state.get("tally").cloned();
                let streams = step.streams.expect("streaming branch must surface");
                assert_eq!(streams.sources(), vec!["talker"]);
                tokens = streams.merged().collect().await;
            }
        }
    }

    assert_eq!(merged_tally, Some(json!(1)));
    assert_eq!(
        tokens,
        vec![
            ("talker".to_string(), json!("hel")),
            ("talker".to_string(), json!("lo")),
        ]
    );
}

#[tokio::test]
async fn single_node_stream_surfaces_with_unchanged_state() {
    let mut builder = GraphBuilder::new();
    builder.add_node("talker", |_state, _config| {
        Box::pin(async move { Ok(token_stream(&["a", "b", "c"])) })
    });
    builder.add_edge(START, "talker");
    builder.add_edge("talker", END);

    let compiled = builder.compile(CompileConfig::new()).unwrap();
    let mut events = compiled.stream(
        StateData::from([("seed".to_string(), json!(7))]),
        RunConfig::new(),
    );

    let mut collected = Vec::new();
    while let Some(event) = events.next().await {
        if let RunEvent::Step(step) = event.unwrap() {
            if step.node == "talker" {
                assert!(step.update.is_empty());
                assert_eq!(step.state["seed"], json!(7));
                let streams = step.streams.expect("stream handle must surface");
                collected = streams.merged().collect().await;
            }
        }
    }

    let values: Vec<serde_json::Value> = collected.into_iter().map(|(_, v)| v).collect();
    assert_eq!(values, vec![json!("a"), json!("b"), json!("c")]);
}

#[tokio::test]
async fn conditional_can_route_into_a_streaming_node() {
    let mut builder = GraphBuilder::new();
    builder.add_node("pick", |_state, _config| {
        Box::pin(async move { Ok(NodeOutput::empty()) })
    });
    builder.add_node("stream_out", |_state, _config| {
        Box::pin(async move { Ok(token_stream(&["x"])) })
    });
    builder.add_edge(START, "pick");
    builder.add_conditional_edge(
        "pick",
        |_state| "talk".to_string(),
        HashMap::from([("talk".to_string(), "stream_out".to_string())]),
    );
    builder.add_edge("stream_out", END);

    let compiled = builder.compile(CompileConfig::new()).unwrap();
    let mut events = compiled.stream(StateData::new(), RunConfig::new());

    let mut final_node = None;
    while let Some(event) = events.next().await {
        if let RunEvent::Step(step) = event.unwrap() {
            if step.is_final {
                final_node = Some(step.node.clone());
            }
        }
    }
    assert_eq!(final_node.as_deref(), Some("stream_out"));
}
