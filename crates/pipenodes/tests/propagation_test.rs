use pipecore::{NodeKind, PropagationEvent, RuntimeState};
use pipenodes::{default_registry, GOOGLE_RESPONSE};
use piperuntime::{PipelineRuntime, RuntimeConfig};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;

fn runtime() -> PipelineRuntime {
    PipelineRuntime::new(Arc::new(default_registry()))
}

fn incremental_runtime() -> PipelineRuntime {
    PipelineRuntime::with_config(
        Arc::new(default_registry()),
        RuntimeConfig {
            reconcile_after_mutation: false,
            ..RuntimeConfig::default()
        },
    )
}

fn value<'r>(runtime: &'r PipelineRuntime, id: &str) -> &'r str {
    &runtime.node(id).unwrap().data.state.value
}

fn edit(runtime: &mut PipelineRuntime, id: &str, partial: JsonValue) {
    runtime
        .edit_node_field(id, partial.as_object().unwrap())
        .unwrap();
}

fn states(runtime: &PipelineRuntime) -> BTreeMap<String, RuntimeState> {
    runtime
        .graph()
        .nodes()
        .iter()
        .map(|n| (n.id.clone(), n.data.state.clone()))
        .collect()
}

fn google_pipeline() -> JsonValue {
    json!({
        "nodes": [
            {"id": "in", "type": "input", "position": {"x": 0, "y": 0}, "data": {"value": "googles history"}},
            {"id": "text", "type": "text", "data": {"text": "Tell me about {{input}}"}},
            {"id": "llm", "type": "llm", "data": {"model": "gpt-4", "temperature": 0.7}},
            {"id": "out", "type": "output", "data": {}}
        ],
        "edges": [
            {"id": "e1", "source": "in", "sourceHandle": "output", "target": "text", "targetHandle": "input"},
            {"id": "e2", "source": "text", "sourceHandle": "output", "target": "llm", "targetHandle": "input"},
            {"id": "e3", "source": "llm", "sourceHandle": "output", "target": "out", "targetHandle": "input"}
        ]
    })
}

#[test]
fn test_google_pipeline_end_to_end() {
    let mut runtime = runtime();
    runtime.load_value(&google_pipeline());

    assert_eq!(value(&runtime, "text"), "Tell me about googles history");
    assert_eq!(value(&runtime, "llm"), GOOGLE_RESPONSE);
    assert_eq!(value(&runtime, "out"), GOOGLE_RESPONSE);

    runtime.delete_edge("e3").unwrap();
    assert_eq!(value(&runtime, "out"), GOOGLE_RESPONSE);
}

#[test]
fn test_google_pipeline_built_interactively() {
    let mut runtime = runtime();
    let input = runtime.add_node(NodeKind::Input, None).unwrap();
    let text = runtime.add_node(NodeKind::Text, None).unwrap();
    let llm = runtime.add_node(NodeKind::Llm, None).unwrap();
    let out = runtime.add_node(NodeKind::Output, None).unwrap();

    runtime.connect_edge(&input, Some("output"), &text, Some("input")).unwrap();
    runtime.connect_edge(&text, Some("output"), &llm, Some("input")).unwrap();
    runtime.connect_edge(&llm, Some("output"), &out, Some("input")).unwrap();
    edit(&mut runtime, &text, json!({"text": "Tell me about {{input}}"}));

    edit(&mut runtime, &input, json!({"value": "googles history"}));
    assert_eq!(value(&runtime, &out), GOOGLE_RESPONSE);
}

#[test]
fn test_full_and_incremental_passes_agree() {
    let mut live = incremental_runtime();
    let in1 = live.add_node(NodeKind::Input, None).unwrap();
    let in2 = live.add_node(NodeKind::Input, None).unwrap();
    let text = live.add_node(NodeKind::Text, None).unwrap();
    let upper = live.add_node(NodeKind::Transform, None).unwrap();
    let merge = live.add_node(NodeKind::Merge, None).unwrap();
    let filter = live.add_node(NodeKind::Filter, None).unwrap();
    let out = live.add_node(NodeKind::Output, None).unwrap();

    edit(&mut live, &in1, json!({"value": "alpha"}));
    edit(&mut live, &in2, json!({"value": "beta"}));
    edit(&mut live, &text, json!({"text": "{{a}} and {{ b }}"}));
    edit(&mut live, &merge, json!({"strategy": "zip"}));
    edit(&mut live, &filter, json!({"filterType": "contains", "condition": "AND"}));

    live.connect_edge(&in1, Some("output"), &text, Some("input-a")).unwrap();
    live.connect_edge(&in2, Some("output"), &text, Some("input-b")).unwrap();
    live.connect_edge(&text, Some("output"), &upper, Some("input")).unwrap();
    live.connect_edge(&upper, Some("output"), &merge, Some("input1")).unwrap();
    live.connect_edge(&in2, Some("output"), &merge, Some("input2")).unwrap();
    live.connect_edge(&merge, Some("output"), &filter, Some("input")).unwrap();
    live.connect_edge(&filter, Some("output"), &out, Some("input")).unwrap();
    assert_eq!(value(&live, &out), "ALPHA AND BETA | beta");

    edit(&mut live, &in2, json!({"value": "gamma"}));
    assert_eq!(value(&live, &out), "ALPHA AND GAMMA | gamma");

    let mut reloaded = runtime();
    reloaded.load(live.snapshot());
    assert_eq!(states(&reloaded), states(&live));
}

#[test]
fn test_condition_routes_to_one_branch() {
    let mut runtime = runtime();
    runtime.load_value(&json!({
        "nodes": [
            {"id": "in", "type": "input", "data": {"value": "hi"}},
            {"id": "gate", "type": "condition", "data": {"expression": "length > 3"}},
            {"id": "long", "type": "output", "data": {}},
            {"id": "short", "type": "output", "data": {}}
        ],
        "edges": [
            {"source": "in", "target": "gate"},
            {"source": "gate", "sourceHandle": "true", "target": "long"},
            {"source": "gate", "sourceHandle": "false", "target": "short"}
        ]
    }));

    assert_eq!(runtime.node("gate").unwrap().data.state.condition_result, Some(false));
    assert_eq!(value(&runtime, "gate"), "hi");
    assert_eq!(value(&runtime, "long"), "");
    assert_eq!(value(&runtime, "short"), "hi");

    edit(&mut runtime, "in", json!({"value": "hello"}));
    assert_eq!(runtime.node("gate").unwrap().data.state.condition_result, Some(true));
    assert_eq!(value(&runtime, "long"), "hello");
    assert_eq!(value(&runtime, "short"), "");
}

#[test]
fn test_condition_feeding_condition() {
    let mut runtime = runtime();
    runtime.load_value(&json!({
        "nodes": [
            {"id": "in", "type": "input", "data": {"value": "rustacean"}},
            {"id": "out", "type": "output", "data": {}},
            {"id": "inner", "type": "condition", "data": {"expression": "contains 'rust'"}},
            {"id": "outer", "type": "condition", "data": {"expression": "length > 3"}}
        ],
        "edges": [
            {"source": "inner", "sourceHandle": "true", "target": "out"},
            {"source": "outer", "sourceHandle": "true", "target": "inner"},
            {"source": "in", "target": "outer"}
        ]
    }));

    assert_eq!(value(&runtime, "out"), "rustacean");
}

#[test]
fn test_merge_collects_named_ports_and_prunes_disconnected() {
    let mut runtime = runtime();
    runtime.load_value(&json!({
        "nodes": [
            {"id": "a", "type": "input", "data": {"value": "first"}},
            {"id": "b", "type": "input", "data": {"value": "second"}},
            {"id": "c", "type": "input", "data": {"value": "extra"}},
            {"id": "m", "type": "merge", "data": {"strategy": "union"}},
            {"id": "out", "type": "output", "data": {}}
        ],
        "edges": [
            {"id": "ec", "source": "c", "target": "m", "targetHandle": "zeta"},
            {"id": "eb", "source": "b", "target": "m", "targetHandle": "input2"},
            {"id": "ea", "source": "a", "target": "m", "targetHandle": "input1"},
            {"id": "eo", "source": "m", "target": "out"}
        ]
    }));
    assert_eq!(value(&runtime, "out"), "first, second, extra");

    runtime.delete_edge("eb").unwrap();
    assert_eq!(value(&runtime, "m"), "first, extra");
    assert_eq!(value(&runtime, "out"), "first, extra");
    assert!(!runtime.node("m").unwrap().data.state.input_values.contains_key("input2"));

    runtime.delete_node("c").unwrap();
    assert_eq!(value(&runtime, "out"), "first");
}

#[test]
fn test_merge_ports_follow_incoming_edges() {
    let mut runtime = runtime();
    runtime.load_value(&json!({
        "nodes": [
            {"id": "a", "type": "input", "data": {"value": "first"}},
            {"id": "c", "type": "input", "data": {"value": ""}},
            {"id": "m", "type": "merge", "data": {}}
        ],
        "edges": [
            {"id": "ea", "source": "a", "target": "m", "targetHandle": "input1"},
            {"id": "ec", "source": "c", "target": "m", "targetHandle": "input3"}
        ]
    }));
    // an empty source stores nothing but its port stays visible
    assert!(!runtime.node("m").unwrap().data.state.input_values.contains_key("input3"));
    let ports = runtime.ports("m").unwrap();
    assert_eq!(ports.inputs, vec!["input1", "input2", "input3"]);

    runtime.delete_edge("ec").unwrap();
    assert_eq!(runtime.ports("m").unwrap().inputs, vec!["input1", "input2"]);
    assert!(runtime.ports("ghost").is_none());
}

#[test]
fn test_text_binding_pruned_when_edge_removed() {
    let mut runtime = runtime();
    runtime.load_value(&json!({
        "nodes": [
            {"id": "who", "type": "input", "data": {"value": "Ada"}},
            {"id": "t", "type": "text", "data": {"text": "Hi {{name}}"}}
        ],
        "edges": [{"id": "e", "source": "who", "target": "t", "targetHandle": "input-name"}]
    }));
    assert_eq!(value(&runtime, "t"), "Hi Ada");

    runtime.delete_edge("e").unwrap();
    assert_eq!(value(&runtime, "t"), "Hi {{name}}");
    assert!(runtime.node("t").unwrap().data.state.variable_values.is_empty());
}

#[test]
fn test_config_edit_recomputes_downstream() {
    let mut runtime = runtime();
    runtime.load_value(&json!({
        "nodes": [
            {"id": "in", "type": "input", "data": {"value": "  spaced   out  "}},
            {"id": "dp", "type": "dataProcessing", "data": {"mode": "normalize"}},
            {"id": "tr", "type": "transform", "data": {"transformType": "uppercase"}},
            {"id": "out", "type": "output", "data": {}}
        ],
        "edges": [
            {"source": "in", "target": "dp"},
            {"source": "dp", "target": "tr"},
            {"source": "tr", "target": "out"}
        ]
    }));
    assert_eq!(value(&runtime, "out"), "SPACED OUT");

    edit(&mut runtime, "tr", json!({"transformType": "reverse"}));
    assert_eq!(value(&runtime, "out"), "tuo decaps");

    edit(&mut runtime, "dp", json!({"mode": "aggregate"}));
    assert_eq!(value(&runtime, "out"), "]  tuo   decaps   :detagerggA[");
}

#[test]
fn test_failing_filter_sends_empty_value() {
    let mut runtime = runtime();
    runtime.load_value(&json!({
        "nodes": [
            {"id": "in", "type": "input", "data": {"value": "tea"}},
            {"id": "f", "type": "filter", "data": {"filterType": "startsWith", "condition": "cof"}},
            {"id": "llm", "type": "llm", "data": {"model": "claude"}},
            {"id": "out", "type": "output", "data": {}}
        ],
        "edges": [
            {"source": "in", "target": "f"},
            {"source": "f", "target": "llm"},
            {"source": "llm", "target": "out"}
        ]
    }));
    assert_eq!(value(&runtime, "f"), "");
    assert_eq!(
        value(&runtime, "out"),
        "\"\" is a topic that can be approached from several angles."
    );

    edit(&mut runtime, "in", json!({"value": "coffee"}));
    assert_eq!(
        value(&runtime, "out"),
        "\"coffee\" is a topic that can be approached from several angles."
    );
}

#[test]
fn test_cycle_is_bounded() {
    let mut runtime = runtime();
    let mut events = runtime.subscribe_events();
    let report = runtime.load_value(&json!({
        "nodes": [
            {"id": "in", "type": "input", "data": {"value": "loop"}},
            {"id": "m", "type": "merge", "data": {"strategy": "concat"}},
            {"id": "a", "type": "dataProcessing", "data": {"mode": "group"}},
            {"id": "b", "type": "transform", "data": {"transformType": "lowercase"}}
        ],
        "edges": [
            {"source": "in", "target": "m", "targetHandle": "input1"},
            {"source": "b", "target": "m", "targetHandle": "input2"},
            {"source": "m", "target": "a"},
            {"source": "a", "target": "b"}
        ]
    }));
    assert!(report.limit_reached);

    let mut saw_limit = false;
    while let Ok(event) = events.try_recv() {
        saw_limit |= matches!(event, PropagationEvent::CycleLimitReached { .. });
    }
    assert!(saw_limit);

    // the graph stays editable
    edit(&mut runtime, "in", json!({"value": "again"}));
    assert!(runtime.node("a").is_some());
}

#[test]
fn test_cycle_through_one_port_settles() {
    let mut runtime = runtime();
    let report = runtime.load_value(&json!({
        "nodes": [
            {"id": "in", "type": "input", "data": {"value": "loop"}},
            {"id": "a", "type": "dataProcessing", "data": {"mode": "group"}},
            {"id": "b", "type": "transform", "data": {"transformType": "reverse"}}
        ],
        "edges": [
            {"source": "in", "target": "a"},
            {"source": "a", "target": "b"},
            {"source": "b", "target": "a"}
        ]
    }));

    // the back edge is the last writer of `a` in every sweep
    assert!(!report.limit_reached);
    assert_eq!(value(&runtime, "b"), "]pool :depuorG[");
    assert_eq!(value(&runtime, "a"), "[Grouped: ]pool :depuorG[]");
}

#[test]
fn test_fan_in_does_not_report_a_cycle() {
    let mut runtime = runtime();
    let mut events = runtime.subscribe_events();
    let report = runtime.load_value(&json!({
        "nodes": [
            {"id": "a", "type": "input", "data": {"value": "x"}},
            {"id": "b", "type": "input", "data": {"value": "y"}},
            {"id": "out", "type": "output", "data": {}}
        ],
        "edges": [
            {"source": "a", "target": "out"},
            {"source": "b", "target": "out"}
        ]
    }));

    assert!(!report.limit_reached);
    assert!(report.iterations <= 2);
    assert_eq!(value(&runtime, "out"), "y");
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, PropagationEvent::CycleLimitReached { .. }));
    }
}

#[test]
fn test_malformed_snapshot_entries_are_dropped() {
    let mut runtime = runtime();
    runtime.load_value(&json!({
        "nodes": [
            {"id": "in", "type": "input", "data": {"value": "x"}},
            {"id": "bad", "type": "summarizer", "data": {}},
            {"id": "out", "type": "output"},
            {"id": "out2", "type": "output", "data": {}}
        ],
        "edges": [
            {"source": "in", "target": "bad"},
            {"source": "in", "target": "out2"}
        ]
    }));

    assert_eq!(runtime.graph().nodes().len(), 2);
    assert_eq!(runtime.graph().edges().len(), 1);
    assert_eq!(value(&runtime, "out2"), "x");
}
