use crate::GraphError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type NodeId = String;
pub type PortId = String;

/// Keys of node data owned by the engine rather than the user.
pub const RUNTIME_KEYS: [&str; 4] = ["value", "variableValues", "inputValues", "conditionResult"];

/// The closed set of node kinds a pipeline may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Input,
    Text,
    Llm,
    Transform,
    Filter,
    Merge,
    Condition,
    DataProcessing,
    Output,
}

impl NodeKind {
    pub const ALL: [NodeKind; 9] = [
        NodeKind::Input,
        NodeKind::Text,
        NodeKind::Llm,
        NodeKind::Transform,
        NodeKind::Filter,
        NodeKind::Merge,
        NodeKind::Condition,
        NodeKind::DataProcessing,
        NodeKind::Output,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Input => "input",
            NodeKind::Text => "text",
            NodeKind::Llm => "llm",
            NodeKind::Transform => "transform",
            NodeKind::Filter => "filter",
            NodeKind::Merge => "merge",
            NodeKind::Condition => "condition",
            NodeKind::DataProcessing => "dataProcessing",
            NodeKind::Output => "output",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| GraphError::UnknownNodeKind(s.to_string()))
    }
}

/// Canvas position. The engine stores it and hands it back untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Stringify a JSON value the way the canvas displays it.
pub fn stringify(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// User-editable, kind-specific configuration (`transformType`, `strategy`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeConfig(Map<String, JsonValue>);

impl NodeConfig {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    /// Non-empty string setting, falling back to `default` when missing,
    /// empty or not a string.
    pub fn get_str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.0.get(key) {
            Some(JsonValue::String(s)) if !s.is_empty() => s,
            _ => default,
        }
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(JsonValue::as_f64)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: JsonValue) {
        self.0.insert(key.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Engine-owned derived data of a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeState {
    /// Current output of the node.
    pub value: String,
    /// Text nodes: variable name to last bound value.
    pub variable_values: BTreeMap<String, String>,
    /// Merge nodes: port id to last received value.
    pub input_values: BTreeMap<PortId, String>,
    /// Condition nodes: result of the last evaluation.
    pub condition_result: Option<bool>,
}

/// Configuration plus runtime state, serialized as one flat object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, JsonValue>", into = "Map<String, JsonValue>")]
pub struct NodeData {
    pub config: NodeConfig,
    pub state: RuntimeState,
}

fn string_map(value: Option<JsonValue>) -> BTreeMap<String, String> {
    match value {
        Some(JsonValue::Object(map)) => map
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k, stringify(&v)))
            .collect(),
        _ => BTreeMap::new(),
    }
}

impl NodeData {
    /// Value emitted by a node of `kind` holding this data.
    ///
    /// A text node that has not rendered yet emits its raw template.
    pub fn output_value(&self, kind: NodeKind) -> &str {
        match kind {
            NodeKind::Text if self.state.value.is_empty() => self.config.get_str_or("text", ""),
            _ => &self.state.value,
        }
    }
}

impl From<Map<String, JsonValue>> for NodeData {
    fn from(mut raw: Map<String, JsonValue>) -> Self {
        let state = RuntimeState {
            value: raw.remove("value").map(|v| stringify(&v)).unwrap_or_default(),
            variable_values: string_map(raw.remove("variableValues")),
            input_values: string_map(raw.remove("inputValues")),
            condition_result: raw.remove("conditionResult").and_then(|v| v.as_bool()),
        };
        Self {
            config: NodeConfig(raw),
            state,
        }
    }
}

impl From<NodeData> for Map<String, JsonValue> {
    fn from(data: NodeData) -> Self {
        let NodeConfig(mut map) = data.config;
        let state = data.state;
        map.insert("value".to_string(), JsonValue::String(state.value));
        if !state.variable_values.is_empty() {
            let vars = state
                .variable_values
                .into_iter()
                .map(|(k, v)| (k, JsonValue::String(v)))
                .collect();
            map.insert("variableValues".to_string(), JsonValue::Object(vars));
        }
        if !state.input_values.is_empty() {
            let inputs = state
                .input_values
                .into_iter()
                .map(|(k, v)| (k, JsonValue::String(v)))
                .collect();
            map.insert("inputValues".to_string(), JsonValue::Object(inputs));
        }
        if let Some(result) = state.condition_result {
            map.insert("conditionResult".to_string(), JsonValue::Bool(result));
        }
        map
    }
}

/// Partial update of a node's runtime state produced by an evaluator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub value: Option<String>,
    pub variable_values: Option<BTreeMap<String, String>>,
    pub input_values: Option<BTreeMap<PortId, String>>,
    pub condition_result: Option<bool>,
}

impl StatePatch {
    pub fn value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn with_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.variable_values = Some(variables);
        self
    }

    pub fn with_inputs(mut self, inputs: BTreeMap<PortId, String>) -> Self {
        self.input_values = Some(inputs);
        self
    }

    pub fn with_condition(mut self, result: bool) -> Self {
        self.condition_result = Some(result);
        self
    }

    pub fn apply(self, state: &mut RuntimeState) {
        if let Some(value) = self.value {
            state.value = value;
        }
        if let Some(variables) = self.variable_values {
            state.variable_values = variables;
        }
        if let Some(inputs) = self.input_values {
            state.input_values = inputs;
        }
        if let Some(result) = self.condition_result {
            state.condition_result = Some(result);
        }
    }
}

/// Input and output ports a node currently exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodePorts {
    pub inputs: Vec<PortId>,
    pub outputs: Vec<PortId>,
}

impl NodePorts {
    pub fn new<I, O>(inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<PortId>,
        O: IntoIterator,
        O::Item: Into<PortId>,
    {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
        }
    }

    /// One `input` port and one `output` port.
    pub fn single() -> Self {
        Self::new(["input"], ["output"])
    }
}

/// Per-kind transformation rules.
///
/// Evaluators are stateless: everything they need is in the target node's
/// data. They never fail; malformed configuration degrades to a safe default.
pub trait NodeEvaluator: Send + Sync {
    fn kind(&self) -> NodeKind;

    /// Compute the state change caused by `incoming` arriving on `target_handle`.
    fn evaluate(&self, data: &NodeData, incoming: &str, target_handle: Option<&str>) -> StatePatch;

    /// Ports the node exposes. `connected` holds the target handles of its
    /// incoming edges, for kinds that grow a port per connection.
    fn ports(&self, _data: &NodeData, _connected: &[Option<&str>]) -> NodePorts {
        NodePorts::single()
    }

    fn default_config(&self) -> NodeConfig {
        NodeConfig::new()
    }

    /// Recompute derived state after a configuration edit, without new input.
    fn refresh(&self, _data: &NodeData) -> Option<StatePatch> {
        None
    }

    /// Drop accumulated per-port values whose port is no longer connected.
    /// `connected` holds the target handles of every remaining incoming edge.
    fn prune(&self, _data: &NodeData, _connected: &[Option<&str>]) -> Option<StatePatch> {
        None
    }

    fn description(&self) -> &str {
        ""
    }

    fn category(&self) -> &str {
        "general"
    }
}

/// A node of the pipeline graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: NodeData,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            kind,
            position: Position::default(),
            data: NodeData {
                config,
                state: RuntimeState::default(),
            },
        }
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    /// The value this node emits on its output ports.
    pub fn output_value(&self) -> &str {
        self.data.output_value(self.kind)
    }

    /// Apply a partial configuration edit.
    ///
    /// Runtime keys are engine-owned and ignored, except `value` on input
    /// nodes, where it is the user-entered data.
    pub fn edit(&mut self, partial: &Map<String, JsonValue>) {
        for (key, value) in partial {
            if key == "value" && self.kind == NodeKind::Input {
                self.data.state.value = stringify(value);
            } else if !RUNTIME_KEYS.contains(&key.as_str()) {
                self.data.config.insert(key.clone(), value.clone());
            }
        }
    }

    /// Clear derived runtime state, keeping input nodes' entered values.
    pub fn reset_runtime(&mut self) {
        let keep = match self.kind {
            NodeKind::Input => std::mem::take(&mut self.data.state.value),
            _ => String::new(),
        };
        self.data.state = RuntimeState {
            value: keep,
            ..RuntimeState::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_data_splits_runtime_keys_from_config() {
        let data: NodeData = serde_json::from_value(json!({
            "strategy": "zip",
            "value": "a | b",
            "inputValues": {"input1": "a", "input2": "b", "input3": null},
        }))
        .unwrap();

        assert_eq!(data.config.get_str_or("strategy", "concat"), "zip");
        assert!(data.config.get("value").is_none());
        assert_eq!(data.state.value, "a | b");
        assert_eq!(data.state.input_values.len(), 2);

        let back = serde_json::to_value(&data).unwrap();
        assert_eq!(back["inputValues"]["input2"], "b");
        assert_eq!(back["strategy"], "zip");
    }

    #[test]
    fn test_numeric_value_is_stringified() {
        let data: NodeData = serde_json::from_value(json!({"value": 42})).unwrap();
        assert_eq!(data.state.value, "42");
    }

    #[test]
    fn test_edit_ignores_engine_owned_keys() {
        let mut node = Node::new("m", NodeKind::Merge, NodeConfig::new());
        let partial = json!({"strategy": "union", "value": "forged", "inputValues": {}});
        node.edit(partial.as_object().unwrap());

        assert_eq!(node.data.config.get_str_or("strategy", ""), "union");
        assert_eq!(node.data.state.value, "");
    }

    #[test]
    fn test_edit_input_value() {
        let mut node = Node::new("in", NodeKind::Input, NodeConfig::new());
        node.edit(json!({"value": "hello"}).as_object().unwrap());
        assert_eq!(node.data.state.value, "hello");
        assert_eq!(node.output_value(), "hello");
    }

    #[test]
    fn test_text_output_falls_back_to_template() {
        let node = Node::new("t", NodeKind::Text, NodeConfig::new().with("text", "Hi {{name}}"));
        assert_eq!(node.output_value(), "Hi {{name}}");
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in NodeKind::ALL {
            assert_eq!(kind.as_str().parse::<NodeKind>().unwrap(), kind);
        }
        assert!("summarizer".parse::<NodeKind>().is_err());
    }
}
