use pipecore::{EdgeId, NodeId, NodeKind, PortId, Position};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// A typed request from the canvas to change the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "camelCase")]
pub enum Intent {
    AddNode {
        kind: NodeKind,
        #[serde(default)]
        position: Option<Position>,
    },
    DeleteNode {
        id: NodeId,
    },
    #[serde(rename_all = "camelCase")]
    ConnectEdge {
        source: NodeId,
        #[serde(default)]
        source_handle: Option<PortId>,
        target: NodeId,
        #[serde(default)]
        target_handle: Option<PortId>,
    },
    DeleteEdge {
        id: EdgeId,
    },
    EditField {
        id: NodeId,
        partial: Map<String, JsonValue>,
    },
}

/// What a dispatched intent did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentOutcome {
    NodeAdded(NodeId),
    NodeDeleted(NodeId),
    EdgeConnected(EdgeId),
    EdgeDeleted(EdgeId),
    FieldEdited(NodeId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intent_wire_format() {
        let intent: Intent = serde_json::from_value(json!({
            "intent": "connectEdge",
            "source": "a",
            "sourceHandle": "true",
            "target": "b"
        }))
        .unwrap();

        assert_eq!(
            intent,
            Intent::ConnectEdge {
                source: "a".to_string(),
                source_handle: Some("true".to_string()),
                target: "b".to_string(),
                target_handle: None,
            }
        );

        let intent: Intent =
            serde_json::from_value(json!({"intent": "addNode", "kind": "dataProcessing"})).unwrap();
        assert_eq!(
            intent,
            Intent::AddNode {
                kind: NodeKind::DataProcessing,
                position: None
            }
        );
    }
}
