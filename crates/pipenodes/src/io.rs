use pipecore::{NodeData, NodeEvaluator, NodeKind, NodePorts, StatePatch};

/// Source node holding user-entered data
pub struct InputNode;

impl NodeEvaluator for InputNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Input
    }

    // Input nodes have no input ports; anything delivered is ignored.
    fn evaluate(&self, data: &NodeData, _incoming: &str, _target_handle: Option<&str>) -> StatePatch {
        StatePatch::value(data.state.value.clone())
    }

    fn ports(&self, _data: &NodeData, _connected: &[Option<&str>]) -> NodePorts {
        NodePorts::new(Vec::<String>::new(), ["output"])
    }

    fn description(&self) -> &str {
        "Pipeline input"
    }

    fn category(&self) -> &str {
        "io"
    }
}

/// Sink node displaying whatever reaches it
pub struct OutputNode;

impl NodeEvaluator for OutputNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Output
    }

    fn evaluate(&self, _data: &NodeData, incoming: &str, _target_handle: Option<&str>) -> StatePatch {
        StatePatch::value(incoming)
    }

    fn ports(&self, _data: &NodeData, _connected: &[Option<&str>]) -> NodePorts {
        NodePorts::new(["input"], Vec::<String>::new())
    }

    fn description(&self) -> &str {
        "Pipeline output"
    }

    fn category(&self) -> &str {
        "io"
    }
}
