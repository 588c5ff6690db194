use pipecore::{
    GraphError, Node, NodeConfig, NodeData, NodeEvaluator, NodeId, NodeKind, NodePorts, PortId,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Metadata about a node kind
#[derive(Debug, Clone, Serialize)]
pub struct NodeMetadata {
    pub kind: NodeKind,
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortId>,
    pub outputs: Vec<PortId>,
    pub default_config: NodeConfig,
}

/// Registry of node kinds and their evaluators
pub struct NodeRegistry {
    evaluators: HashMap<NodeKind, Arc<dyn NodeEvaluator>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            evaluators: HashMap::new(),
        }
    }

    /// Register an evaluator, replacing any previous one for its kind
    pub fn register(&mut self, evaluator: Arc<dyn NodeEvaluator>) {
        let kind = evaluator.kind();
        tracing::info!("Registering node kind: {}", kind);
        self.evaluators.insert(kind, evaluator);
    }

    pub fn evaluator(&self, kind: NodeKind) -> Option<&Arc<dyn NodeEvaluator>> {
        self.evaluators.get(&kind)
    }

    pub fn contains(&self, kind: NodeKind) -> bool {
        self.evaluators.contains_key(&kind)
    }

    /// Ports a node currently exposes. Text nodes derive theirs from the
    /// template and merge nodes from their incoming edges, so this must be
    /// asked again after every edit or connection.
    pub fn ports_for(&self, kind: NodeKind, data: &NodeData, connected: &[Option<&str>]) -> NodePorts {
        self.evaluators
            .get(&kind)
            .map(|e| e.ports(data, connected))
            .unwrap_or_default()
    }

    pub fn default_config(&self, kind: NodeKind) -> Result<NodeConfig, GraphError> {
        self.evaluators
            .get(&kind)
            .map(|e| e.default_config())
            .ok_or_else(|| GraphError::UnknownNodeKind(kind.to_string()))
    }

    /// Create a node of `kind` with its default configuration and empty
    /// runtime state
    pub fn create_node(&self, kind: NodeKind, id: impl Into<NodeId>) -> Result<Node, GraphError> {
        let config = self.default_config(kind)?;
        Ok(Node::new(id, kind, config))
    }

    /// Registered kinds in declaration order
    pub fn list_node_types(&self) -> Vec<NodeKind> {
        NodeKind::ALL
            .into_iter()
            .filter(|kind| self.evaluators.contains_key(kind))
            .collect()
    }

    /// Metadata for a kind, with the ports of a freshly created node
    pub fn get_metadata(&self, kind: NodeKind) -> Option<NodeMetadata> {
        let evaluator = self.evaluators.get(&kind)?;
        let default_config = evaluator.default_config();
        let data = NodeData {
            config: default_config.clone(),
            ..NodeData::default()
        };
        let ports = evaluator.ports(&data, &[]);

        Some(NodeMetadata {
            kind,
            description: evaluator.description().to_string(),
            category: evaluator.category().to_string(),
            inputs: ports.inputs,
            outputs: ports.outputs,
            default_config,
        })
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
