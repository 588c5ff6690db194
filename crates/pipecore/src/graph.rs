use crate::node::stringify;
use crate::{GraphError, Node, NodeData, NodeId, NodeKind, PipelineError, PortId, Position};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

pub type EdgeId = String;

/// Directed connection from one node's output port to another's input port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    #[serde(default)]
    pub source_handle: Option<PortId>,
    pub target: NodeId,
    #[serde(default)]
    pub target_handle: Option<PortId>,
}

impl Edge {
    /// Create an edge whose id is derived from its endpoints.
    pub fn new(
        source: impl Into<NodeId>,
        source_handle: Option<&str>,
        target: impl Into<NodeId>,
        target_handle: Option<&str>,
    ) -> Self {
        let source = source.into();
        let target = target.into();
        let id = Self::derive_id(&source, source_handle, &target, target_handle);
        Self {
            id,
            source,
            source_handle: source_handle.map(str::to_string),
            target,
            target_handle: target_handle.map(str::to_string),
        }
    }

    pub fn with_id(mut self, id: impl Into<EdgeId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn derive_id(
        source: &str,
        source_handle: Option<&str>,
        target: &str,
        target_handle: Option<&str>,
    ) -> EdgeId {
        format!(
            "edge-{}{}-{}{}",
            source,
            source_handle.unwrap_or(""),
            target,
            target_handle.unwrap_or("")
        )
    }

    /// Whether both edges join the same ports.
    pub fn same_connection(&self, other: &Edge) -> bool {
        self.source == other.source
            && self.source_handle == other.source_handle
            && self.target == other.target
            && self.target_handle == other.target_handle
    }
}

/// Persisted/exchanged document form of a graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Owned graph aggregate: nodes and edges in insertion order, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    node_index: HashMap<NodeId, usize>,
    edge_index: HashMap<EdgeId, usize>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.node_index.get(id).map(|&idx| &self.nodes[idx])
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        match self.node_index.get(id) {
            Some(&idx) => Some(&mut self.nodes[idx]),
            None => None,
        }
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut()
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edge_index.get(id).map(|&idx| &self.edges[idx])
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node_index.contains_key(id)
    }

    pub fn edges_from<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }

    pub fn edges_into<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == id)
    }

    pub fn find_connection(&self, candidate: &Edge) -> Option<&Edge> {
        self.edges.iter().find(|e| e.same_connection(candidate))
    }

    pub fn add_node(&mut self, node: Node) -> Result<NodeId, GraphError> {
        if self.node_index.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        let id = node.id.clone();
        self.node_index.insert(id.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(id)
    }

    /// Remove a node together with every edge touching it.
    pub fn remove_node(&mut self, id: &str) -> Result<(Node, Vec<Edge>), GraphError> {
        let idx = self
            .node_index
            .get(id)
            .copied()
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        let node = self.nodes.remove(idx);
        let (removed, kept): (Vec<Edge>, Vec<Edge>) = std::mem::take(&mut self.edges)
            .into_iter()
            .partition(|e| e.source == id || e.target == id);
        self.edges = kept;
        self.reindex();
        Ok((node, removed))
    }

    pub fn add_edge(&mut self, edge: Edge) -> Result<EdgeId, GraphError> {
        for endpoint in [&edge.source, &edge.target] {
            if !self.node_index.contains_key(endpoint) {
                return Err(GraphError::InvalidConnection(format!(
                    "edge {} references unknown node {}",
                    edge.id, endpoint
                )));
            }
        }
        if self.edge_index.contains_key(&edge.id) {
            return Err(GraphError::DuplicateEdge(edge.id));
        }
        let id = edge.id.clone();
        self.edge_index.insert(id.clone(), self.edges.len());
        self.edges.push(edge);
        Ok(id)
    }

    pub fn remove_edge(&mut self, id: &str) -> Result<Edge, GraphError> {
        let idx = self
            .edge_index
            .get(id)
            .copied()
            .ok_or_else(|| GraphError::EdgeNotFound(id.to_string()))?;
        let edge = self.edges.remove(idx);
        self.reindex();
        Ok(edge)
    }

    fn reindex(&mut self) {
        self.node_index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(idx, n)| (n.id.clone(), idx))
            .collect();
        self.edge_index = self
            .edges
            .iter()
            .enumerate()
            .map(|(idx, e)| (e.id.clone(), idx))
            .collect();
    }

    pub fn to_snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    /// Build a graph from a well-formed snapshot, skipping entries that
    /// violate graph invariants.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut graph = Graph::new();
        for node in snapshot.nodes {
            if let Err(e) = graph.add_node(node) {
                tracing::warn!("Skipping node: {}", e);
            }
        }
        for edge in snapshot.edges {
            if let Err(e) = graph.add_edge(edge) {
                tracing::warn!("Skipping edge: {}", e);
            }
        }
        graph
    }

    /// Parse a snapshot document, discarding malformed entries.
    ///
    /// Only a document that is not JSON at all is an error; a document of the
    /// wrong shape yields an empty graph.
    pub fn from_json_str(json: &str) -> Result<Self, PipelineError> {
        let value: JsonValue = serde_json::from_str(json)?;
        Ok(Self::from_json_value(&value))
    }

    pub fn from_json_value(document: &JsonValue) -> Self {
        let mut graph = Graph::new();

        let raw_nodes = document.get("nodes").and_then(JsonValue::as_array);
        for raw in raw_nodes.into_iter().flatten() {
            match parse_node(raw) {
                Some(node) => {
                    if let Err(e) = graph.add_node(node) {
                        tracing::warn!("Discarding node: {}", e);
                    }
                }
                None => tracing::warn!("Discarding malformed node entry"),
            }
        }

        let raw_edges = document.get("edges").and_then(JsonValue::as_array);
        for raw in raw_edges.into_iter().flatten() {
            let Some(edge) = parse_edge(raw) else {
                tracing::warn!("Discarding malformed edge entry");
                continue;
            };
            if graph.find_connection(&edge).is_some() {
                tracing::warn!("Discarding duplicate connection {}", edge.id);
                continue;
            }
            if let Err(e) = graph.add_edge(edge) {
                tracing::warn!("Discarding edge: {}", e);
            }
        }

        graph
    }
}

fn non_empty_string(value: Option<&JsonValue>) -> Option<String> {
    match value {
        Some(v @ (JsonValue::String(_) | JsonValue::Number(_))) => {
            Some(stringify(v)).filter(|s| !s.is_empty())
        }
        _ => None,
    }
}

fn parse_node(raw: &JsonValue) -> Option<Node> {
    let id = non_empty_string(raw.get("id"))?;
    let kind: NodeKind = raw.get("type")?.as_str()?.parse().ok()?;
    let data: NodeData = match raw.get("data")? {
        JsonValue::Object(map) => NodeData::from(map.clone()),
        _ => return None,
    };
    let position = raw
        .get("position")
        .and_then(|p| serde_json::from_value::<Position>(p.clone()).ok())
        .unwrap_or_default();

    Some(Node {
        id,
        kind,
        position,
        data,
    })
}

fn parse_edge(raw: &JsonValue) -> Option<Edge> {
    let source = non_empty_string(raw.get("source"))?;
    let target = non_empty_string(raw.get("target"))?;
    let source_handle = raw.get("sourceHandle").and_then(JsonValue::as_str);
    let target_handle = raw.get("targetHandle").and_then(JsonValue::as_str);

    let edge = Edge::new(source, source_handle, target, target_handle);
    Some(match non_empty_string(raw.get("id")) {
        Some(id) => edge.with_id(id),
        None => edge,
    })
}
