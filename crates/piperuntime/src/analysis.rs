use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use pipecore::{stringify, Graph};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Structural summary reported by the validation endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub num_nodes: usize,
    pub num_edges: usize,
    pub is_dag: bool,
}

impl GraphSummary {
    /// Summary returned for a body that is not a pipeline document.
    pub fn invalid() -> Self {
        Self {
            num_nodes: 0,
            num_edges: 0,
            is_dag: false,
        }
    }

    pub fn from_graph(graph: &Graph) -> Self {
        let mut builder = DagBuilder::default();
        for node in graph.nodes() {
            builder.node(&node.id);
        }
        for edge in graph.edges() {
            builder.edge(&edge.source, &edge.target);
        }

        Self {
            num_nodes: graph.nodes().len(),
            num_edges: graph.edges().len(),
            is_dag: builder.is_dag(),
        }
    }

    /// Summarise an unvalidated request body.
    ///
    /// Counts are of raw entries, malformed ones included. Edge endpoints
    /// take part in cycle detection even when no node declares them.
    pub fn from_raw_json(body: &JsonValue) -> Self {
        if !body.is_object() {
            return Self::invalid();
        }
        let (nodes, edges) = (entries(body, "nodes"), entries(body, "edges"));

        let mut builder = DagBuilder::default();
        for id in nodes.iter().filter_map(|n| raw_id(n.get("id"))) {
            builder.node(&id);
        }
        for edge in edges {
            let source = raw_id(edge.get("source"));
            let target = raw_id(edge.get("target"));
            match (source, target) {
                (Some(source), Some(target)) => builder.edge(&source, &target),
                (Some(id), None) | (None, Some(id)) => {
                    builder.node(&id);
                }
                (None, None) => {}
            }
        }

        Self {
            num_nodes: nodes.len(),
            num_edges: edges.len(),
            is_dag: builder.is_dag(),
        }
    }
}

fn entries<'a>(body: &'a JsonValue, key: &str) -> &'a [JsonValue] {
    body.get(key)
        .and_then(JsonValue::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn raw_id(value: Option<&JsonValue>) -> Option<String> {
    match value {
        None | Some(JsonValue::Null) => None,
        Some(v) => Some(stringify(v)).filter(|id| !id.is_empty()),
    }
}

#[derive(Default)]
struct DagBuilder {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl DagBuilder {
    fn node(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(id.to_string());
        self.index.insert(id.to_string(), idx);
        idx
    }

    fn edge(&mut self, source: &str, target: &str) {
        let (from, to) = (self.node(source), self.node(target));
        self.graph.add_edge(from, to, ());
    }

    fn is_dag(&self) -> bool {
        !is_cyclic_directed(&self.graph)
    }
}
