use crate::registry::NodeRegistry;
use crate::scheduler::{PassReport, PropagationScheduler};
use crate::{Intent, IntentOutcome};
use chrono::Utc;
use pipecore::{
    Edge, EdgeId, EventBus, Graph, GraphError, GraphSnapshot, Node, NodeId, NodeKind, NodePorts,
    PipelineError, Position, PropagationEvent,
};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Sweeps a full pass may make before giving up on a fixpoint.
    pub max_passes: usize,
    /// Times one node may be re-expanded within an incremental pass.
    pub max_node_visits: usize,
    pub event_buffer_size: usize,
    /// Run a full pass after every structural mutation.
    pub reconcile_after_mutation: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_passes: 16,
            max_node_visits: 8,
            event_buffer_size: 1000,
            reconcile_after_mutation: true,
        }
    }
}

/// Identity of a request sent to the remote execution service
#[derive(Debug, Clone)]
pub struct RemoteTicket {
    pub request_id: Uuid,
    pub snapshot: GraphSnapshot,
}

/// Owns a pipeline graph and keeps its runtime state consistent across
/// every mutation
pub struct PipelineRuntime {
    registry: Arc<NodeRegistry>,
    config: RuntimeConfig,
    event_bus: Arc<EventBus>,
    graph: Graph,
    latest_request: Option<Uuid>,
}

impl PipelineRuntime {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self::with_config(registry, RuntimeConfig::default())
    }

    pub fn with_config(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self {
            registry,
            config,
            event_bus,
            graph: Graph::new(),
            latest_request: None,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.graph.node(id)
    }

    /// Ports the node exposes given its current data and incoming edges.
    pub fn ports(&self, id: &str) -> Option<NodePorts> {
        let node = self.graph.node(id)?;
        let connected: Vec<Option<&str>> = self
            .graph
            .edges_into(id)
            .map(|edge| edge.target_handle.as_deref())
            .collect();
        Some(self.registry.ports_for(node.kind, &node.data, &connected))
    }

    /// Replace the graph with a snapshot.
    ///
    /// Derived state in the document is not trusted: every node is reset
    /// (input nodes keep their value) and recomputed by a full pass.
    pub fn load(&mut self, snapshot: GraphSnapshot) -> PassReport {
        self.install(Graph::from_snapshot(snapshot))
    }

    /// Load a snapshot document, discarding malformed entries
    pub fn load_json(&mut self, json: &str) -> Result<PassReport, PipelineError> {
        let graph = Graph::from_json_str(json)?;
        Ok(self.install(graph))
    }

    pub fn load_value(&mut self, document: &JsonValue) -> PassReport {
        self.install(Graph::from_json_value(document))
    }

    fn install(&mut self, mut graph: Graph) -> PassReport {
        for node in graph.nodes_mut() {
            node.reset_runtime();
        }
        tracing::info!(
            "Loaded graph with {} nodes and {} edges",
            graph.nodes().len(),
            graph.edges().len()
        );
        self.graph = graph;
        self.propagate_all()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.graph.to_snapshot()
    }

    /// Recompute every node
    pub fn propagate_all(&mut self) -> PassReport {
        let scheduler = PropagationScheduler::new(&self.registry, &self.config, &self.event_bus);
        scheduler.propagate_all(&mut self.graph)
    }

    fn reconcile(&mut self) {
        if self.config.reconcile_after_mutation {
            self.propagate_all();
        }
    }

    pub fn add_node(&mut self, kind: NodeKind, position: Option<Position>) -> Result<NodeId, GraphError> {
        let id = format!("{}-{}", kind, Uuid::new_v4().simple());
        let mut node = self.registry.create_node(kind, id)?;
        if let Some(position) = position {
            node.position = position;
        }
        let id = self.graph.add_node(node)?;
        tracing::info!("Added {} node {}", kind, id);
        self.reconcile();
        Ok(id)
    }

    /// Delete a node and every edge touching it
    pub fn delete_node(&mut self, id: &str) -> Result<Node, GraphError> {
        let (node, removed) = self.graph.remove_node(id)?;
        tracing::info!("Deleted node {} and {} edge(s)", id, removed.len());

        let mut targets: Vec<NodeId> = Vec::new();
        for edge in removed {
            if edge.target != id && !targets.contains(&edge.target) {
                targets.push(edge.target);
            }
        }
        let scheduler = PropagationScheduler::new(&self.registry, &self.config, &self.event_bus);
        scheduler.prune_and_propagate(&mut self.graph, &targets);

        self.reconcile();
        Ok(node)
    }

    /// Connect two ports. Connecting an existing connection again returns
    /// the existing edge id and changes nothing.
    pub fn connect_edge(
        &mut self,
        source: &str,
        source_handle: Option<&str>,
        target: &str,
        target_handle: Option<&str>,
    ) -> Result<EdgeId, GraphError> {
        for endpoint in [source, target] {
            if !self.graph.contains_node(endpoint) {
                return Err(GraphError::NodeNotFound(endpoint.to_string()));
            }
        }

        let mut edge = Edge::new(source, source_handle, target, target_handle);
        if let Some(existing) = self.graph.find_connection(&edge) {
            return Ok(existing.id.clone());
        }
        if self.graph.edge(&edge.id).is_some() {
            let unique = format!("{}-{}", edge.id, Uuid::new_v4().simple());
            edge = edge.with_id(unique);
        }

        let id = self.graph.add_edge(edge)?;
        tracing::info!("Connected {} -> {} as {}", source, target, id);

        let scheduler = PropagationScheduler::new(&self.registry, &self.config, &self.event_bus);
        scheduler.propagate_edge(&mut self.graph, &id);

        self.reconcile();
        Ok(id)
    }

    pub fn delete_edge(&mut self, id: &str) -> Result<Edge, GraphError> {
        let edge = self.graph.remove_edge(id)?;
        tracing::info!("Deleted edge {}", id);

        let scheduler = PropagationScheduler::new(&self.registry, &self.config, &self.event_bus);
        scheduler.prune_and_propagate(&mut self.graph, std::slice::from_ref(&edge.target));

        self.reconcile();
        Ok(edge)
    }

    /// Apply a partial configuration edit and propagate its effect
    pub fn edit_node_field(
        &mut self,
        id: &str,
        partial: &Map<String, JsonValue>,
    ) -> Result<PassReport, GraphError> {
        let node = self
            .graph
            .node_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        node.edit(partial);
        tracing::debug!("Edited node {}: {:?}", id, partial.keys().collect::<Vec<_>>());

        let scheduler = PropagationScheduler::new(&self.registry, &self.config, &self.event_bus);
        Ok(scheduler.propagate_edit(&mut self.graph, id))
    }

    pub fn dispatch(&mut self, intent: Intent) -> Result<IntentOutcome, GraphError> {
        match intent {
            Intent::AddNode { kind, position } => {
                self.add_node(kind, position).map(IntentOutcome::NodeAdded)
            }
            Intent::DeleteNode { id } => {
                self.delete_node(&id)?;
                Ok(IntentOutcome::NodeDeleted(id))
            }
            Intent::ConnectEdge {
                source,
                source_handle,
                target,
                target_handle,
            } => self
                .connect_edge(
                    &source,
                    source_handle.as_deref(),
                    &target,
                    target_handle.as_deref(),
                )
                .map(IntentOutcome::EdgeConnected),
            Intent::DeleteEdge { id } => {
                self.delete_edge(&id)?;
                Ok(IntentOutcome::EdgeDeleted(id))
            }
            Intent::EditField { id, partial } => {
                self.edit_node_field(&id, &partial)?;
                Ok(IntentOutcome::FieldEdited(id))
            }
        }
    }

    /// Subscribe to propagation events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<PropagationEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Start a remote execution request. Results of any earlier request
    /// will be discarded on arrival.
    pub fn begin_remote_execution(&mut self) -> RemoteTicket {
        let request_id = Uuid::new_v4();
        self.latest_request = Some(request_id);
        tracing::debug!("Remote execution request {}", request_id);
        RemoteTicket {
            request_id,
            snapshot: self.snapshot(),
        }
    }

    /// Merge remote outputs onto output nodes' display values.
    ///
    /// Returns the number of nodes updated, or `None` when the ticket was
    /// superseded and the outputs were discarded.
    pub fn apply_remote_outputs(
        &mut self,
        ticket: &RemoteTicket,
        outputs: &HashMap<NodeId, String>,
    ) -> Option<usize> {
        if self.latest_request != Some(ticket.request_id) {
            tracing::warn!("Discarding outputs of superseded request {}", ticket.request_id);
            self.event_bus.emit(PropagationEvent::RemoteOutputsDiscarded {
                request_id: ticket.request_id,
                timestamp: Utc::now(),
            });
            return None;
        }

        let mut updated = 0;
        for (id, value) in outputs {
            match self.graph.node_mut(id) {
                Some(node) if node.kind == NodeKind::Output => {
                    if node.data.state.value != *value {
                        node.data.state.value = value.clone();
                        updated += 1;
                    }
                }
                _ => tracing::debug!("Ignoring remote output for {}", id),
            }
        }

        tracing::info!("Applied remote outputs to {} node(s)", updated);
        self.event_bus.emit(PropagationEvent::RemoteOutputsApplied {
            request_id: ticket.request_id,
            updated_nodes: updated,
            timestamp: Utc::now(),
        });
        Some(updated)
    }
}
