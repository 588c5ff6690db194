use crate::registry::NodeRegistry;
use crate::RuntimeConfig;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use pipecore::{
    Edge, EventBus, EventEmitter, Graph, NodeData, NodeId, NodeKind, PassId, PassScope, RuntimeState,
    StatePatch,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;
use uuid::Uuid;

/// Outcome of one propagation pass
#[derive(Debug, Clone)]
pub struct PassReport {
    pub pass_id: PassId,
    /// Nodes whose runtime state changed, in graph order.
    pub updated: Vec<NodeId>,
    /// Full passes: sweeps over the edge list. Incremental passes: nodes expanded.
    pub iterations: usize,
    pub limit_reached: bool,
}

/// Pending runtime state of one pass.
///
/// Evaluators read the staged data of their target and sources, so every
/// delivery within a pass sees the effect of the earlier ones. Nothing
/// reaches the graph until the pass commits.
struct Staging<'g> {
    graph: &'g Graph,
    registry: &'g NodeRegistry,
    pending: HashMap<NodeId, NodeData>,
}

impl<'g> Staging<'g> {
    fn new(graph: &'g Graph, registry: &'g NodeRegistry) -> Self {
        Self {
            graph,
            registry,
            pending: HashMap::new(),
        }
    }

    fn data(&self, id: &str) -> Option<&NodeData> {
        self.pending
            .get(id)
            .or_else(|| self.graph.node(id).map(|n| &n.data))
    }

    fn output_value(&self, id: &str) -> String {
        match (self.graph.node(id), self.data(id)) {
            (Some(node), Some(data)) => data.output_value(node.kind).to_string(),
            _ => String::new(),
        }
    }

    /// Value travelling along `edge`. Edges leaving a condition node only
    /// carry the value on the port matching the condition result.
    fn routed_value(&self, edge: &Edge) -> String {
        let value = self.output_value(&edge.source);
        let is_gate = self
            .graph
            .node(&edge.source)
            .map_or(false, |n| n.kind == NodeKind::Condition);
        if !is_gate {
            return value;
        }

        let result = self.data(&edge.source).and_then(|d| d.state.condition_result);
        match (edge.source_handle.as_deref(), result) {
            (Some("true"), Some(true)) | (Some("false"), Some(false)) => value,
            _ => String::new(),
        }
    }

    /// Staged runtime state of every node, in graph order.
    fn states(&self) -> Vec<RuntimeState> {
        self.graph
            .nodes()
            .iter()
            .filter_map(|node| self.data(&node.id))
            .map(|data| data.state.clone())
            .collect()
    }

    /// Stage a patch; returns whether the node's state changed.
    fn stage(&mut self, id: &str, patch: StatePatch) -> bool {
        let Some(current) = self.data(id) else {
            return false;
        };
        let mut next = current.clone();
        patch.apply(&mut next.state);
        if next.state == current.state {
            return false;
        }
        self.pending.insert(id.to_string(), next);
        true
    }

    fn deliver(&mut self, edge: &Edge) -> bool {
        let (graph, registry) = (self.graph, self.registry);
        let Some(target) = graph.node(&edge.target) else {
            return false;
        };
        let Some(evaluator) = registry.evaluator(target.kind) else {
            tracing::warn!("No evaluator registered for kind {}", target.kind);
            return false;
        };

        let incoming = self.routed_value(edge);
        let Some(data) = self.data(&edge.target) else {
            return false;
        };
        let patch = evaluator.evaluate(data, &incoming, edge.target_handle.as_deref());
        tracing::debug!(
            "Delivered {} -> {} on {:?}",
            edge.source,
            edge.target,
            edge.target_handle
        );
        self.stage(&edge.target, patch)
    }

    /// Drop accumulated values on ports of `id` that lost their edge.
    fn prune(&mut self, id: &str) -> bool {
        let (graph, registry) = (self.graph, self.registry);
        let Some(node) = graph.node(id) else {
            return false;
        };
        let Some(evaluator) = registry.evaluator(node.kind) else {
            return false;
        };
        let connected: Vec<Option<&str>> = graph
            .edges_into(id)
            .map(|e| e.target_handle.as_deref())
            .collect();

        let patch = match self.data(id) {
            Some(data) => evaluator.prune(data, &connected),
            None => None,
        };
        match patch {
            Some(patch) => self.stage(id, patch),
            None => false,
        }
    }

    /// Recompute derived state of `id` from its own configuration.
    fn refresh(&mut self, id: &str) -> bool {
        let (graph, registry) = (self.graph, self.registry);
        let patch = graph
            .node(id)
            .and_then(|node| registry.evaluator(node.kind))
            .zip(self.data(id))
            .and_then(|(evaluator, data)| evaluator.refresh(data));
        match patch {
            Some(patch) => self.stage(id, patch),
            None => false,
        }
    }
}

/// Rank of every condition node in the subgraph of condition-to-condition
/// edges. Empty when that subgraph is cyclic.
fn gate_ranks(graph: &Graph) -> HashMap<&str, usize> {
    let mut dag = DiGraph::<&str, ()>::new();
    let mut index = HashMap::new();
    for node in graph.nodes().iter().filter(|n| n.kind == NodeKind::Condition) {
        index.insert(node.id.as_str(), dag.add_node(node.id.as_str()));
    }
    for edge in graph.edges() {
        if let (Some(&from), Some(&to)) = (
            index.get(edge.source.as_str()),
            index.get(edge.target.as_str()),
        ) {
            dag.add_edge(from, to, ());
        }
    }

    match toposort(&dag, None) {
        Ok(order) => order
            .into_iter()
            .enumerate()
            .map(|(rank, idx)| (dag[idx], rank))
            .collect(),
        Err(cycle) => {
            tracing::warn!(
                "Condition nodes form a cycle through {}; routing in edge order",
                dag[cycle.node_id()]
            );
            HashMap::new()
        }
    }
}

/// Edges in full-pass order: everything not leaving a condition node in
/// edge order, then edges leaving conditions by rank of their source.
fn full_pass_order(graph: &Graph) -> Vec<&Edge> {
    let is_gate = |id: &str| graph.node(id).map_or(false, |n| n.kind == NodeKind::Condition);
    let (mut gated, ungated): (Vec<&Edge>, Vec<&Edge>) =
        graph.edges().iter().partition(|e| is_gate(&e.source));

    let ranks = gate_ranks(graph);
    gated.sort_by_key(|e| ranks.get(e.source.as_str()).copied().unwrap_or(0));

    ungated.into_iter().chain(gated).collect()
}

/// Drives propagation passes over a graph
pub struct PropagationScheduler<'a> {
    registry: &'a NodeRegistry,
    config: &'a RuntimeConfig,
    events: &'a EventBus,
}

impl<'a> PropagationScheduler<'a> {
    pub fn new(registry: &'a NodeRegistry, config: &'a RuntimeConfig, events: &'a EventBus) -> Self {
        Self {
            registry,
            config,
            events,
        }
    }

    /// Recompute every node from every edge until nothing changes.
    pub fn propagate_all(&self, graph: &mut Graph) -> PassReport {
        let started = Instant::now();
        let emitter = self.events.pass_emitter(Uuid::new_v4());
        emitter.started(PassScope::Full);

        let (pending, iterations, limit_reached) = {
            let mut staging = Staging::new(graph, self.registry);
            for node in graph.nodes() {
                staging.prune(&node.id);
            }

            // A sweep settles the pass when it ends where the previous one
            // ended. Several edges into one port overwrite each other inside
            // a sweep, so individual deliveries keep changing the target.
            let order = full_pass_order(graph);
            let mut previous = staging.states();
            let mut iterations = 0;
            let mut settled = false;
            while iterations < self.config.max_passes {
                iterations += 1;
                let mut changed = false;
                for edge in &order {
                    changed |= staging.deliver(edge);
                }
                if !changed {
                    settled = true;
                    break;
                }
                let current = staging.states();
                if current == previous {
                    settled = true;
                    break;
                }
                previous = current;
            }
            (staging.pending, iterations, !settled)
        };

        if limit_reached {
            tracing::warn!(
                "Full pass did not settle within {} sweeps; graph likely has a cycle",
                self.config.max_passes
            );
            emitter.cycle_limit(None, self.config.max_passes);
        }

        self.finish(graph, pending, &emitter, started, iterations, limit_reached)
    }

    /// Re-propagate downstream of `origin`, whose state changed.
    pub fn propagate_from(&self, graph: &mut Graph, origin: &str) -> PassReport {
        self.incremental(graph, origin, |_| vec![origin.to_string()])
    }

    /// Propagate after a configuration edit of `id`: recompute it from its
    /// own configuration and its incoming edges, then cascade downstream.
    pub fn propagate_edit(&self, graph: &mut Graph, id: &str) -> PassReport {
        self.incremental(graph, id, |staging| {
            staging.refresh(id);
            let graph = staging.graph;
            for edge in graph.edges_into(id) {
                staging.deliver(edge);
            }
            vec![id.to_string()]
        })
    }

    /// Propagate along a freshly connected edge when its source already
    /// carries data.
    pub fn propagate_edge(&self, graph: &mut Graph, edge_id: &str) -> PassReport {
        let origin = graph
            .edge(edge_id)
            .map(|e| e.source.clone())
            .unwrap_or_default();

        self.incremental(graph, &origin, |staging| {
            let graph = staging.graph;
            let Some(edge) = graph.edge(edge_id) else {
                return Vec::new();
            };
            if staging.output_value(&edge.source).is_empty() {
                return Vec::new();
            }
            if staging.deliver(edge) {
                vec![edge.target.clone()]
            } else {
                Vec::new()
            }
        })
    }

    /// Prune nodes that lost incoming edges and cascade from the ones whose
    /// state changed.
    pub fn prune_and_propagate(&self, graph: &mut Graph, targets: &[NodeId]) -> PassReport {
        let origin = targets.first().cloned().unwrap_or_default();
        self.incremental(graph, &origin, |staging| {
            targets
                .iter()
                .filter(|id| staging.prune(id))
                .cloned()
                .collect()
        })
    }

    fn incremental<F>(&self, graph: &mut Graph, origin: &str, seed: F) -> PassReport
    where
        F: FnOnce(&mut Staging<'_>) -> Vec<NodeId>,
    {
        let started = Instant::now();
        let emitter = self.events.pass_emitter(Uuid::new_v4());
        emitter.started(PassScope::Incremental {
            origin: origin.to_string(),
        });

        let (pending, iterations, limit_reached) = {
            let mut staging = Staging::new(graph, self.registry);
            let seeds = seed(&mut staging);
            let (iterations, limit_reached) = self.cascade(&mut staging, seeds, &emitter);
            (staging.pending, iterations, limit_reached)
        };

        self.finish(graph, pending, &emitter, started, iterations, limit_reached)
    }

    /// Worklist propagation. A node is re-expanded only when a delivery
    /// changed it, at most `max_node_visits` times per pass.
    fn cascade(
        &self,
        staging: &mut Staging<'_>,
        seeds: Vec<NodeId>,
        emitter: &EventEmitter,
    ) -> (usize, bool) {
        let graph = staging.graph;
        let limit = self.config.max_node_visits;
        let mut queue: VecDeque<NodeId> = seeds.into_iter().collect();
        let mut visits: HashMap<NodeId, usize> = HashMap::new();
        let mut capped: HashSet<NodeId> = HashSet::new();
        let mut expanded = 0;

        while let Some(id) = queue.pop_front() {
            let count = visits.entry(id.clone()).or_insert(0);
            if *count >= limit {
                if capped.insert(id.clone()) {
                    tracing::warn!("Node {} re-triggered {} times; stopping there", id, limit);
                    emitter.cycle_limit(Some(id), limit);
                }
                continue;
            }
            *count += 1;
            expanded += 1;

            for edge in graph.edges_from(&id) {
                if staging.deliver(edge) && !queue.contains(&edge.target) {
                    queue.push_back(edge.target.clone());
                }
            }
        }

        (expanded, !capped.is_empty())
    }

    fn finish(
        &self,
        graph: &mut Graph,
        mut pending: HashMap<NodeId, NodeData>,
        emitter: &EventEmitter,
        started: Instant,
        iterations: usize,
        limit_reached: bool,
    ) -> PassReport {
        let mut updated = Vec::new();
        for node in graph.nodes_mut() {
            let Some(data) = pending.remove(&node.id) else {
                continue;
            };
            if data.state == node.data.state {
                continue;
            }
            node.data.state = data.state;
            emitter.node_updated(node.id.clone(), node.data.state.value.clone());
            updated.push(node.id.clone());
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        emitter.completed(updated.len(), iterations, duration_ms);
        tracing::info!(
            "Propagation pass {} updated {} node(s) in {}ms",
            emitter.pass_id(),
            updated.len(),
            duration_ms
        );

        PassReport {
            pass_id: emitter.pass_id(),
            updated,
            iterations,
            limit_reached,
        }
    }
}
