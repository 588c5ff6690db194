use crate::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type PassId = Uuid;

/// What started a propagation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum PassScope {
    /// Recompute every edge of the graph.
    Full,
    /// Re-propagate downstream of one changed node.
    Incremental { origin: NodeId },
}

/// Events emitted while the engine propagates values
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PropagationEvent {
    PassStarted {
        pass_id: PassId,
        scope: PassScope,
        timestamp: DateTime<Utc>,
    },
    NodeUpdated {
        pass_id: PassId,
        node_id: NodeId,
        value: String,
        timestamp: DateTime<Utc>,
    },
    PassCompleted {
        pass_id: PassId,
        updated_nodes: usize,
        iterations: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    CycleLimitReached {
        pass_id: PassId,
        node_id: Option<NodeId>,
        limit: usize,
        timestamp: DateTime<Utc>,
    },
    RemoteOutputsApplied {
        request_id: Uuid,
        updated_nodes: usize,
        timestamp: DateTime<Utc>,
    },
    RemoteOutputsDiscarded {
        request_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for propagation events.
///
/// Sending never blocks; events are dropped when nobody is subscribed.
pub struct EventBus {
    sender: broadcast::Sender<PropagationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PropagationEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: PropagationEvent) {
        let _ = self.sender.send(event);
    }

    pub fn pass_emitter(&self, pass_id: PassId) -> EventEmitter {
        EventEmitter::new(pass_id, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Emitter bound to a single propagation pass
#[derive(Clone)]
pub struct EventEmitter {
    pass_id: PassId,
    sender: broadcast::Sender<PropagationEvent>,
}

impl EventEmitter {
    pub fn new(pass_id: PassId, sender: broadcast::Sender<PropagationEvent>) -> Self {
        Self { pass_id, sender }
    }

    pub fn pass_id(&self) -> PassId {
        self.pass_id
    }

    pub fn started(&self, scope: PassScope) {
        let _ = self.sender.send(PropagationEvent::PassStarted {
            pass_id: self.pass_id,
            scope,
            timestamp: Utc::now(),
        });
    }

    pub fn node_updated(&self, node_id: impl Into<NodeId>, value: impl Into<String>) {
        let _ = self.sender.send(PropagationEvent::NodeUpdated {
            pass_id: self.pass_id,
            node_id: node_id.into(),
            value: value.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn completed(&self, updated_nodes: usize, iterations: usize, duration_ms: u64) {
        let _ = self.sender.send(PropagationEvent::PassCompleted {
            pass_id: self.pass_id,
            updated_nodes,
            iterations,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    pub fn cycle_limit(&self, node_id: Option<NodeId>, limit: usize) {
        let _ = self.sender.send(PropagationEvent::CycleLimitReached {
            pass_id: self.pass_id,
            node_id,
            limit,
            timestamp: Utc::now(),
        });
    }
}
