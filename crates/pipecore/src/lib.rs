//! Core abstractions for the pipeline engine
//!
//! This crate provides the graph data model, the evaluator trait every node
//! kind implements, and the event types emitted during propagation. It has
//! no knowledge of individual node kinds.

mod error;
pub mod events;
mod graph;
mod node;

pub use error::{GraphError, PipelineError};
pub use events::*;
pub use graph::{Edge, EdgeId, Graph, GraphSnapshot};
pub use node::{
    stringify, Node, NodeConfig, NodeData, NodeEvaluator, NodeId, NodeKind, NodePorts, PortId,
    Position, RuntimeState, StatePatch, RUNTIME_KEYS,
};

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
