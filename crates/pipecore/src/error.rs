use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Structural errors raised by the graph mutation surface.
///
/// Evaluators never produce these; they are only returned when a mutation
/// names something that does not exist or would break a graph invariant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Edge not found: {0}")]
    EdgeNotFound(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Duplicate edge id: {0}")]
    DuplicateEdge(String),

    #[error("Unknown node kind: {0}")]
    UnknownNodeKind(String),

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),
}
