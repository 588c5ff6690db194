//! Built-in node kinds
//!
//! One evaluator per node kind, plus the client for the remote execution
//! and validation service.

mod condition;
mod filter;
mod io;
mod llm;
mod merge;
pub mod remote;
mod text;
mod transform;

pub use condition::{evaluate_expression, ConditionNode};
pub use filter::FilterNode;
pub use io::{InputNode, OutputNode};
pub use llm::{simulate, LlmNode, GOOGLE_RESPONSE, GREETING_RESPONSE, MICROSOFT_RESPONSE};
pub use merge::{join, ordered_values, MergeNode};
pub use remote::{HttpPipelineService, PipelineService, RemoteError};
pub use text::{render, template_variables, TextNode};
pub use transform::{apply_transform, process, DataProcessingNode, TransformNode};

use piperuntime::NodeRegistry;
use std::sync::Arc;

/// Register every built-in node kind with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(InputNode));
    registry.register(Arc::new(TextNode));
    registry.register(Arc::new(LlmNode));
    registry.register(Arc::new(TransformNode));
    registry.register(Arc::new(FilterNode));
    registry.register(Arc::new(MergeNode));
    registry.register(Arc::new(ConditionNode));
    registry.register(Arc::new(DataProcessingNode));
    registry.register(Arc::new(OutputNode));
}

/// A registry holding every built-in node kind
pub fn default_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}
