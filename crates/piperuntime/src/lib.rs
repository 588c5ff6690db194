//! Pipeline propagation runtime
//!
//! This crate owns the node registry, the propagation scheduler that keeps
//! node state consistent as values flow along edges, and the mutation
//! surface the canvas drives.

mod analysis;
mod intent;
mod registry;
mod runtime;
mod scheduler;

pub use analysis::GraphSummary;
pub use intent::{Intent, IntentOutcome};
pub use registry::{NodeMetadata, NodeRegistry};
pub use runtime::{PipelineRuntime, RemoteTicket, RuntimeConfig};
pub use scheduler::{PassReport, PropagationScheduler};
