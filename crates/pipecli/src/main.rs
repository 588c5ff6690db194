use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use pipecore::{Graph, NodeKind, Position, PropagationEvent};
use pipenodes::remote::DEFAULT_SERVICE_URL;
use pipenodes::{HttpPipelineService, PipelineService};
use piperuntime::{GraphSummary, PipelineRuntime};
use serde_json::{Map, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "pipeflow")]
#[command(about = "Pipeline dataflow CLI", long_about = None)]
struct Cli {
    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Base URL of the execution service
    #[arg(long, global = true, env = "PIPEFLOW_SERVICE_URL", default_value = DEFAULT_SERVICE_URL)]
    service_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Propagate a pipeline file and print its outputs
    Run {
        /// Path to pipeline JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Execute on the service instead of locally
        #[arg(short, long)]
        remote: bool,

        /// Write the propagated state back to the file
        #[arg(short, long)]
        save: bool,
    },

    /// Check a pipeline file for malformed entries and cycles
    Validate {
        /// Path to pipeline JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Ask the service instead of checking locally
        #[arg(short, long)]
        remote: bool,
    },

    /// Edit node fields and propagate the change
    Edit {
        /// Path to pipeline JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Id of the node to edit
        #[arg(short, long)]
        node: String,

        /// Field assignment, `key=value`; values that parse as JSON are taken as JSON
        #[arg(short, long = "set", required = true)]
        set: Vec<String>,

        /// Where to write the result (defaults to the input file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List available node types
    Nodes,

    /// Create an example pipeline
    Init {
        /// Output file path
        #[arg(short, long, default_value = "pipeline.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Commands::Run { file, remote, save } => {
            let service = remote.then(|| HttpPipelineService::new(cli.service_url.clone()));
            run_pipeline(&file, service.as_ref(), save).await?;
        }

        Commands::Validate { file, remote } => {
            let service = remote.then(|| HttpPipelineService::new(cli.service_url.clone()));
            validate_pipeline(&file, service.as_ref()).await?;
        }

        Commands::Edit {
            file,
            node,
            set,
            output,
        } => {
            edit_pipeline(&file, &node, &set, output.as_deref())?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_pipeline(&output)?;
        }
    }

    Ok(())
}

fn new_runtime() -> PipelineRuntime {
    PipelineRuntime::new(Arc::new(pipenodes::default_registry()))
}

fn read_document(file: &Path) -> Result<JsonValue> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", file.display()))
}

fn write_snapshot(runtime: &PipelineRuntime, file: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&runtime.snapshot())?;
    std::fs::write(file, json).with_context(|| format!("Failed to write {}", file.display()))?;
    println!("💾 Saved pipeline to: {}", file.display());
    Ok(())
}

fn print_events(events: &mut broadcast::Receiver<PropagationEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            PropagationEvent::PassStarted { scope, .. } => {
                println!("▶️  Pass started ({:?})", scope);
            }
            PropagationEvent::NodeUpdated { node_id, value, .. } => {
                println!("  ⚡ {} = {:?}", node_id, value);
            }
            PropagationEvent::PassCompleted {
                updated_nodes,
                iterations,
                duration_ms,
                ..
            } => {
                println!(
                    "✨ Pass completed: {} nodes updated in {} iterations ({}ms)",
                    updated_nodes, iterations, duration_ms
                );
            }
            PropagationEvent::CycleLimitReached { node_id, limit, .. } => match node_id {
                Some(node_id) => println!("  ⚠️  Node {} hit the visit limit of {}", node_id, limit),
                None => println!("  ⚠️  Pass stopped after {} sweeps without settling", limit),
            },
            PropagationEvent::RemoteOutputsApplied { updated_nodes, .. } => {
                println!("📥 Remote outputs applied to {} nodes", updated_nodes);
            }
            PropagationEvent::RemoteOutputsDiscarded { request_id, .. } => {
                println!("🗑️  Discarded outputs of superseded request {}", request_id);
            }
        }
    }
}

fn print_outputs(runtime: &PipelineRuntime) {
    let outputs: Vec<_> = runtime
        .graph()
        .nodes()
        .iter()
        .filter(|node| node.kind == NodeKind::Output)
        .collect();

    if outputs.is_empty() {
        println!("   (no output nodes)");
        return;
    }
    println!("📤 Outputs:");
    for node in outputs {
        println!("   {}: {}", node.id, node.data.state.value);
    }
}

async fn run_pipeline(
    file: &Path,
    service: Option<&HttpPipelineService>,
    save: bool,
) -> Result<()> {
    println!("🚀 Loading pipeline from: {}", file.display());

    let document = read_document(file)?;
    let mut runtime = new_runtime();
    let mut events = runtime.subscribe_events();

    let report = runtime.load_value(&document);
    print_events(&mut events);

    println!();
    println!("📋 Pipeline:");
    println!("   Nodes: {}", runtime.graph().nodes().len());
    println!("   Edges: {}", runtime.graph().edges().len());
    if report.limit_reached {
        println!("   ⚠️  Propagation did not settle; the graph has a cycle");
    }

    if let Some(service) = service {
        println!();
        println!("🌐 Executing on {}", service.base_url());
        let ticket = runtime.begin_remote_execution();
        let outputs = match service.execute(&ticket.snapshot).await {
            Ok(outputs) => outputs,
            Err(e) => {
                println!("❌ {}", e);
                return Err(e.into());
            }
        };
        runtime.apply_remote_outputs(&ticket, &outputs);
        print_events(&mut events);
    }

    println!();
    print_outputs(&runtime);

    if save {
        println!();
        write_snapshot(&runtime, file)?;
    }

    Ok(())
}

async fn validate_pipeline(file: &Path, service: Option<&HttpPipelineService>) -> Result<()> {
    println!("🔍 Validating pipeline: {}", file.display());

    let document = read_document(file)?;

    let summary = match service {
        Some(service) => {
            let mut runtime = new_runtime();
            runtime.load_value(&document);
            match service.validate(&runtime.snapshot()).await {
                Ok(summary) => summary,
                Err(e) => {
                    println!("❌ {}", e);
                    return Err(e.into());
                }
            }
        }
        None => {
            let summary = GraphSummary::from_raw_json(&document);
            let loaded = GraphSummary::from_graph(&Graph::from_json_value(&document));
            let dropped_nodes = summary.num_nodes.saturating_sub(loaded.num_nodes);
            let dropped_edges = summary.num_edges.saturating_sub(loaded.num_edges);
            if dropped_nodes + dropped_edges > 0 {
                println!(
                    "⚠️  {} malformed nodes and {} malformed edges will be dropped on load",
                    dropped_nodes, dropped_edges
                );
            }
            summary
        }
    };

    println!("   Nodes: {}", summary.num_nodes);
    println!("   Edges: {}", summary.num_edges);
    if summary.is_dag {
        println!("✅ Pipeline is a DAG");
    } else {
        println!("⚠️  Pipeline is not a DAG");
    }

    Ok(())
}

/// Split `key=value`, reading the value as JSON when it parses and as a
/// plain string otherwise.
fn parse_assignment(assignment: &str) -> Result<(String, JsonValue)> {
    let (key, raw) = assignment
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected key=value, got {:?}", assignment))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("Empty field name in {:?}", assignment));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn edit_pipeline(file: &Path, node: &str, set: &[String], output: Option<&Path>) -> Result<()> {
    let document = read_document(file)?;
    let mut runtime = new_runtime();
    runtime.load_value(&document);

    let partial = set
        .iter()
        .map(|assignment| parse_assignment(assignment))
        .collect::<Result<Map<String, JsonValue>>>()?;

    println!("✏️  Editing {} ({} fields)", node, partial.len());
    let mut events = runtime.subscribe_events();
    let report = runtime.edit_node_field(node, &partial)?;
    print_events(&mut events);

    if report.updated.is_empty() {
        println!("   No node changed");
    }

    println!();
    print_outputs(&runtime);
    println!();
    write_snapshot(&runtime, output.unwrap_or(file))
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = pipenodes::default_registry();

    for kind in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(kind) {
            println!("  • {} ({})", kind, metadata.category);
            println!("    {}", metadata.description);
            println!(
                "    in: [{}]  out: [{}]",
                metadata.inputs.join(", "),
                metadata.outputs.join(", ")
            );
        } else {
            println!("  • {}", kind);
        }
    }
}

fn example_pipeline() -> Result<PipelineRuntime> {
    let mut runtime = new_runtime();

    let input = runtime.add_node(NodeKind::Input, Some(Position { x: 100.0, y: 100.0 }))?;
    let text = runtime.add_node(NodeKind::Text, Some(Position { x: 350.0, y: 100.0 }))?;
    let llm = runtime.add_node(NodeKind::Llm, Some(Position { x: 600.0, y: 100.0 }))?;
    let output = runtime.add_node(NodeKind::Output, Some(Position { x: 850.0, y: 100.0 }))?;

    let template = serde_json::json!({ "text": "Tell me about {{input}}" });
    let value = serde_json::json!({ "value": "googles history" });
    if let (Some(template), Some(value)) = (template.as_object(), value.as_object()) {
        runtime.edit_node_field(&text, template)?;
        runtime.edit_node_field(&input, value)?;
    }

    runtime.connect_edge(&input, Some("output"), &text, Some("input"))?;
    runtime.connect_edge(&text, Some("output"), &llm, Some("input"))?;
    runtime.connect_edge(&llm, Some("output"), &output, Some("input"))?;

    Ok(runtime)
}

fn create_example_pipeline(output: &Path) -> Result<()> {
    let runtime = example_pipeline()?;
    let json = serde_json::to_string_pretty(&runtime.snapshot())?;
    std::fs::write(output, json)?;

    println!("✨ Created example pipeline: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  pipeflow run --file {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("text=Hello {{name}}").unwrap(),
            ("text".to_string(), JsonValue::String("Hello {{name}}".to_string()))
        );
        assert_eq!(
            parse_assignment("temperature=0.2").unwrap(),
            ("temperature".to_string(), serde_json::json!(0.2))
        );
        assert_eq!(
            parse_assignment("condition=a=b").unwrap(),
            ("condition".to_string(), JsonValue::String("a=b".to_string()))
        );
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=x").is_err());
    }

    #[test]
    fn test_example_pipeline_propagates() {
        let runtime = example_pipeline().unwrap();
        let output = runtime
            .graph()
            .nodes()
            .iter()
            .find(|node| node.kind == NodeKind::Output)
            .unwrap();
        assert_eq!(output.data.state.value, pipenodes::GOOGLE_RESPONSE);
        assert_eq!(runtime.graph().edges().len(), 3);
    }

    #[test]
    fn test_cli_parses_service_url_and_sets() {
        let cli = Cli::try_parse_from([
            "pipeflow",
            "--service-url",
            "http://example.test:9000",
            "edit",
            "--file",
            "p.json",
            "--node",
            "text-1",
            "--set",
            "text=hi",
            "--set",
            "model=claude",
        ])
        .unwrap();

        assert_eq!(cli.service_url, "http://example.test:9000");
        match cli.command {
            Commands::Edit { node, set, output, .. } => {
                assert_eq!(node, "text-1");
                assert_eq!(set, vec!["text=hi", "model=claude"]);
                assert!(output.is_none());
            }
            _ => panic!("expected edit"),
        }
    }
}
