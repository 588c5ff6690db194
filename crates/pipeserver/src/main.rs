use actix_cors::Cors;
use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder};
use pipecore::NodeKind;
use pipenodes::remote::ExecuteResponse;
use piperuntime::{GraphSummary, NodeRegistry, PipelineRuntime, RuntimeConfig};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

const DEV_ORIGINS: [&str; 4] = [
    "http://localhost:3000",
    "http://localhost:3001",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:3001",
];

/// Application state shared across handlers
struct AppState {
    registry: Arc<NodeRegistry>,
    config: RuntimeConfig,
}

fn parse_body(body: &[u8]) -> Option<JsonValue> {
    serde_json::from_slice::<JsonValue>(body)
        .ok()
        .filter(JsonValue::is_object)
}

#[get("/")]
async fn ping() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "Ping": "Pong" }))
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "pipeflow"
    }))
}

/// Count nodes and edges of a pipeline and check it for cycles
#[post("/pipelines/parse")]
async fn parse_pipeline(body: web::Bytes) -> impl Responder {
    let summary = match parse_body(&body) {
        Some(document) => GraphSummary::from_raw_json(&document),
        None => {
            warn!("Rejected unparseable pipeline body");
            GraphSummary::invalid()
        }
    };
    HttpResponse::Ok().json(summary)
}

/// Run a full pass over a pipeline and report the value of every output node
#[post("/pipelines/execute")]
async fn execute_pipeline(data: web::Data<AppState>, body: web::Bytes) -> impl Responder {
    let Some(document) = parse_body(&body) else {
        warn!("Rejected unparseable pipeline body");
        return HttpResponse::Ok().json(ExecuteResponse::failed("Invalid request"));
    };

    if !GraphSummary::from_raw_json(&document).is_dag {
        info!("Refusing to execute a cyclic pipeline");
        return HttpResponse::Ok().json(ExecuteResponse::failed("Pipeline has a cycle"));
    }

    let mut runtime = PipelineRuntime::with_config(data.registry.clone(), data.config.clone());
    let report = runtime.load_value(&document);

    let outputs: HashMap<_, _> = runtime
        .graph()
        .nodes()
        .iter()
        .filter(|node| node.kind == NodeKind::Output)
        .map(|node| (node.id.clone(), node.data.state.value.clone()))
        .collect();

    info!(
        "Executed pipeline: {} nodes updated, {} outputs",
        report.updated.len(),
        outputs.len()
    );
    HttpResponse::Ok().json(ExecuteResponse::ok(outputs))
}

/// List available node types
#[get("/api/nodes")]
async fn list_node_types(data: web::Data<AppState>) -> impl Responder {
    let nodes: Vec<_> = data
        .registry
        .list_node_types()
        .into_iter()
        .filter_map(|kind| data.registry.get_metadata(kind))
        .map(|metadata| {
            serde_json::json!({
                "type": metadata.kind,
                "description": metadata.description,
                "category": metadata.category,
                "inputs": metadata.inputs,
                "outputs": metadata.outputs,
                "defaultConfig": metadata.default_config,
            })
        })
        .collect();

    HttpResponse::Ok().json(nodes)
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(ping)
        .service(health_check)
        .service(parse_pipeline)
        .service(execute_pipeline)
        .service(list_node_types);
}

fn allowed_origins() -> Vec<String> {
    match std::env::var("ALLOWED_ORIGINS") {
        Ok(origins) => origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => DEV_ORIGINS.iter().map(|origin| origin.to_string()).collect(),
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("🚀 Starting pipeline server");

    let app_state = web::Data::new(AppState {
        registry: Arc::new(pipenodes::default_registry()),
        config: RuntimeConfig::default(),
    });

    info!("✅ Registry initialized with standard nodes");

    let origins = allowed_origins();
    info!("CORS origins: {}", origins.join(", "));

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allow_any_method()
            .allow_any_header()
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(routes)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
