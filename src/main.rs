/// Flowloom: durable workflow execution engine
///
/// Main entry point for the flowloom server. Initializes configuration and
/// starts the HTTP server with workflow management and execution endpoints.

use flowloom::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Workflow management API at /api/workflows/*
/// - Run submission at /api/workflows/{id}/execute
/// - Run status and cancellation at /api/runs/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (defaults plus FLOWLOOM_* environment overrides)
    let config = Config::default();

    // Start the server
    start_server(config).await?;

    Ok(())
}
