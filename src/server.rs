/// Server setup and initialization
///
/// Wires together all components: storage, registry, handler registry,
/// execution engine, dispatcher, and scheduler services, then exposes the
/// HTTP routes. Every component receives its collaborators by constructor;
/// lifecycle is owned here at the process entry point.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::net::TcpListener;

use crate::{
    ai::{AiBackendSet, AnthropicBackend, GeminiBackend, OpenAiBackend},
    api::{create_run_routes, create_workflow_routes, AppState},
    config::Config,
    runtime::{
        dispatcher::ExecutionDispatcher,
        engine::{ExecutionEngine, RetryPolicy},
        handlers::HandlerRegistry,
        scheduler::{TriggerSchedulerService, WakeScheduler},
    },
    workflow::{registry::WorkflowRegistry, storage::Storage},
};

/// Create the main Axum application with all routes
///
/// Initializes all components and wires them together. This includes the
/// database, workflow registry, handler registry, execution engine,
/// dispatcher (with recovery of unfinished runs), and scheduler services.
pub async fn create_app(config: Config) -> Result<Router> {
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("failed to create data directory: {}", e))?;
        }
    }

    tracing::info!("💾 Opening database at {}", config.database.path);
    let pool = SqlitePoolOptions::new()
        .connect_with(
            SqliteConnectOptions::new()
                .filename(&config.database.path)
                .create_if_missing(true),
        )
        .await?;

    let storage = Storage::new(pool);
    storage.init_schema().await?;

    tracing::info!("📊 Loading workflows into registry");
    let registry = Arc::new(WorkflowRegistry::new(storage.clone()));
    registry.init_from_storage().await?;

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.engine.http_timeout_secs))
        .build()?;

    // Only providers with API keys in the environment get a backend; an
    // AiGenerate node naming an unregistered provider fails its run with a
    // config error.
    let mut backends = AiBackendSet::new();
    match OpenAiBackend::new(http_client.clone(), config.ai.openai_model.clone()) {
        Ok(backend) => backends.register(Arc::new(backend)),
        Err(e) => tracing::debug!("openai backend not registered: {}", e),
    }
    match AnthropicBackend::new(http_client.clone(), config.ai.anthropic_model.clone()) {
        Ok(backend) => backends.register(Arc::new(backend)),
        Err(e) => tracing::debug!("anthropic backend not registered: {}", e),
    }
    match GeminiBackend::new(http_client.clone(), config.ai.gemini_model.clone()) {
        Ok(backend) => backends.register(Arc::new(backend)),
        Err(e) => tracing::debug!("gemini backend not registered: {}", e),
    }
    tracing::info!("🤖 Registered {} ai backends", backends.providers().len());

    let handlers = Arc::new(HandlerRegistry::new(http_client, backends));

    let engine = Arc::new(ExecutionEngine::new(
        storage.clone(),
        handlers,
        RetryPolicy {
            max_attempts: config.engine.max_attempts,
            base_backoff_ms: config.engine.base_backoff_ms,
        },
    ));

    let wake = Arc::new(WakeScheduler::new().await?);
    wake.start().await?;

    let dispatcher = Arc::new(ExecutionDispatcher::new(
        storage.clone(),
        Arc::clone(&registry),
        engine,
        wake,
    ));

    // Re-drive anything a previous process left unfinished
    if let Err(e) = Arc::clone(&dispatcher).recover().await {
        tracing::error!("run recovery failed: {}", e);
    }

    let scheduler = Arc::new(
        TriggerSchedulerService::new(Arc::clone(&registry), Arc::clone(&dispatcher)).await?,
    );

    let scheduler_clone = Arc::clone(&scheduler);
    tokio::spawn(async move {
        if let Err(e) = scheduler_clone.start().await {
            tracing::error!("failed to start trigger scheduler: {}", e);
        }
    });

    let app_state = AppState {
        storage,
        registry,
        scheduler,
        dispatcher,
    };

    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes())
        .merge(create_run_routes())
        .with_state(app_state);

    tracing::info!("✅ Application initialized");

    Ok(app)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("starting flowloom server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
