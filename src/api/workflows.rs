/// Workflow management REST API endpoints
///
/// Provides CRUD operations for workflow definitions with hot-reload
/// support. All changes trigger immediate registry updates and trigger
/// scheduler re-syncs for zero-downtime deployments.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post, put, Router},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::runtime::dispatcher::ExecutionDispatcher;
use crate::runtime::scheduler::TriggerSchedulerService;
use crate::workflow::registry::{compile_workflow, WorkflowRegistry};
use crate::workflow::storage::Storage;
use crate::workflow::types::Workflow;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Storage for workflows, runs, and step records
    pub storage: Storage,
    /// Hot-reload registry for in-memory workflows
    pub registry: Arc<WorkflowRegistry>,
    /// Trigger scheduler kept in sync with workflow CRUD
    pub scheduler: Arc<TriggerSchedulerService>,
    /// Execution dispatcher for submitting and cancelling runs
    pub dispatcher: Arc<ExecutionDispatcher>,
}

/// Response for workflow creation/update operations
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub message: String,
}

/// Request body for workflow creation and update
#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub workflow: Workflow,
}

/// Create workflow management routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow))
        .route("/api/workflows", get(list_workflows))
        .route("/api/workflows/{id}", get(get_workflow))
        .route("/api/workflows/{id}", put(update_workflow))
        .route("/api/workflows/{id}", delete(delete_workflow))
}

/// Create a new workflow
///
/// POST /api/workflows
/// Body: { "workflow": { "id": "...", "name": "...", "nodes": [...], "connections": [...] } }
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, StatusCode> {
    let workflow = payload.workflow;

    if workflow.id.is_empty() || workflow.name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    // A workflow that does not compile (malformed config, no trigger) is
    // rejected up front instead of failing its first run.
    if let Err(e) = compile_workflow(workflow.clone()) {
        tracing::warn!("rejected workflow '{}': {}", workflow.id, e);
        return Err(StatusCode::BAD_REQUEST);
    }

    match state.storage.get_workflow(&workflow.id).await {
        Ok(Some(_)) => return Err(StatusCode::CONFLICT),
        Ok(None) => {}
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    }

    if let Err(e) = state.storage.save_workflow(&workflow).await {
        tracing::error!("failed to save workflow: {}", e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    if let Err(e) = state.registry.reload_workflow(&workflow.id).await {
        tracing::error!("failed to reload workflow into registry: {}", e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    if let Err(e) = sync_triggers(&state, &workflow.id).await {
        tracing::error!("failed to sync triggers for workflow {}: {}", workflow.id, e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    tracing::info!("🔥 Created workflow: {} ({})", workflow.id, workflow.name);

    Ok(Json(WorkflowResponse {
        id: workflow.id.clone(),
        message: format!("Workflow '{}' created successfully", workflow.name),
    }))
}

/// List all workflows
///
/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    match state.storage.list_workflows().await {
        Ok(workflows) => Ok(Json(json!({ "workflows": workflows }))),
        Err(e) => {
            tracing::error!("failed to list workflows: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Get a specific workflow by ID
///
/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, StatusCode> {
    match state.storage.get_workflow(&id).await {
        Ok(Some(workflow)) => Ok(Json(workflow)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("failed to get workflow {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Update an existing workflow
///
/// PUT /api/workflows/{id}
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, StatusCode> {
    let mut workflow = payload.workflow;
    workflow.id = id.clone();

    if workflow.name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    if let Err(e) = compile_workflow(workflow.clone()) {
        tracing::warn!("rejected workflow update '{}': {}", workflow.id, e);
        return Err(StatusCode::BAD_REQUEST);
    }

    match state.storage.get_workflow(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    }

    if let Err(e) = state.storage.save_workflow(&workflow).await {
        tracing::error!("failed to update workflow: {}", e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    if let Err(e) = state.registry.reload_workflow(&workflow.id).await {
        tracing::error!("failed to reload updated workflow: {}", e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    if let Err(e) = sync_triggers(&state, &workflow.id).await {
        tracing::error!("failed to sync triggers for workflow {}: {}", workflow.id, e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    tracing::info!("🔥 Hot-reloaded workflow: {} ({})", workflow.id, workflow.name);

    Ok(Json(WorkflowResponse {
        id: workflow.id.clone(),
        message: format!("Workflow '{}' updated successfully", workflow.name),
    }))
}

/// Delete a workflow
///
/// DELETE /api/workflows/{id}
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    state.scheduler.remove_workflow_triggers(&id).await;
    state.registry.remove_workflow(&id);

    match state.storage.delete_workflow(&id).await {
        Ok(true) => {
            tracing::info!("deleted workflow: {}", id);
            Ok(Json(json!({ "message": "Workflow deleted successfully" })))
        }
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("failed to delete workflow: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Re-register the trigger scheduler jobs for one workflow
async fn sync_triggers(state: &AppState, workflow_id: &str) -> Result<(), crate::error::EngineError> {
    let Some(compiled) = state.registry.get_workflow(workflow_id) else {
        return Ok(());
    };
    state.scheduler.add_or_update_workflow_triggers(&compiled).await
}
