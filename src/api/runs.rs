/// Run submission and status endpoints
///
/// Submission is fire-and-forget: POST returns 202 with the run id while the
/// engine drives the run on a background task. Final status and per-step
/// history come from the run query endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, Router},
};
use serde_json::{json, Value};

use crate::api::workflows::AppState;
use crate::error::EngineError;

/// Create run execution and status routes
pub fn create_run_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows/{id}/execute", post(execute_workflow))
        .route("/api/workflows/{id}/runs", get(list_runs))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/cancel", post(cancel_run))
}

/// Submit a workflow for execution
///
/// POST /api/workflows/{id}/execute
/// Body: optional JSON payload surfaced as the trigger node's `payload`
/// Returns 202 with the run id; poll /api/runs/{id} for the outcome.
async fn execute_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    body: String,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let input: Value = if body.trim().is_empty() {
        Value::Null
    } else {
        match serde_json::from_str(&body) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("invalid execution payload for {}: {}", workflow_id, e);
                return Err(StatusCode::BAD_REQUEST);
            }
        }
    };

    let dispatcher = Arc::clone(&state.dispatcher);
    match dispatcher.submit(&workflow_id, input).await {
        Ok(run) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "run_id": run.id,
                "workflow_id": run.workflow_id,
                "status": run.status,
            })),
        )),
        Err(EngineError::NotFound { .. }) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("failed to submit workflow {}: {}", workflow_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Fetch a run with its step history
///
/// GET /api/runs/{id}
async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let run = match state.storage.get_run(&run_id).await {
        Ok(Some(run)) => run,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("failed to load run {}: {}", run_id, e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let steps = match state.storage.list_step_records(&run_id).await {
        Ok(steps) => steps,
        Err(e) => {
            tracing::error!("failed to load steps for run {}: {}", run_id, e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    Ok(Json(json!({ "run": run, "steps": steps })))
}

/// Recent runs for a workflow
///
/// GET /api/workflows/{id}/runs
async fn list_runs(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    match state.storage.list_runs_for_workflow(&workflow_id, 50).await {
        Ok(runs) => Ok(Json(json!({ "runs": runs }))),
        Err(e) => {
            tracing::error!("failed to list runs for {}: {}", workflow_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Request cancellation of a run
///
/// POST /api/runs/{id}/cancel
/// Cancellation lands at the run's next node boundary; a terminal run is
/// reported as not cancellable.
async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    match state.dispatcher.cancel(&run_id).await {
        Ok(true) => Ok(Json(json!({ "cancelled": true }))),
        Ok(false) => match state.storage.get_run(&run_id).await {
            Ok(Some(_)) => Ok(Json(json!({ "cancelled": false, "reason": "run already terminal" }))),
            Ok(None) => Err(StatusCode::NOT_FOUND),
            Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
        },
        Err(e) => {
            tracing::error!("failed to cancel run {}: {}", run_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
