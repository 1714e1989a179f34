/// HTTP API Layer
///
/// This module provides the REST API endpoints for workflow management and
/// run execution:
/// - Workflow CRUD operations with hot reload
/// - Fire-and-forget run submission
/// - Run status queries and cancellation

// Workflow management endpoints (POST/GET/PUT/DELETE)
pub mod workflows;

// Run submission, status, and cancellation endpoints
pub mod runs;

// Re-export router builders
pub use runs::create_run_routes;
pub use workflows::{create_workflow_routes, AppState};
