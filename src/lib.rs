/// Flowloom: durable workflow execution engine
///
/// This library provides a workflow execution engine with hot-reload
/// workflow management, deterministic topological execution order, and
/// durable, resumable, retryable step semantics.

// Core configuration and setup
pub mod config;

// Typed error taxonomy for the engine
pub mod error;

// AI model backend collaborators
pub mod ai;

// Workflow management layer - definitions, sorting, storage, and registry
pub mod workflow;

// Runtime execution layer - engine, dispatcher, handlers, schedulers
pub mod runtime;

// HTTP API layer - REST endpoints for workflow management and execution
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::EngineError;
pub use runtime::{ExecutionDispatcher, ExecutionEngine, ExecutionRun, RunStatus, StepRecord};
pub use server::start_server;
pub use workflow::{Connection, Node, NodeType, Workflow, WorkflowRegistry};
