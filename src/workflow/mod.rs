/// Workflow Management Layer
///
/// This module handles workflow definitions, persistence, graph ordering,
/// and the hot-reload registry:
/// - Type definitions (Workflow, Node, Connection, typed node configs)
/// - Deterministic topological sorting with cycle detection
/// - SQLite persistence with sqlx (workflows, runs, step records)
/// - Lock-free hot-reload registry using ArcSwap

// Core workflow type definitions
pub mod types;

// Topological sorter producing the execution order
pub mod sort;

// SQLite persistence layer
pub mod storage;

// Hot-reload registry with load-time config resolution
pub mod registry;

// Re-export commonly used types
pub use registry::{CompiledWorkflow, WorkflowRegistry};
pub use types::{Connection, Node, NodeConfig, NodeType, Workflow};
