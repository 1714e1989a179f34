/// Runtime Execution Layer
///
/// This module provides the durable execution machinery for workflows:
/// - Run and step record model with persisted state transitions
/// - Template resolution over accumulated step outputs
/// - Node handler registry with one handler per node type
/// - The execution engine (memoized steps, durable sleep, bounded retries)
/// - The event dispatcher (submission, resumption, cancellation, recovery)
/// - Scheduler services for cron triggers and wake timers

// Run and step record model
pub mod run;

// Template resolution over step outputs
pub mod template;

// Node handlers and their registry
pub mod handlers;

// Durable execution engine
pub mod engine;

// Event dispatcher
pub mod dispatcher;

// Cron trigger and wake timer services
pub mod scheduler;

// Re-export main types
pub use dispatcher::ExecutionDispatcher;
pub use engine::{ExecutionEngine, RetryPolicy};
pub use handlers::{HandlerRegistry, NodeHandler};
pub use run::{EngineProgress, ExecutionRun, RunStatus, StepRecord, StepStatus};
pub use scheduler::{TriggerSchedulerService, WakeScheduler};
