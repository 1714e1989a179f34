/// Execution run and step record model
///
/// One `ExecutionRun` exists per workflow invocation; one `StepRecord` exists
/// per (node, attempt) within a run. Both are persisted after every state
/// change so a process restart can resume a run without re-executing side
/// effects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::EngineError;

/// Lifecycle state of an execution run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    /// Suspended on a durable sleep; a wake job will resume the run
    Sleeping,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Sleeping => "sleeping",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "sleeping" => Ok(Self::Sleeping),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(EngineError::internal(format!("unknown run status '{other}'"))),
        }
    }
}

/// Lifecycle state of a single step attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    /// Durable sleep before the handler runs; the handler has had no side
    /// effect yet when a step is in this state
    Sleeping,
    Succeeded,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Sleeping => "sleeping",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "sleeping" => Ok(Self::Sleeping),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(EngineError::internal(format!("unknown step status '{other}'"))),
        }
    }
}

/// Durable record of one node execution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub run_id: String,
    pub node_id: String,
    /// Attempt counter, starting at 1; each retry is a fresh record
    pub attempt: u32,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Handler output once the step succeeds; what downstream templates see
    pub output: Option<Value>,
    pub error: Option<String>,
    /// Stable error kind tag when the attempt failed (see `EngineError::kind`)
    pub error_kind: Option<String>,
    /// Wake time while the step is sleeping
    pub wake_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    /// Fresh record for an attempt that is about to run
    pub fn begin(run_id: &str, node_id: &str, attempt: u32) -> Self {
        Self {
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
            attempt,
            status: StepStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            output: None,
            error: None,
            error_kind: None,
            wake_at: None,
        }
    }

    /// Fresh record suspended on a durable sleep before its handler runs
    pub fn begin_sleeping(run_id: &str, node_id: &str, wake_at: DateTime<Utc>) -> Self {
        Self {
            status: StepStatus::Sleeping,
            wake_at: Some(wake_at),
            ..Self::begin(run_id, node_id, 1)
        }
    }

    pub fn succeed(&mut self, output: Value) {
        self.status = StepStatus::Succeeded;
        self.output = Some(output);
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: &EngineError) {
        self.status = StepStatus::Failed;
        self.error = Some(error.to_string());
        self.error_kind = Some(error.kind().to_string());
        self.finished_at = Some(Utc::now());
    }
}

/// Terminal failure details surfaced on a failed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    /// Node the failure originated at; empty when the graph itself is bad
    pub node_id: String,
    /// Stable error kind tag (see `EngineError::kind`)
    pub kind: String,
    pub message: String,
}

impl RunError {
    pub fn at_node(node_id: &str, error: &EngineError) -> Self {
        Self {
            node_id: node_id.to_string(),
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }

    pub fn for_graph(error: &EngineError) -> Self {
        let node_id = match error {
            EngineError::CyclicDependency { node_id } => node_id.clone(),
            _ => String::new(),
        };
        Self {
            node_id,
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// One concrete invocation of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    /// Topological execution order frozen at submit time; always a
    /// permutation of the workflow's node ids
    pub ordered_node_ids: Vec<String>,
    /// Trigger payload supplied at submission, surfaced by the trigger node
    pub input: Value,
    pub error: Option<RunError>,
    /// Cancellation flag, honored at the next node boundary
    pub cancel_requested: bool,
    /// Wake time while the run is sleeping
    pub wake_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRun {
    pub fn new(workflow_id: &str, ordered_node_ids: Vec<String>, input: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            status: RunStatus::Pending,
            ordered_node_ids,
            input,
            error: None,
            cancel_requested: false,
            wake_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A run created dead on arrival because its graph failed validation
    pub fn new_failed(workflow_id: &str, input: Value, error: &EngineError) -> Self {
        let mut run = Self::new(workflow_id, Vec::new(), input);
        run.status = RunStatus::Failed;
        run.error = Some(RunError::for_graph(error));
        run
    }
}

/// What a single engine drive accomplished
#[derive(Debug, Clone, PartialEq)]
pub enum EngineProgress {
    /// The run reached a terminal status (or was already terminal)
    Settled(RunStatus),
    /// The run suspended on a durable sleep; resume at or after `wake_at`
    Suspended { wake_at: DateTime<Utc> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Sleeping,
            RunStatus::Succeeded,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(RunStatus::parse("bogus").is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Sleeping.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(!StepStatus::Sleeping.is_terminal());
    }

    #[test]
    fn failed_run_carries_the_cycle_node() {
        let err = EngineError::CyclicDependency { node_id: "b".into() };
        let run = ExecutionRun::new_failed("wf1", json!(null), &err);
        assert_eq!(run.status, RunStatus::Failed);
        let run_err = run.error.unwrap();
        assert_eq!(run_err.kind, "cyclic_dependency");
        assert_eq!(run_err.node_id, "b");
        assert!(run.ordered_node_ids.is_empty());
    }

    #[test]
    fn step_record_lifecycle() {
        let mut step = StepRecord::begin("r1", "n1", 1);
        assert_eq!(step.status, StepStatus::Pending);
        step.succeed(json!({"ok": true}));
        assert_eq!(step.status, StepStatus::Succeeded);
        assert!(step.finished_at.is_some());
        assert_eq!(step.output.unwrap()["ok"], json!(true));
    }
}
