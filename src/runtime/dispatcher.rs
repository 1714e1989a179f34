/// Event dispatcher: the entry point for workflow executions
///
/// Accepts "execute this workflow" submissions, freezes the execution order,
/// and drives the engine on background tasks. Submission is fire-and-forget:
/// the caller gets the run back immediately and polls for terminal status.
/// The dispatcher also owns the run-lock discipline (at most one active
/// drive per run) and startup recovery of unfinished runs.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::error::EngineError;
use crate::runtime::engine::ExecutionEngine;
use crate::runtime::run::{EngineProgress, ExecutionRun, RunError, RunStatus};
use crate::runtime::scheduler::WakeScheduler;
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::sort;
use crate::workflow::storage::Storage;

pub struct ExecutionDispatcher {
    storage: Storage,
    registry: Arc<WorkflowRegistry>,
    engine: Arc<ExecutionEngine>,
    wake: Arc<WakeScheduler>,
}

impl ExecutionDispatcher {
    pub fn new(
        storage: Storage,
        registry: Arc<WorkflowRegistry>,
        engine: Arc<ExecutionEngine>,
        wake: Arc<WakeScheduler>,
    ) -> Self {
        Self { storage, registry, engine, wake }
    }

    /// Submit a workflow for execution
    ///
    /// Rejects unknown workflow ids before any run state exists. A graph
    /// that fails to sort produces a run that is Failed on arrival with zero
    /// step records; a valid graph produces a Pending run and a background
    /// drive task, returned to the caller immediately.
    pub async fn submit(
        self: Arc<Self>,
        workflow_id: &str,
        input: Value,
    ) -> Result<ExecutionRun, EngineError> {
        let compiled = self
            .registry
            .get_workflow(workflow_id)
            .ok_or_else(|| EngineError::not_found("workflow", workflow_id))?;

        let run = match sort::sort(&compiled.workflow.nodes, &compiled.workflow.connections) {
            Ok(ordered) => ExecutionRun::new(
                workflow_id,
                ordered.into_iter().map(|n| n.id).collect(),
                input,
            ),
            Err(error @ EngineError::CyclicDependency { .. }) => {
                tracing::warn!("workflow {} rejected: {}", workflow_id, error);
                let run = ExecutionRun::new_failed(workflow_id, input, &error);
                self.storage.save_run(&run).await?;
                return Ok(run);
            }
            Err(other) => {
                // A sort failure that is not a cycle is a bug in the stored
                // graph or in us; it must never masquerade as a cycle.
                return Err(EngineError::internal(format!(
                    "workflow '{}' failed to linearize: {}",
                    workflow_id, other
                )));
            }
        };

        self.storage.save_run(&run).await?;
        tracing::info!(
            "📥 Submitted run {} for workflow {} ({} nodes)",
            run.id,
            workflow_id,
            run.ordered_node_ids.len()
        );

        Self::spawn_drive(self, run.id.clone());
        Ok(run)
    }

    /// Resume a suspended or interrupted run (wake-up callback target)
    pub fn resume(dispatcher: Arc<Self>, run_id: String) {
        tracing::debug!("resuming run {}", run_id);
        Self::spawn_drive(dispatcher, run_id);
    }

    /// Request cancellation; takes effect at the run's next node boundary
    pub async fn cancel(&self, run_id: &str) -> Result<bool, EngineError> {
        let flagged = self.storage.request_cancel(run_id).await?;
        if flagged {
            tracing::info!("cancellation requested for run {}", run_id);
        }
        Ok(flagged)
    }

    /// Recover unfinished runs after a restart
    ///
    /// Stale locks are cleared first (no other process shares this store),
    /// then sleeping runs get their wake jobs re-registered and everything
    /// else is re-driven. Step memoization makes the re-drive safe.
    pub async fn recover(self: Arc<Self>) -> Result<(), EngineError> {
        self.storage.clear_run_locks().await?;

        let unfinished = self.storage.list_unfinished_runs().await?;
        if unfinished.is_empty() {
            return Ok(());
        }

        tracing::info!("recovering {} unfinished runs", unfinished.len());
        for run in unfinished {
            match (run.status, run.wake_at) {
                (RunStatus::Sleeping, Some(wake_at)) if wake_at > chrono::Utc::now() => {
                    self.wake
                        .schedule_wake(run.id.clone(), wake_at, Arc::clone(&self))
                        .await?;
                }
                _ => {
                    Self::spawn_drive(Arc::clone(&self), run.id.clone());
                }
            }
        }

        Ok(())
    }

    /// Spawn a background task that drives one run
    pub fn spawn_drive(dispatcher: Arc<Self>, run_id: String) {
        tokio::spawn(async move {
            if let Err(e) = dispatcher.drive_run(run_id.clone()).await {
                tracing::error!("drive of run {} failed: {}", run_id, e);
            }
        });
    }

    /// Drive one run under the storage run lock
    ///
    /// Losing the lock race means another drive is already active for this
    /// run; this attempt is dropped, which is exactly the single-writer
    /// guarantee the durability contract needs.
    pub async fn drive_run(self: Arc<Self>, run_id: String) -> Result<(), EngineError> {
        let owner = Uuid::new_v4().to_string();
        if !self.storage.try_lock_run(&run_id, &owner).await? {
            tracing::debug!("run {} is already being driven, dropping duplicate attempt", run_id);
            return Ok(());
        }

        let result = Self::drive_locked(&self, &run_id).await;

        if let Err(error) = &result {
            // Infrastructure failures (deleted workflow, storage trouble)
            // must still leave a diagnosable terminal run behind.
            if let Ok(Some(mut run)) = self.storage.get_run(&run_id).await {
                if !run.status.is_terminal() {
                    run.status = RunStatus::Failed;
                    run.error = Some(RunError {
                        node_id: String::new(),
                        kind: error.kind().to_string(),
                        message: error.to_string(),
                    });
                    if let Err(save_err) = self.storage.save_run(&run).await {
                        tracing::error!("failed to record failure of run {}: {}", run_id, save_err);
                    }
                }
            }
        }

        self.storage.unlock_run(&run_id, &owner).await?;
        result
    }

    async fn drive_locked(dispatcher: &Arc<Self>, run_id: &str) -> Result<(), EngineError> {
        let run = dispatcher
            .storage
            .get_run(run_id)
            .await?
            .ok_or_else(|| EngineError::not_found("run", run_id))?;

        let workflow = dispatcher
            .registry
            .get_workflow(&run.workflow_id)
            .ok_or_else(|| EngineError::not_found("workflow", &run.workflow_id))?;

        match dispatcher.engine.drive(&workflow, run_id).await? {
            EngineProgress::Settled(status) => {
                tracing::info!("run {} settled as {}", run_id, status.as_str());
            }
            EngineProgress::Suspended { wake_at } => {
                dispatcher
                    .wake
                    .schedule_wake(run_id.to_string(), wake_at, Arc::clone(dispatcher))
                    .await?;
            }
        }

        Ok(())
    }
}
