/// Scheduler/timer collaborator
///
/// Two services built on tokio-cron-scheduler:
/// - `WakeScheduler` registers one-shot jobs that resume sleeping runs when
///   their wake time expires.
/// - `TriggerSchedulerService` keeps a recurring cron job per scheduled
///   trigger node, submitting fresh runs on the configured cadence. Jobs are
///   hot-reloaded on workflow CRUD with zero downtime: updates remove the
///   old job and register the new one, and a job whose workflow has been
///   deleted skips execution gracefully.

use std::{collections::HashMap, sync::Arc};

use serde_json::json;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::error::EngineError;
use crate::runtime::dispatcher::ExecutionDispatcher;
use crate::workflow::registry::{CompiledWorkflow, WorkflowRegistry};

fn scheduler_error(e: tokio_cron_scheduler::JobSchedulerError) -> EngineError {
    EngineError::internal(format!("scheduler error: {e}"))
}

/// One-shot wake timers for sleeping runs
pub struct WakeScheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
}

impl WakeScheduler {
    pub async fn new() -> Result<Self, EngineError> {
        let scheduler = JobScheduler::new().await.map_err(scheduler_error)?;
        Ok(Self { scheduler: Arc::new(RwLock::new(scheduler)) })
    }

    /// Start delivering wake-ups
    pub async fn start(&self) -> Result<(), EngineError> {
        let scheduler = self.scheduler.read().await;
        scheduler.start().await.map_err(scheduler_error)?;
        Ok(())
    }

    /// Register a one-shot job that resumes `run_id` at `wake_at`
    ///
    /// An overdue wake time fires immediately. Firing a wake for a run that
    /// is already being driven is harmless: the run lock drops the duplicate.
    pub async fn schedule_wake(
        &self,
        run_id: String,
        wake_at: chrono::DateTime<chrono::Utc>,
        dispatcher: Arc<ExecutionDispatcher>,
    ) -> Result<(), EngineError> {
        let delay = (wake_at - chrono::Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);

        tracing::debug!("scheduling wake for run {} in {:?}", run_id, delay);

        let job = Job::new_one_shot_async(delay, move |_uuid, _lock| {
            let run_id = run_id.clone();
            let dispatcher = Arc::clone(&dispatcher);
            Box::pin(async move {
                tracing::debug!("wake timer fired for run {}", run_id);
                ExecutionDispatcher::resume(dispatcher, run_id);
            })
        })
        .map_err(scheduler_error)?;

        let scheduler = self.scheduler.write().await;
        scheduler.add(job).await.map_err(scheduler_error)?;

        Ok(())
    }
}

/// Recurring cron jobs for trigger nodes carrying a schedule
pub struct TriggerSchedulerService {
    scheduler: Arc<RwLock<JobScheduler>>,
    /// Job UUIDs keyed by "workflow_id:node_id", for hot-reload removal
    job_uuid_map: Arc<RwLock<HashMap<String, Uuid>>>,
    registry: Arc<WorkflowRegistry>,
    dispatcher: Arc<ExecutionDispatcher>,
}

impl TriggerSchedulerService {
    pub async fn new(
        registry: Arc<WorkflowRegistry>,
        dispatcher: Arc<ExecutionDispatcher>,
    ) -> Result<Self, EngineError> {
        let scheduler = JobScheduler::new().await.map_err(scheduler_error)?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            job_uuid_map: Arc::new(RwLock::new(HashMap::new())),
            registry,
            dispatcher,
        })
    }

    /// Register all scheduled triggers from the registry and start firing
    pub async fn start(&self) -> Result<(), EngineError> {
        tracing::info!("⏰ Starting trigger scheduler service");

        let workflows = self.registry.get_all_workflows();
        let mut total = 0;
        for workflow in &workflows {
            total += workflow.scheduled_triggers.len();
            self.add_or_update_workflow_triggers(workflow).await?;
        }

        {
            let scheduler = self.scheduler.read().await;
            scheduler.start().await.map_err(scheduler_error)?;
        }

        tracing::info!(
            "✅ Trigger scheduler started with {} scheduled triggers from {} workflows",
            total,
            workflows.len()
        );
        Ok(())
    }

    /// Shut the scheduler down
    pub async fn stop(&self) -> Result<(), EngineError> {
        {
            let mut job_uuid_map = self.job_uuid_map.write().await;
            job_uuid_map.clear();
        }
        {
            let mut scheduler = self.scheduler.write().await;
            scheduler.shutdown().await.map_err(scheduler_error)?;
        }
        tracing::info!("trigger scheduler stopped");
        Ok(())
    }

    /// Hot-reload the cron jobs for one workflow
    ///
    /// Removes jobs for triggers that disappeared and re-registers the rest.
    pub async fn add_or_update_workflow_triggers(
        &self,
        workflow: &CompiledWorkflow,
    ) -> Result<(), EngineError> {
        let workflow_id = workflow.workflow.id.clone();

        // Drop every existing job for this workflow first; the current
        // trigger set is re-registered from scratch below.
        self.remove_workflow_triggers(&workflow_id).await;

        for (node_id, schedule) in &workflow.scheduled_triggers {
            self.add_trigger_job(&workflow_id, node_id, schedule).await?;
        }

        if !workflow.scheduled_triggers.is_empty() {
            tracing::info!(
                "hot-reloaded {} scheduled triggers for workflow {}",
                workflow.scheduled_triggers.len(),
                workflow_id
            );
        }
        Ok(())
    }

    /// Remove all cron jobs belonging to a workflow
    pub async fn remove_workflow_triggers(&self, workflow_id: &str) {
        let mut job_uuid_map = self.job_uuid_map.write().await;
        let prefix = format!("{workflow_id}:");
        let keys: Vec<String> = job_uuid_map
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();

        for key in keys {
            if let Some(job_uuid) = job_uuid_map.remove(&key) {
                let scheduler = self.scheduler.read().await;
                if let Err(e) = scheduler.remove(&job_uuid).await {
                    tracing::warn!("failed to remove trigger job {}: {}", key, e);
                } else {
                    tracing::debug!("removed trigger job {}", key);
                }
            }
        }
    }

    /// Register one recurring job for a scheduled trigger node
    async fn add_trigger_job(
        &self,
        workflow_id: &str,
        node_id: &str,
        schedule: &str,
    ) -> Result<(), EngineError> {
        let job_key = format!("{workflow_id}:{node_id}");
        tracing::debug!("registering trigger job {} with schedule '{}'", job_key, schedule);

        let workflow_id_owned = workflow_id.to_string();
        let node_id_owned = node_id.to_string();
        let registry = Arc::clone(&self.registry);
        let dispatcher = Arc::clone(&self.dispatcher);

        let job = Job::new_async(schedule, move |_uuid, _lock| {
            let workflow_id = workflow_id_owned.clone();
            let node_id = node_id_owned.clone();
            let registry = Arc::clone(&registry);
            let dispatcher = Arc::clone(&dispatcher);

            Box::pin(async move {
                // The workflow may have been deleted since this job was
                // registered; skip instead of erroring.
                if registry.get_workflow(&workflow_id).is_none() {
                    tracing::debug!("skipping trigger for deleted workflow {}", workflow_id);
                    return;
                }

                tracing::info!("🔔 Scheduled trigger fired for workflow {} ({})", workflow_id, node_id);
                let input = json!({
                    "scheduled": true,
                    "trigger_node_id": node_id,
                });

                match dispatcher.submit(&workflow_id, input).await {
                    Ok(run) => {
                        tracing::debug!("scheduled run {} submitted for workflow {}", run.id, workflow_id)
                    }
                    Err(e) => {
                        tracing::error!("scheduled submission failed for workflow {}: {}", workflow_id, e)
                    }
                }
            })
        })
        .map_err(|e| {
            EngineError::Config(format!(
                "invalid schedule '{}' on trigger '{}': {}",
                schedule, node_id, e
            ))
        })?;

        let job_uuid = {
            let scheduler = self.scheduler.write().await;
            scheduler.add(job).await.map_err(scheduler_error)?
        };

        {
            let mut job_uuid_map = self.job_uuid_map.write().await;
            job_uuid_map.insert(job_key, job_uuid);
        }

        Ok(())
    }
}
