/// SQLite persistence layer for workflows, runs, and step records
///
/// This is the storage collaborator the engine is built against. Workflows
/// are stored as JSON documents for flexibility; runs and step records get
/// structured columns because the engine queries and mutates them piecemeal.
/// Every operation is a single statement: the engine never assumes
/// cross-record transactions, and the run lock is a one-row compare-and-set.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqlitePool, Row};

use crate::error::EngineError;
use crate::runtime::run::{ExecutionRun, RunError, RunStatus, StepRecord, StepStatus};
use crate::workflow::types::Workflow;

/// SQLite-backed storage for workflow definitions and execution state
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create new storage instance with database connection
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the storage schema
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_runs (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                ordered_node_ids JSON NOT NULL,
                input JSON NOT NULL,
                error JSON,
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                wake_at TEXT,
                lock_owner TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS step_records (
                run_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                output JSON,
                error TEXT,
                error_kind TEXT,
                wake_at TEXT,
                PRIMARY KEY (run_id, node_id, attempt)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_runs_workflow ON execution_runs(workflow_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_steps_run ON step_records(run_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ----- workflows -----

    /// Store a new workflow or update an existing one (UPSERT)
    pub async fn save_workflow(&self, workflow: &Workflow) -> Result<(), EngineError> {
        let definition_json = serde_json::to_string(workflow)?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, definition, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieve a workflow by ID
    pub async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, EngineError> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition_json)?))
            }
            None => Ok(None),
        }
    }

    /// List all workflows with basic metadata
    pub async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>, EngineError> {
        let rows = sqlx::query(
            "SELECT id, name, created_at, updated_at FROM workflows ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| WorkflowMetadata {
                id: row.get("id"),
                name: row.get("name"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Load all workflows for registry initialization
    pub async fn load_all_workflows(&self) -> Result<HashMap<String, Workflow>, EngineError> {
        let rows = sqlx::query("SELECT id, definition FROM workflows")
            .fetch_all(&self.pool)
            .await?;

        let mut workflows = HashMap::new();
        for row in rows {
            let id: String = row.get("id");
            let definition_json: String = row.get("definition");
            workflows.insert(id, serde_json::from_str(&definition_json)?);
        }

        Ok(workflows)
    }

    /// Delete a workflow by ID; its nodes and connections go with it
    pub async fn delete_workflow(&self, id: &str) -> Result<bool, EngineError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ----- execution runs -----

    /// Persist a run's current state (UPSERT on run id)
    ///
    /// `cancel_requested` is sticky on update: a cancel flagged concurrently
    /// by the API cannot be clobbered by an engine save carrying stale state.
    pub async fn save_run(&self, run: &ExecutionRun) -> Result<(), EngineError> {
        let ordered = serde_json::to_string(&run.ordered_node_ids)?;
        let input = serde_json::to_string(&run.input)?;
        let error = run.error.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO execution_runs
                (id, workflow_id, status, ordered_node_ids, input, error,
                 cancel_requested, wake_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                error = excluded.error,
                cancel_requested = MAX(execution_runs.cancel_requested, excluded.cancel_requested),
                wake_at = excluded.wake_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&run.id)
        .bind(&run.workflow_id)
        .bind(run.status.as_str())
        .bind(&ordered)
        .bind(&input)
        .bind(&error)
        .bind(run.cancel_requested as i64)
        .bind(run.wake_at.map(|t| t.to_rfc3339()))
        .bind(run.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieve a run by ID
    pub async fn get_run(&self, id: &str) -> Result<Option<ExecutionRun>, EngineError> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_id, status, ordered_node_ids, input, error,
                   cancel_requested, wake_at, created_at, updated_at
            FROM execution_runs WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(run_from_row).transpose()
    }

    /// Recent runs for one workflow, newest first
    pub async fn list_runs_for_workflow(
        &self,
        workflow_id: &str,
        limit: u32,
    ) -> Result<Vec<ExecutionRun>, EngineError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, status, ordered_node_ids, input, error,
                   cancel_requested, wake_at, created_at, updated_at
            FROM execution_runs WHERE workflow_id = ?
            ORDER BY created_at DESC LIMIT ?
            "#,
        )
        .bind(workflow_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(run_from_row).collect()
    }

    /// Runs that have not reached a terminal status; used by startup recovery
    pub async fn list_unfinished_runs(&self) -> Result<Vec<ExecutionRun>, EngineError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, status, ordered_node_ids, input, error,
                   cancel_requested, wake_at, created_at, updated_at
            FROM execution_runs
            WHERE status IN ('pending', 'running', 'sleeping')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(run_from_row).collect()
    }

    /// Flag a run for cancellation at the next node boundary
    ///
    /// Returns false if the run is already terminal (or missing).
    pub async fn request_cancel(&self, run_id: &str) -> Result<bool, EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE execution_runs SET cancel_requested = 1, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'running', 'sleeping')
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Acquire the single-writer lock for a run
    ///
    /// Atomic compare-and-set on `lock_owner`; at most one drive per run id
    /// can hold it, so concurrent resume attempts cannot duplicate side
    /// effects.
    pub async fn try_lock_run(&self, run_id: &str, owner: &str) -> Result<bool, EngineError> {
        let result = sqlx::query(
            "UPDATE execution_runs SET lock_owner = ? WHERE id = ? AND lock_owner IS NULL",
        )
        .bind(owner)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Drop every run lock; called once at startup before recovery, when no
    /// other process can be holding one
    pub async fn clear_run_locks(&self) -> Result<(), EngineError> {
        sqlx::query("UPDATE execution_runs SET lock_owner = NULL WHERE lock_owner IS NOT NULL")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Release the run lock; only the current owner can release it
    pub async fn unlock_run(&self, run_id: &str, owner: &str) -> Result<(), EngineError> {
        sqlx::query("UPDATE execution_runs SET lock_owner = NULL WHERE id = ? AND lock_owner = ?")
            .bind(run_id)
            .bind(owner)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ----- step records -----

    /// Insert a fresh step record (one per node attempt)
    pub async fn create_step_record(&self, step: &StepRecord) -> Result<(), EngineError> {
        let output = step.output.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO step_records
                (run_id, node_id, attempt, status, started_at, finished_at,
                 output, error, error_kind, wake_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&step.run_id)
        .bind(&step.node_id)
        .bind(step.attempt as i64)
        .bind(step.status.as_str())
        .bind(step.started_at.to_rfc3339())
        .bind(step.finished_at.map(|t| t.to_rfc3339()))
        .bind(&output)
        .bind(&step.error)
        .bind(&step.error_kind)
        .bind(step.wake_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Update an existing step record in place
    pub async fn update_step_record(&self, step: &StepRecord) -> Result<(), EngineError> {
        let output = step.output.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            UPDATE step_records
            SET status = ?, finished_at = ?, output = ?, error = ?, error_kind = ?, wake_at = ?
            WHERE run_id = ? AND node_id = ? AND attempt = ?
            "#,
        )
        .bind(step.status.as_str())
        .bind(step.finished_at.map(|t| t.to_rfc3339()))
        .bind(&output)
        .bind(&step.error)
        .bind(&step.error_kind)
        .bind(step.wake_at.map(|t| t.to_rfc3339()))
        .bind(&step.run_id)
        .bind(&step.node_id)
        .bind(step.attempt as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All step records for a run, in creation order
    pub async fn list_step_records(&self, run_id: &str) -> Result<Vec<StepRecord>, EngineError> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, node_id, attempt, status, started_at, finished_at,
                   output, error, error_kind, wake_at
            FROM step_records WHERE run_id = ?
            ORDER BY started_at ASC, attempt ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(step_from_row).collect()
    }
}

fn run_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ExecutionRun, EngineError> {
    let ordered_json: String = row.get("ordered_node_ids");
    let input_json: String = row.get("input");
    let error_json: Option<String> = row.get("error");
    let status: String = row.get("status");
    let cancel_requested: i64 = row.get("cancel_requested");
    let wake_at: Option<String> = row.get("wake_at");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    let error: Option<RunError> = error_json
        .map(|json| serde_json::from_str(&json))
        .transpose()?;

    Ok(ExecutionRun {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        status: RunStatus::parse(&status)?,
        ordered_node_ids: serde_json::from_str(&ordered_json)?,
        input: serde_json::from_str::<Value>(&input_json)?,
        error,
        cancel_requested: cancel_requested != 0,
        wake_at: wake_at.map(|t| parse_ts(&t)).transpose()?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn step_from_row(row: sqlx::sqlite::SqliteRow) -> Result<StepRecord, EngineError> {
    let status: String = row.get("status");
    let attempt: i64 = row.get("attempt");
    let started_at: String = row.get("started_at");
    let finished_at: Option<String> = row.get("finished_at");
    let output_json: Option<String> = row.get("output");
    let wake_at: Option<String> = row.get("wake_at");

    let output: Option<Value> = output_json
        .map(|json| serde_json::from_str(&json))
        .transpose()?;

    Ok(StepRecord {
        run_id: row.get("run_id"),
        node_id: row.get("node_id"),
        attempt: attempt as u32,
        status: StepStatus::parse(&status)?,
        started_at: parse_ts(&started_at)?,
        finished_at: finished_at.map(|t| parse_ts(&t)).transpose()?,
        output,
        error: row.get("error"),
        error_kind: row.get("error_kind"),
        wake_at: wake_at.map(|t| parse_ts(&t)).transpose()?,
    })
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| EngineError::internal(format!("bad timestamp '{s}' in storage: {e}")))
}

/// Basic workflow metadata for listing operations
#[derive(Debug, serde::Serialize)]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{NodeType, Position};
    use serde_json::json;

    async fn memory_storage() -> Storage {
        // One connection only: each pooled connection to :memory: would
        // otherwise see its own empty database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let storage = Storage::new(pool);
        storage.init_schema().await.unwrap();
        storage
    }

    fn sample_workflow() -> Workflow {
        Workflow {
            id: "wf1".to_string(),
            name: "sample".to_string(),
            nodes: vec![crate::workflow::types::Node {
                id: "n1".to_string(),
                workflow_id: "wf1".to_string(),
                node_type: NodeType::Trigger,
                config: json!({}),
                position: Position::default(),
                alias: Some("trigger".to_string()),
                delay_seconds: None,
            }],
            connections: vec![],
        }
    }

    #[tokio::test]
    async fn workflow_round_trip() {
        let storage = memory_storage().await;
        storage.save_workflow(&sample_workflow()).await.unwrap();

        let loaded = storage.get_workflow("wf1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "sample");
        assert_eq!(loaded.nodes[0].alias.as_deref(), Some("trigger"));

        assert!(storage.delete_workflow("wf1").await.unwrap());
        assert!(storage.get_workflow("wf1").await.unwrap().is_none());
        assert!(!storage.delete_workflow("wf1").await.unwrap());
    }

    #[tokio::test]
    async fn run_round_trip_preserves_order_and_error() {
        let storage = memory_storage().await;
        let mut run = ExecutionRun::new(
            "wf1",
            vec!["a".to_string(), "b".to_string()],
            json!({"hello": "world"}),
        );
        storage.save_run(&run).await.unwrap();

        run.status = RunStatus::Failed;
        run.error = Some(RunError {
            node_id: "b".to_string(),
            kind: "http_execution".to_string(),
            message: "status 500".to_string(),
        });
        storage.save_run(&run).await.unwrap();

        let loaded = storage.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(loaded.ordered_node_ids, vec!["a", "b"]);
        assert_eq!(loaded.input["hello"], json!("world"));
        assert_eq!(loaded.error.unwrap().node_id, "b");
    }

    #[tokio::test]
    async fn step_records_are_keyed_by_attempt() {
        let storage = memory_storage().await;
        let run = ExecutionRun::new("wf1", vec!["a".to_string()], json!(null));
        storage.save_run(&run).await.unwrap();

        let mut first = StepRecord::begin(&run.id, "a", 1);
        first.fail(&EngineError::transient("timeout"));
        storage.create_step_record(&first).await.unwrap();

        let mut second = StepRecord::begin(&run.id, "a", 2);
        second.succeed(json!({"status": 200}));
        storage.create_step_record(&second).await.unwrap();

        let steps = storage.list_step_records(&run.id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].attempt, 1);
        assert_eq!(steps[0].status, StepStatus::Failed);
        assert_eq!(steps[1].attempt, 2);
        assert_eq!(steps[1].output.as_ref().unwrap()["status"], json!(200));
    }

    #[tokio::test]
    async fn run_lock_is_single_writer() {
        let storage = memory_storage().await;
        let run = ExecutionRun::new("wf1", vec![], json!(null));
        storage.save_run(&run).await.unwrap();

        assert!(storage.try_lock_run(&run.id, "owner-1").await.unwrap());
        assert!(!storage.try_lock_run(&run.id, "owner-2").await.unwrap());

        // Only the holder can release
        storage.unlock_run(&run.id, "owner-2").await.unwrap();
        assert!(!storage.try_lock_run(&run.id, "owner-2").await.unwrap());

        storage.unlock_run(&run.id, "owner-1").await.unwrap();
        assert!(storage.try_lock_run(&run.id, "owner-2").await.unwrap());
    }

    #[tokio::test]
    async fn cancel_only_applies_to_live_runs() {
        let storage = memory_storage().await;
        let mut run = ExecutionRun::new("wf1", vec![], json!(null));
        storage.save_run(&run).await.unwrap();

        assert!(storage.request_cancel(&run.id).await.unwrap());
        let loaded = storage.get_run(&run.id).await.unwrap().unwrap();
        assert!(loaded.cancel_requested);

        run.status = RunStatus::Succeeded;
        run.cancel_requested = false;
        storage.save_run(&run).await.unwrap();
        assert!(!storage.request_cancel(&run.id).await.unwrap());
    }

    #[tokio::test]
    async fn unfinished_runs_exclude_terminal_ones() {
        let storage = memory_storage().await;
        let live = ExecutionRun::new("wf1", vec![], json!(null));
        storage.save_run(&live).await.unwrap();

        let mut done = ExecutionRun::new("wf1", vec![], json!(null));
        done.status = RunStatus::Succeeded;
        storage.save_run(&done).await.unwrap();

        let unfinished = storage.list_unfinished_runs().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id, live.id);
    }
}
