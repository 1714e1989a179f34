/// Durable workflow execution engine
///
/// Drives one run through its frozen topological order, persisting every
/// state change so the process can die and resume at any point. The engine
/// itself is a plain async function invoked repeatedly by the dispatcher: it
/// holds no in-memory run state between drives.
///
/// The central durability invariant: a node whose latest step record is
/// terminal is never re-invoked on resume. Succeeded records are skipped
/// with their output replayed into the template scope; a Failed latest
/// record (a crash landed between the step write and the run write) fails
/// the run from the recorded error rather than re-running the side effect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::EngineError;
use crate::runtime::handlers::{HandlerContext, HandlerRegistry};
use crate::runtime::run::{EngineProgress, ExecutionRun, RunError, RunStatus, StepRecord, StepStatus};
use crate::workflow::registry::CompiledWorkflow;
use crate::workflow::storage::Storage;
use crate::workflow::types::Node;

/// Bounded retry with exponential backoff for transient failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per node, first one included
    pub max_attempts: u32,
    /// Backoff before attempt n+1 is `base_backoff_ms << (n-1)`
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_backoff_ms: 500 }
    }
}

impl RetryPolicy {
    fn backoff_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(1u64 << shift))
    }
}

/// The execution engine
pub struct ExecutionEngine {
    storage: Storage,
    handlers: Arc<HandlerRegistry>,
    retry: RetryPolicy,
}

impl ExecutionEngine {
    pub fn new(storage: Storage, handlers: Arc<HandlerRegistry>, retry: RetryPolicy) -> Self {
        Self { storage, handlers, retry }
    }

    /// Drive a run as far as it can go in one pass
    ///
    /// Returns `Settled` when the run reached (or already had) a terminal
    /// status, or `Suspended` when it parked on a durable sleep. The caller
    /// must hold the run lock.
    pub async fn drive(
        &self,
        workflow: &CompiledWorkflow,
        run_id: &str,
    ) -> Result<EngineProgress, EngineError> {
        let mut run = self
            .storage
            .get_run(run_id)
            .await?
            .ok_or_else(|| EngineError::not_found("run", run_id))?;

        if run.status.is_terminal() {
            tracing::debug!("run {} is already {}, nothing to drive", run_id, run.status.as_str());
            return Ok(EngineProgress::Settled(run.status));
        }

        let started = std::time::Instant::now();
        tracing::info!("🚀 Driving run {} of workflow {}", run_id, run.workflow_id);

        run.status = RunStatus::Running;
        run.wake_at = None;
        self.storage.save_run(&run).await?;

        // Replay history: latest record per node, and the template scope of
        // everything already succeeded.
        let steps = self.storage.list_step_records(run_id).await?;
        let mut latest: HashMap<String, StepRecord> = HashMap::new();
        for step in steps {
            let replace = latest
                .get(&step.node_id)
                .map(|prev| step.attempt >= prev.attempt)
                .unwrap_or(true);
            if replace {
                latest.insert(step.node_id.clone(), step);
            }
        }

        let mut scope = Map::new();
        for node_id in &run.ordered_node_ids {
            if let (Some(record), Some(node)) = (latest.get(node_id), workflow.node(node_id)) {
                if record.status == StepStatus::Succeeded {
                    let output = record.output.clone().unwrap_or(Value::Null);
                    scope.insert(node.output_key().to_string(), output);
                }
            }
        }

        for position in 0..run.ordered_node_ids.len() {
            let node_id = run.ordered_node_ids[position].clone();

            // Cancellation is honored at node boundaries: a running handler
            // is not interrupted mid-flight.
            if self.cancel_requested(run_id).await? {
                tracing::info!("run {} cancelled before node '{}'", run_id, node_id);
                run.status = RunStatus::Cancelled;
                self.storage.save_run(&run).await?;
                return Ok(EngineProgress::Settled(RunStatus::Cancelled));
            }

            let node = workflow.node(&node_id).ok_or_else(|| {
                EngineError::internal(format!(
                    "run {} references node '{}' missing from workflow '{}'",
                    run_id, node_id, run.workflow_id
                ))
            })?;

            let mut resume_step: Option<StepRecord> = None;
            let mut start_attempt = 1;

            match latest.get(&node_id) {
                Some(record) if record.status == StepStatus::Succeeded => {
                    // Memoized: the handler already ran, its output is in
                    // the scope. Never re-invoke.
                    tracing::debug!("run {}: node '{}' already succeeded, skipping", run_id, node_id);
                    continue;
                }
                Some(record) if record.status == StepStatus::Failed => {
                    // A crash landed between the step write and the run
                    // write. The record is terminal, so the side effect must
                    // not re-run; fail the run from what was recorded.
                    let error = RunError {
                        node_id: node_id.clone(),
                        kind: record.error_kind.clone().unwrap_or_else(|| "internal".to_string()),
                        message: record
                            .error
                            .clone()
                            .unwrap_or_else(|| "step failed with no recorded error".to_string()),
                    };
                    return self.fail_run(&mut run, error).await;
                }
                Some(record) if record.status == StepStatus::Sleeping => {
                    let wake_at = record.wake_at.unwrap_or_else(Utc::now);
                    if wake_at > Utc::now() {
                        tracing::debug!(
                            "run {}: node '{}' still sleeping until {}",
                            run_id,
                            node_id,
                            wake_at
                        );
                        run.status = RunStatus::Sleeping;
                        run.wake_at = Some(wake_at);
                        self.storage.save_run(&run).await?;
                        return Ok(EngineProgress::Suspended { wake_at });
                    }
                    // Wake time reached: promote this record and execute.
                    // The handler has had no side effect yet.
                    let mut record = record.clone();
                    record.status = StepStatus::Running;
                    record.wake_at = None;
                    self.storage.update_step_record(&record).await?;
                    start_attempt = record.attempt;
                    resume_step = Some(record);
                }
                Some(record) => {
                    // Pending/Running record from an interrupted drive. The
                    // handler may or may not have run; close it out as a
                    // transient failure and let the retry budget decide.
                    let interrupted = EngineError::transient("attempt interrupted by restart");
                    let mut record = record.clone();
                    record.fail(&interrupted);
                    self.storage.update_step_record(&record).await?;

                    if record.attempt >= self.retry.max_attempts {
                        let error = RunError::at_node(&node_id, &interrupted);
                        return self.fail_run(&mut run, error).await;
                    }
                    start_attempt = record.attempt + 1;
                }
                None => {
                    // First contact with this node: honor its durable sleep
                    // before the handler ever runs.
                    if let Some(delay) = node.delay_seconds {
                        let wake_at = Utc::now() + chrono::Duration::seconds(delay as i64);
                        let step = StepRecord::begin_sleeping(run_id, &node_id, wake_at);
                        self.storage.create_step_record(&step).await?;

                        tracing::info!(
                            "run {}: node '{}' sleeping {}s (wake at {})",
                            run_id,
                            node_id,
                            delay,
                            wake_at
                        );
                        run.status = RunStatus::Sleeping;
                        run.wake_at = Some(wake_at);
                        self.storage.save_run(&run).await?;
                        return Ok(EngineProgress::Suspended { wake_at });
                    }
                }
            }

            let scope_value = Value::Object(scope.clone());
            match self
                .execute_node(workflow, &run, node, start_attempt, resume_step, &scope_value)
                .await?
            {
                Ok(output) => {
                    scope.insert(node.output_key().to_string(), output);
                }
                Err(error) => {
                    let error = RunError::at_node(&node_id, &error);
                    return self.fail_run(&mut run, error).await;
                }
            }
        }

        run.status = RunStatus::Succeeded;
        self.storage.save_run(&run).await?;
        tracing::info!("🎉 Run {} succeeded in {:?}", run_id, started.elapsed());

        Ok(EngineProgress::Settled(RunStatus::Succeeded))
    }

    /// Execute one node, retrying transient failures with backoff
    ///
    /// Every attempt gets its own step record. The outer Result is a
    /// storage/infrastructure failure; the inner one is the node's outcome.
    async fn execute_node(
        &self,
        workflow: &CompiledWorkflow,
        run: &ExecutionRun,
        node: &Node,
        start_attempt: u32,
        resume_step: Option<StepRecord>,
        scope: &Value,
    ) -> Result<Result<Value, EngineError>, EngineError> {
        let mut attempt = start_attempt;
        let mut reusable = resume_step;

        loop {
            let mut step = match reusable.take() {
                Some(step) => step,
                None => {
                    let step = StepRecord::begin(&run.id, &node.id, attempt);
                    self.storage.create_step_record(&step).await?;
                    let mut step = step;
                    step.status = StepStatus::Running;
                    self.storage.update_step_record(&step).await?;
                    step
                }
            };

            tracing::info!(
                "📍 Run {}: executing node '{}' ({}, attempt {}/{})",
                run.id,
                node.id,
                node.node_type.tag(),
                attempt,
                self.retry.max_attempts
            );
            let node_started = std::time::Instant::now();

            let outcome = self.invoke_handler(workflow, run, node, scope).await;

            match outcome {
                Ok(output) => {
                    step.succeed(output.clone());
                    self.storage.update_step_record(&step).await?;
                    tracing::info!(
                        "✅ Run {}: node '{}' succeeded in {:?}",
                        run.id,
                        node.id,
                        node_started.elapsed()
                    );
                    return Ok(Ok(output));
                }
                Err(error) => {
                    step.fail(&error);
                    self.storage.update_step_record(&step).await?;

                    if error.is_transient() && attempt < self.retry.max_attempts {
                        let backoff = self.retry.backoff_after(attempt);
                        tracing::warn!(
                            "run {}: node '{}' attempt {} failed transiently ({}), retrying in {:?}",
                            run.id,
                            node.id,
                            attempt,
                            error,
                            backoff
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                        continue;
                    }

                    tracing::error!(
                        "❌ Run {}: node '{}' failed terminally after attempt {}: {}",
                        run.id,
                        node.id,
                        attempt,
                        error
                    );
                    return Ok(Err(error));
                }
            }
        }
    }

    /// Dispatch one handler invocation for a node
    async fn invoke_handler(
        &self,
        workflow: &CompiledWorkflow,
        run: &ExecutionRun,
        node: &Node,
        scope: &Value,
    ) -> Result<Value, EngineError> {
        let handler = self.handlers.get(&node.node_type).ok_or_else(|| {
            EngineError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: node.node_type.tag().to_string(),
            }
        })?;

        handler
            .execute(HandlerContext {
                node,
                config: workflow.config(&node.id),
                input: &run.input,
                scope,
            })
            .await
    }

    async fn fail_run(
        &self,
        run: &mut ExecutionRun,
        error: RunError,
    ) -> Result<EngineProgress, EngineError> {
        tracing::error!(
            "❌ Run {} failed at node '{}' ({}): {}",
            run.id,
            error.node_id,
            error.kind,
            error.message
        );
        run.status = RunStatus::Failed;
        run.error = Some(error);
        self.storage.save_run(run).await?;
        Ok(EngineProgress::Settled(RunStatus::Failed))
    }

    /// Fresh read of the cancellation flag at a safe point
    async fn cancel_requested(&self, run_id: &str) -> Result<bool, EngineError> {
        Ok(self
            .storage
            .get_run(run_id)
            .await?
            .map(|r| r.cancel_requested)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::handlers::NodeHandler;
    use crate::runtime::template;
    use crate::workflow::registry::compile_workflow;
    use crate::workflow::sort;
    use crate::workflow::types::{
        Connection, HttpRequestConfig, NodeConfig, NodeType, Position, Workflow,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted handler: runs a closure per call, counting invocations
    struct MockHandler<F> {
        calls: AtomicU32,
        behavior: F,
    }

    impl<F> MockHandler<F>
    where
        F: Fn(u32, HandlerContext<'_>) -> Result<Value, EngineError> + Send + Sync,
    {
        fn new(behavior: F) -> Arc<Self> {
            Arc::new(Self { calls: AtomicU32::new(0), behavior })
        }
    }

    #[async_trait]
    impl<F> NodeHandler for MockHandler<F>
    where
        F: Fn(u32, HandlerContext<'_>) -> Result<Value, EngineError> + Send + Sync,
    {
        async fn execute(&self, ctx: HandlerContext<'_>) -> Result<Value, EngineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            (self.behavior)(call, ctx)
        }
    }

    fn node(id: &str, node_type: NodeType, config: Value) -> crate::workflow::types::Node {
        crate::workflow::types::Node {
            id: id.to_string(),
            workflow_id: "wf1".to_string(),
            node_type,
            config,
            position: Position::default(),
            alias: None,
            delay_seconds: None,
        }
    }

    fn conn(id: &str, from: &str, to: &str) -> Connection {
        Connection {
            id: id.to_string(),
            workflow_id: "wf1".to_string(),
            from_node_id: from.to_string(),
            to_node_id: to.to_string(),
        }
    }

    async fn storage() -> Storage {
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

    fn engine(storage: Storage, registry: HandlerRegistry) -> ExecutionEngine {
        ExecutionEngine::new(
            storage,
            Arc::new(registry),
            RetryPolicy { max_attempts: 3, base_backoff_ms: 1 },
        )
    }

    /// Create a run the way the dispatcher does: sort, freeze the order
    async fn make_run(storage: &Storage, workflow: &Workflow, input: Value) -> ExecutionRun {
        let ordered = sort::sort(&workflow.nodes, &workflow.connections).unwrap();
        let run = ExecutionRun::new(
            &workflow.id,
            ordered.into_iter().map(|n| n.id).collect(),
            input,
        );
        storage.save_run(&run).await.unwrap();
        run
    }

    fn trigger_http_workflow() -> Workflow {
        let mut trigger = node("t1", NodeType::Trigger, json!({}));
        trigger.alias = Some("trigger".to_string());
        Workflow {
            id: "wf1".to_string(),
            name: "trigger-then-http".to_string(),
            nodes: vec![
                trigger,
                node(
                    "h1",
                    NodeType::HttpRequest,
                    json!({
                        "endpoint": "https://api.example.com/events?since={{trigger.timestamp}}",
                        "method": "GET"
                    }),
                ),
            ],
            connections: vec![conn("c1", "t1", "h1")],
        }
    }

    #[tokio::test]
    async fn trigger_then_http_succeeds_with_resolved_endpoint() {
        let storage = storage().await;
        let workflow = trigger_http_workflow();
        let compiled = compile_workflow(workflow.clone()).unwrap();
        let run = make_run(&storage, &workflow, json!({"kicked_by": "test"})).await;

        let resolved_urls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let urls = Arc::clone(&resolved_urls);

        let mut registry = HandlerRegistry::empty();
        registry.register(
            NodeType::Trigger,
            MockHandler::new(|_, ctx| {
                Ok(json!({"timestamp": "2024-06-01T12:00:00Z", "payload": ctx.input}))
            }),
        );
        registry.register(
            NodeType::HttpRequest,
            MockHandler::new(move |_, ctx| {
                let Some(NodeConfig::HttpRequest(HttpRequestConfig { endpoint, .. })) = ctx.config
                else {
                    panic!("missing http config");
                };
                let resolved = template::resolve(endpoint, ctx.scope)?;
                urls.lock().unwrap().push(resolved);
                Ok(json!({"status": 200, "headers": {}, "body": "ok"}))
            }),
        );

        let engine = engine(storage.clone(), registry);
        let progress = engine.drive(&compiled, &run.id).await.unwrap();
        assert_eq!(progress, EngineProgress::Settled(RunStatus::Succeeded));

        let steps = storage.list_step_records(&run.id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| s.status == StepStatus::Succeeded));

        let urls = resolved_urls.lock().unwrap();
        assert_eq!(
            urls.as_slice(),
            ["https://api.example.com/events?since=2024-06-01T12:00:00Z"]
        );
    }

    #[tokio::test]
    async fn resume_never_reinvokes_succeeded_steps() {
        let storage = storage().await;
        let workflow = trigger_http_workflow();
        let compiled = compile_workflow(workflow.clone()).unwrap();
        let run = make_run(&storage, &workflow, json!(null)).await;

        let trigger_handler = MockHandler::new(|_, _| Ok(json!({"timestamp": "now"})));
        let http_handler = MockHandler::new(|_, _| Ok(json!({"status": 200})));

        let mut registry = HandlerRegistry::empty();
        registry.register(NodeType::Trigger, Arc::clone(&trigger_handler) as Arc<dyn NodeHandler>);
        registry.register(NodeType::HttpRequest, Arc::clone(&http_handler) as Arc<dyn NodeHandler>);

        let engine = engine(storage.clone(), registry);
        engine.drive(&compiled, &run.id).await.unwrap();
        assert_eq!(trigger_handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(http_handler.calls.load(Ordering::SeqCst), 1);

        // Driving a settled run again must not touch any handler
        let progress = engine.drive(&compiled, &run.id).await.unwrap();
        assert_eq!(progress, EngineProgress::Settled(RunStatus::Succeeded));
        assert_eq!(trigger_handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(http_handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn http_500_fails_fast_and_downstream_never_starts() {
        let storage = storage().await;
        let mut trigger = node("t1", NodeType::Trigger, json!({}));
        trigger.alias = Some("trigger".to_string());
        let workflow = Workflow {
            id: "wf1".to_string(),
            name: "failing-http".to_string(),
            nodes: vec![
                trigger,
                node("h1", NodeType::HttpRequest, json!({"endpoint": "https://x.test", "method": "GET"})),
                node("h2", NodeType::HttpRequest, json!({"endpoint": "https://y.test", "method": "GET"})),
            ],
            connections: vec![conn("c1", "t1", "h1"), conn("c2", "h1", "h2")],
        };
        let compiled = compile_workflow(workflow.clone()).unwrap();
        let run = make_run(&storage, &workflow, json!(null)).await;

        let http_handler = MockHandler::new(|_, _| {
            Err(EngineError::HttpExecution { status: Some(500), message: "server error".into() })
        });

        let mut registry = HandlerRegistry::empty();
        registry.register(NodeType::Trigger, MockHandler::new(|_, _| Ok(json!({"timestamp": "now"}))));
        registry.register(NodeType::HttpRequest, Arc::clone(&http_handler) as Arc<dyn NodeHandler>);

        let engine = engine(storage.clone(), registry);
        let progress = engine.drive(&compiled, &run.id).await.unwrap();
        assert_eq!(progress, EngineProgress::Settled(RunStatus::Failed));

        // Hard failures are not retried
        assert_eq!(http_handler.calls.load(Ordering::SeqCst), 1);

        let loaded = storage.get_run(&run.id).await.unwrap().unwrap();
        let error = loaded.error.unwrap();
        assert_eq!(error.node_id, "h1");
        assert_eq!(error.kind, "http_execution");

        // Trigger succeeded, h1 failed once, h2 never started
        let steps = storage.list_step_records(&run.id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert!(!steps.iter().any(|s| s.node_id == "h2"));
    }

    #[tokio::test]
    async fn transient_failures_retry_with_fresh_records() {
        let storage = storage().await;
        let mut trigger = node("t1", NodeType::Trigger, json!({}));
        trigger.alias = Some("trigger".to_string());
        let workflow = Workflow {
            id: "wf1".to_string(),
            name: "flaky-http".to_string(),
            nodes: vec![
                trigger,
                node("h1", NodeType::HttpRequest, json!({"endpoint": "https://x.test", "method": "GET"})),
            ],
            connections: vec![conn("c1", "t1", "h1")],
        };
        let compiled = compile_workflow(workflow.clone()).unwrap();
        let run = make_run(&storage, &workflow, json!(null)).await;

        // Fails twice with timeouts, then succeeds
        let http_handler = MockHandler::new(|call, _| {
            if call < 2 {
                Err(EngineError::transient("connect timeout"))
            } else {
                Ok(json!({"status": 200}))
            }
        });

        let mut registry = HandlerRegistry::empty();
        registry.register(NodeType::Trigger, MockHandler::new(|_, _| Ok(json!({"timestamp": "now"}))));
        registry.register(NodeType::HttpRequest, Arc::clone(&http_handler) as Arc<dyn NodeHandler>);

        let engine = engine(storage.clone(), registry);
        let progress = engine.drive(&compiled, &run.id).await.unwrap();
        assert_eq!(progress, EngineProgress::Settled(RunStatus::Succeeded));
        assert_eq!(http_handler.calls.load(Ordering::SeqCst), 3);

        let steps = storage.list_step_records(&run.id).await.unwrap();
        let h1_steps: Vec<_> = steps.iter().filter(|s| s.node_id == "h1").collect();
        assert_eq!(h1_steps.len(), 3);
        assert_eq!(h1_steps[0].status, StepStatus::Failed);
        assert_eq!(h1_steps[0].error_kind.as_deref(), Some("transient"));
        assert_eq!(h1_steps[2].status, StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_run() {
        let storage = storage().await;
        let workflow = trigger_http_workflow();
        let compiled = compile_workflow(workflow.clone()).unwrap();
        let run = make_run(&storage, &workflow, json!(null)).await;

        let http_handler = MockHandler::new(|_, _| Err(EngineError::transient("rate limited")));

        let mut registry = HandlerRegistry::empty();
        registry.register(NodeType::Trigger, MockHandler::new(|_, _| Ok(json!({"timestamp": "now"}))));
        registry.register(NodeType::HttpRequest, Arc::clone(&http_handler) as Arc<dyn NodeHandler>);

        let engine = engine(storage.clone(), registry);
        let progress = engine.drive(&compiled, &run.id).await.unwrap();
        assert_eq!(progress, EngineProgress::Settled(RunStatus::Failed));
        assert_eq!(http_handler.calls.load(Ordering::SeqCst), 3);

        let loaded = storage.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(loaded.error.unwrap().kind, "transient");
    }

    #[tokio::test]
    async fn unknown_node_type_fails_without_retry() {
        let storage = storage().await;
        let workflow = Workflow {
            id: "wf1".to_string(),
            name: "stale-node".to_string(),
            nodes: vec![node("t1", NodeType::Trigger, json!({})), node("x1", NodeType::Unknown, json!({}))],
            connections: vec![conn("c1", "t1", "x1")],
        };
        let compiled = compile_workflow(workflow.clone()).unwrap();
        let run = make_run(&storage, &workflow, json!(null)).await;

        let mut registry = HandlerRegistry::empty();
        registry.register(NodeType::Trigger, MockHandler::new(|_, _| Ok(json!({"timestamp": "now"}))));

        let engine = engine(storage.clone(), registry);
        let progress = engine.drive(&compiled, &run.id).await.unwrap();
        assert_eq!(progress, EngineProgress::Settled(RunStatus::Failed));

        let loaded = storage.get_run(&run.id).await.unwrap().unwrap();
        let error = loaded.error.unwrap();
        assert_eq!(error.kind, "unknown_node_type");
        assert_eq!(error.node_id, "x1");
    }

    #[tokio::test]
    async fn durable_sleep_suspends_then_resumes_without_rerunning() {
        let storage = storage().await;
        let mut trigger = node("t1", NodeType::Trigger, json!({}));
        trigger.alias = Some("trigger".to_string());
        let mut sleeper = node("h1", NodeType::HttpRequest, json!({"endpoint": "https://x.test", "method": "GET"}));
        sleeper.delay_seconds = Some(0);
        let workflow = Workflow {
            id: "wf1".to_string(),
            name: "sleepy".to_string(),
            nodes: vec![trigger, sleeper],
            connections: vec![conn("c1", "t1", "h1")],
        };
        let compiled = compile_workflow(workflow.clone()).unwrap();
        let run = make_run(&storage, &workflow, json!(null)).await;

        let trigger_handler = MockHandler::new(|_, _| Ok(json!({"timestamp": "now"})));
        let http_handler = MockHandler::new(|_, _| Ok(json!({"status": 200})));

        let mut registry = HandlerRegistry::empty();
        registry.register(NodeType::Trigger, Arc::clone(&trigger_handler) as Arc<dyn NodeHandler>);
        registry.register(NodeType::HttpRequest, Arc::clone(&http_handler) as Arc<dyn NodeHandler>);

        let engine = engine(storage.clone(), registry);

        // First drive parks on the sleep; the sleeping node's handler has
        // not run yet.
        let progress = engine.drive(&compiled, &run.id).await.unwrap();
        assert!(matches!(progress, EngineProgress::Suspended { .. }));
        assert_eq!(http_handler.calls.load(Ordering::SeqCst), 0);

        let parked = storage.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(parked.status, RunStatus::Sleeping);
        assert!(parked.wake_at.is_some());

        let steps = storage.list_step_records(&run.id).await.unwrap();
        let sleeping: Vec<_> = steps.iter().filter(|s| s.node_id == "h1").collect();
        assert_eq!(sleeping.len(), 1);
        assert_eq!(sleeping[0].status, StepStatus::Sleeping);

        // Second drive (the wake-up): sleep elapsed, handler runs once,
        // trigger is not re-invoked.
        let progress = engine.drive(&compiled, &run.id).await.unwrap();
        assert_eq!(progress, EngineProgress::Settled(RunStatus::Succeeded));
        assert_eq!(trigger_handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(http_handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_is_honored_at_the_node_boundary() {
        let storage = storage().await;
        let workflow = trigger_http_workflow();
        let compiled = compile_workflow(workflow.clone()).unwrap();
        let run = make_run(&storage, &workflow, json!(null)).await;

        storage.request_cancel(&run.id).await.unwrap();

        let http_handler = MockHandler::new(|_, _| Ok(json!({"status": 200})));
        let mut registry = HandlerRegistry::empty();
        registry.register(NodeType::Trigger, MockHandler::new(|_, _| Ok(json!({"timestamp": "now"}))));
        registry.register(NodeType::HttpRequest, Arc::clone(&http_handler) as Arc<dyn NodeHandler>);

        let engine = engine(storage.clone(), registry);
        let progress = engine.drive(&compiled, &run.id).await.unwrap();
        assert_eq!(progress, EngineProgress::Settled(RunStatus::Cancelled));

        // Nothing executed; no step records at all
        assert_eq!(http_handler.calls.load(Ordering::SeqCst), 0);
        assert!(storage.list_step_records(&run.id).await.unwrap().is_empty());
    }
}
