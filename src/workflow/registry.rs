/// Hot-reload workflow registry using ArcSwap
///
/// Provides lock-free, atomic updates to the in-memory workflow registry.
/// Each workflow update swaps the entire registry pointer, so concurrent
/// executions keep reading a consistent snapshot while edits land.
/// Compilation resolves every node's opaque config into its typed form, so a
/// malformed config is rejected at save time instead of mid-run.

use std::{collections::HashMap, sync::Arc};

use arc_swap::ArcSwap;

use crate::error::EngineError;
use crate::workflow::storage::Storage;
use crate::workflow::types::{Node, NodeConfig, NodeType, TriggerConfig, Workflow};

/// Lock-free workflow registry for hot-reload capabilities
///
/// The registry is the single source of truth for active workflows in memory.
#[derive(Debug)]
pub struct WorkflowRegistry {
    /// Thread-safe atomic pointer to the compiled workflow map
    workflows: ArcSwap<HashMap<String, CompiledWorkflow>>,

    /// Reference to persistent storage for reload operations
    storage: Storage,
}

/// Workflow with execution metadata resolved at load time
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    /// Base workflow definition
    pub workflow: Workflow,

    /// Per-node typed config, keyed by node id. A node with an unknown type
    /// has no entry; dispatching it fails the run at that node.
    pub configs: HashMap<String, NodeConfig>,

    /// Trigger nodes carrying a cron schedule, as (node_id, schedule)
    pub scheduled_triggers: Vec<(String, String)>,
}

impl CompiledWorkflow {
    /// Look up a node by id
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.workflow.nodes.iter().find(|n| n.id == node_id)
    }

    /// Typed config for a node, if its type was recognized at compile time
    pub fn config(&self, node_id: &str) -> Option<&NodeConfig> {
        self.configs.get(node_id)
    }
}

impl WorkflowRegistry {
    /// Create new registry instance with storage backend
    pub fn new(storage: Storage) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    /// Initialize registry by loading all workflows from storage
    ///
    /// Called during application startup to populate the in-memory registry.
    pub async fn init_from_storage(&self) -> Result<(), EngineError> {
        let stored_workflows = self.storage.load_all_workflows().await?;

        let mut compiled = HashMap::new();
        for (id, workflow) in stored_workflows {
            match compile_workflow(workflow) {
                Ok(cw) => {
                    compiled.insert(id, cw);
                }
                Err(e) => {
                    // A workflow that no longer compiles must not take the
                    // whole registry down at startup.
                    tracing::warn!("skipping workflow '{}' at startup: {}", id, e);
                }
            }
        }

        self.workflows.store(Arc::new(compiled));

        tracing::info!(
            "initialized workflow registry with {} workflows",
            self.workflows.load().len()
        );

        Ok(())
    }

    /// Hot-reload a single workflow from storage
    ///
    /// Lock-free atomic pointer swap; concurrent executions are not blocked.
    pub async fn reload_workflow(&self, workflow_id: &str) -> Result<(), EngineError> {
        let workflow = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::not_found("workflow", workflow_id))?;

        let compiled = compile_workflow(workflow)?;

        let current = self.workflows.load();
        let mut next = (**current).clone();
        next.insert(workflow_id.to_string(), compiled);
        self.workflows.store(Arc::new(next));

        tracing::info!("hot-reloaded workflow: {}", workflow_id);

        Ok(())
    }

    /// Get a compiled workflow by ID (lock-free read)
    pub fn get_workflow(&self, workflow_id: &str) -> Option<CompiledWorkflow> {
        self.workflows.load().get(workflow_id).cloned()
    }

    /// All workflows currently registered (used by the trigger scheduler)
    pub fn get_all_workflows(&self) -> Vec<CompiledWorkflow> {
        self.workflows.load().values().cloned().collect()
    }

    /// List all active workflow IDs
    pub fn list_workflow_ids(&self) -> Vec<String> {
        self.workflows.load().keys().cloned().collect()
    }

    /// Remove a workflow from the registry
    pub fn remove_workflow(&self, workflow_id: &str) {
        let current = self.workflows.load();
        let mut next = (**current).clone();

        if next.remove(workflow_id).is_some() {
            self.workflows.store(Arc::new(next));
            tracing::info!("removed workflow from registry: {}", workflow_id);
        }
    }
}

/// Compile a workflow: resolve typed configs and extract trigger metadata
///
/// Rejects workflows with no trigger node (nothing could ever start them)
/// and workflows whose known-type nodes carry malformed config. Unknown node
/// types are kept; they fail at dispatch, not at load.
pub fn compile_workflow(workflow: Workflow) -> Result<CompiledWorkflow, EngineError> {
    let mut configs = HashMap::new();
    let mut scheduled_triggers = Vec::new();
    let mut has_trigger = false;

    for node in &workflow.nodes {
        if let Some(config) = NodeConfig::resolve(node)? {
            if let NodeConfig::Trigger(TriggerConfig { schedule: Some(schedule) }) = &config {
                scheduled_triggers.push((node.id.clone(), schedule.clone()));
            }
            configs.insert(node.id.clone(), config);
        }
        if node.node_type == NodeType::Trigger {
            has_trigger = true;
        }
    }

    if !has_trigger {
        return Err(EngineError::Config(format!(
            "workflow '{}' has no trigger node",
            workflow.id
        )));
    }

    Ok(CompiledWorkflow {
        workflow,
        configs,
        scheduled_triggers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{Connection, Position};
    use serde_json::json;

    fn node(id: &str, node_type: NodeType, config: serde_json::Value) -> Node {
        Node {
            id: id.to_string(),
            workflow_id: "wf1".to_string(),
            node_type,
            config,
            position: Position::default(),
            alias: None,
            delay_seconds: None,
        }
    }

    fn workflow(nodes: Vec<Node>) -> Workflow {
        Workflow {
            id: "wf1".to_string(),
            name: "test".to_string(),
            nodes,
            connections: Vec::<Connection>::new(),
        }
    }

    #[test]
    fn compiles_typed_configs_and_schedules() {
        let wf = workflow(vec![
            node("t", NodeType::Trigger, json!({"schedule": "0 */5 * * * *"})),
            node(
                "h",
                NodeType::HttpRequest,
                json!({"endpoint": "https://example.com", "method": "GET"}),
            ),
        ]);

        let compiled = compile_workflow(wf).unwrap();
        assert_eq!(compiled.configs.len(), 2);
        assert_eq!(
            compiled.scheduled_triggers,
            vec![("t".to_string(), "0 */5 * * * *".to_string())]
        );
        assert!(matches!(
            compiled.config("h"),
            Some(NodeConfig::HttpRequest(_))
        ));
    }

    #[test]
    fn unknown_node_type_compiles_without_config() {
        let wf = workflow(vec![
            node("t", NodeType::Trigger, json!({})),
            node("x", NodeType::Unknown, json!({"whatever": 1})),
        ]);

        let compiled = compile_workflow(wf).unwrap();
        assert!(compiled.config("x").is_none());
        assert!(compiled.node("x").is_some());
    }

    #[test]
    fn workflow_without_trigger_is_rejected() {
        let wf = workflow(vec![node(
            "h",
            NodeType::HttpRequest,
            json!({"endpoint": "https://example.com", "method": "GET"}),
        )]);

        let err = compile_workflow(wf).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn malformed_config_fails_compilation() {
        let wf = workflow(vec![
            node("t", NodeType::Trigger, json!({})),
            node("h", NodeType::HttpRequest, json!({"method": "BREW"})),
        ]);

        assert!(compile_workflow(wf).is_err());
    }
}
