/// Core workflow type definitions
///
/// Defines the fundamental structures for workflows, nodes, and connections.
/// These types are serialized/deserialized from JSON for persistence. Node
/// config is stored opaque and resolved into a typed form when the workflow
/// is compiled into the registry.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ai::AiProvider;
use crate::error::EngineError;

/// A complete workflow definition containing nodes and their connections
///
/// Workflows are stored as JSON in SQLite and compiled for execution. Deleting
/// a workflow deletes its nodes and connections with it (they live inside the
/// same document).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier (e.g., "wf-enrich-leads")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// List of nodes in this workflow
    pub nodes: Vec<Node>,
    /// List of directed connections between nodes
    pub connections: Vec<Connection>,
}

/// A single node in the workflow graph
///
/// Nodes represent discrete units of work (triggers, HTTP calls, AI model
/// invocations). Each node has a type that determines its behavior and a
/// config object whose shape depends on that type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the workflow (e.g., "n1", "fetch-user")
    pub id: String,
    /// Workflow this node belongs to
    pub workflow_id: String,
    /// The type of node which determines execution behavior
    pub node_type: NodeType,
    /// Node-specific configuration as flexible JSON, resolved into a typed
    /// config when the workflow is compiled
    #[serde(default)]
    pub config: Value,
    /// Editor canvas position; carried through storage untouched
    #[serde(default)]
    pub position: Position,
    /// Optional short handle downstream templates use instead of the node id
    /// (e.g. alias "trigger" makes `{{trigger.timestamp}}` resolve)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Optional durable sleep before this node's handler runs. The run
    /// suspends with a persisted wake time and resumes without re-running
    /// any prior step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<u64>,
}

impl Node {
    /// Key this node's output is registered under in the template scope
    pub fn output_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.id)
    }
}

/// Available node types for the flowloom engine
///
/// Unrecognized type tags deserialize to `Unknown` so a stored workflow with
/// a stale node type still loads; dispatching such a node fails the run at
/// that node with an unknown-type error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// Workflow entry point. Produces a synthetic `{timestamp, payload}`
    /// output seeding downstream templates. May carry a cron schedule.
    Trigger,

    /// Outbound HTTP call with template-resolved endpoint and body
    /// Expected config: { "endpoint": "https://...", "method": "GET", "body": null }
    HttpRequest,

    /// AI text generation against a configured provider backend
    /// Expected config: { "provider": "openai", "system_prompt": "...", "prompt_template": "..." }
    AiGenerate,

    /// Any type tag this engine version does not recognize
    #[serde(other)]
    Unknown,
}

impl NodeType {
    /// Stable lowercase tag used in logs and error messages
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::HttpRequest => "http_request",
            Self::AiGenerate => "ai_generate",
            Self::Unknown => "unknown",
        }
    }
}

/// Directed connection between two nodes in the workflow graph
///
/// Connections define data flow direction from one node to another. Multiple
/// connections may share an endpoint (fan-in/fan-out). Both endpoints must
/// reference nodes of the same workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Unique connection identifier
    pub id: String,
    /// Workflow this connection belongs to
    pub workflow_id: String,
    /// Source node ID
    pub from_node_id: String,
    /// Target node ID
    pub to_node_id: String,
}

/// Editor canvas coordinates for a node
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Typed per-node-type configuration, resolved from the opaque `Node::config`
/// when a workflow is compiled into the registry
///
/// Resolving at load time means a malformed config is rejected when the
/// workflow is saved, not midway through a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeConfig {
    Trigger(TriggerConfig),
    HttpRequest(HttpRequestConfig),
    AiGenerate(AiGenerateConfig),
}

/// Trigger node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Optional cron schedule; when present the scheduler service submits
    /// this workflow on the given cadence (e.g. "0 */5 * * * *")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

/// HttpRequest node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequestConfig {
    /// URL template; `{{...}}` placeholders resolve against prior outputs
    pub endpoint: String,
    /// HTTP method
    pub method: HttpMethod,
    /// Optional body template, only sent for POST/PUT/PATCH
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Optional constant request headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
}

/// AiGenerate node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiGenerateConfig {
    /// Which model backend to invoke
    pub provider: AiProvider,
    /// System prompt passed verbatim to the backend
    #[serde(default)]
    pub system_prompt: String,
    /// Prompt template; `{{...}}` placeholders resolve against prior outputs
    pub prompt_template: String,
}

/// Supported HTTP methods for the HttpRequest node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Methods that conventionally carry a request payload
    pub fn carries_body(&self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl NodeConfig {
    /// Resolve a node's opaque config into its typed form
    ///
    /// Returns `Ok(None)` for unknown node types: the node is kept so the
    /// engine can fail the run at the offending node instead of refusing to
    /// load the whole workflow.
    pub fn resolve(node: &Node) -> Result<Option<NodeConfig>, EngineError> {
        let config = match node.node_type {
            NodeType::Trigger => NodeConfig::Trigger(parse_config(node)?),
            NodeType::HttpRequest => NodeConfig::HttpRequest(parse_config(node)?),
            NodeType::AiGenerate => NodeConfig::AiGenerate(parse_config(node)?),
            NodeType::Unknown => return Ok(None),
        };
        Ok(Some(config))
    }
}

fn parse_config<T: serde::de::DeserializeOwned>(node: &Node) -> Result<T, EngineError> {
    serde_json::from_value(node.config.clone()).map_err(|e| {
        EngineError::Config(format!(
            "invalid {} config for node '{}': {}",
            node.node_type.tag(),
            node.id,
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(node_type: NodeType, config: Value) -> Node {
        Node {
            id: "n1".to_string(),
            workflow_id: "wf1".to_string(),
            node_type,
            config,
            position: Position::default(),
            alias: None,
            delay_seconds: None,
        }
    }

    #[test]
    fn unknown_node_type_deserializes_instead_of_failing() {
        let parsed: NodeType = serde_json::from_value(json!("SomethingNew")).unwrap();
        assert_eq!(parsed, NodeType::Unknown);
    }

    #[test]
    fn http_request_config_resolves() {
        let n = node(
            NodeType::HttpRequest,
            json!({"endpoint": "https://api.example.com/{{trigger.id}}", "method": "POST", "body": "{}"}),
        );
        match NodeConfig::resolve(&n).unwrap().unwrap() {
            NodeConfig::HttpRequest(cfg) => {
                assert_eq!(cfg.method, HttpMethod::Post);
                assert!(cfg.endpoint.contains("{{trigger.id}}"));
            }
            other => panic!("expected http config, got {:?}", other),
        }
    }

    #[test]
    fn malformed_config_is_a_config_error() {
        let n = node(NodeType::HttpRequest, json!({"method": "GET"}));
        let err = NodeConfig::resolve(&n).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn unknown_type_resolves_to_none() {
        let n = node(NodeType::Unknown, json!({}));
        assert!(NodeConfig::resolve(&n).unwrap().is_none());
    }

    #[test]
    fn output_key_prefers_alias() {
        let mut n = node(NodeType::Trigger, json!({}));
        assert_eq!(n.output_key(), "n1");
        n.alias = Some("trigger".to_string());
        assert_eq!(n.output_key(), "trigger");
    }

    #[test]
    fn trigger_config_defaults_to_manual() {
        let n = node(NodeType::Trigger, json!({}));
        match NodeConfig::resolve(&n).unwrap().unwrap() {
            NodeConfig::Trigger(cfg) => assert!(cfg.schedule.is_none()),
            other => panic!("expected trigger config, got {:?}", other),
        }
    }
}
