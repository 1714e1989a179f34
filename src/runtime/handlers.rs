/// Node execution handlers
///
/// Each node type implements `NodeHandler`; the engine looks handlers up in
/// a `HandlerRegistry` keyed by node type, built once at startup with its
/// collaborators (HTTP client, AI backends) injected. A node whose type has
/// no registered handler fails its run with an unknown-type error.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::ai::AiBackendSet;
use crate::error::EngineError;
use crate::runtime::template;
use crate::workflow::types::{AiGenerateConfig, HttpMethod, HttpRequestConfig, Node, NodeConfig, NodeType};

/// Everything a handler may consult while executing one node
pub struct HandlerContext<'a> {
    /// The node being executed
    pub node: &'a Node,
    /// Typed config resolved at compile time; None only for unknown types,
    /// which never reach a handler
    pub config: Option<&'a NodeConfig>,
    /// Trigger payload supplied when the run was submitted
    pub input: &'a Value,
    /// Accumulated outputs of prior succeeded steps, keyed by alias or id
    pub scope: &'a Value,
}

/// A node type's execution behavior
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Execute the node and produce its output value
    ///
    /// The output is persisted on the step record and becomes visible to
    /// downstream templates under the node's output key.
    async fn execute(&self, ctx: HandlerContext<'_>) -> Result<Value, EngineError>;
}

/// Static map from node type to handler implementation
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<NodeType, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    /// Build the standard registry with its collaborators injected
    pub fn new(http_client: Client, backends: AiBackendSet) -> Self {
        let mut handlers: HashMap<NodeType, Arc<dyn NodeHandler>> = HashMap::new();
        handlers.insert(NodeType::Trigger, Arc::new(TriggerHandler));
        handlers.insert(NodeType::HttpRequest, Arc::new(HttpRequestHandler { client: http_client }));
        handlers.insert(NodeType::AiGenerate, Arc::new(AiGenerateHandler { backends }));
        Self { handlers }
    }

    /// An empty registry for tests that install their own handlers
    pub fn empty() -> Self {
        Self { handlers: HashMap::new() }
    }

    /// Replace or add the handler for a node type
    pub fn register(&mut self, node_type: NodeType, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(node_type, handler);
    }

    /// Look up the handler for a node type
    pub fn get(&self, node_type: &NodeType) -> Option<&Arc<dyn NodeHandler>> {
        self.handlers.get(node_type)
    }
}

/// Trigger nodes have no real side effect: they seed downstream templates
/// with a synthetic output carrying the invocation timestamp and the payload
/// the run was submitted with.
pub struct TriggerHandler;

#[async_trait]
impl NodeHandler for TriggerHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> Result<Value, EngineError> {
        Ok(json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "payload": ctx.input,
        }))
    }
}

/// Outbound HTTP call with template-resolved endpoint and body
pub struct HttpRequestHandler {
    client: Client,
}

#[async_trait]
impl NodeHandler for HttpRequestHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> Result<Value, EngineError> {
        let config = expect_http_config(&ctx)?;

        let endpoint = template::resolve(&config.endpoint, ctx.scope)?;
        tracing::debug!("http node '{}': {} {}", ctx.node.id, config.method.as_str(), endpoint);

        let mut request = match config.method {
            HttpMethod::Get => self.client.get(&endpoint),
            HttpMethod::Post => self.client.post(&endpoint),
            HttpMethod::Put => self.client.put(&endpoint),
            HttpMethod::Patch => self.client.patch(&endpoint),
            HttpMethod::Delete => self.client.delete(&endpoint),
        };

        for (name, value) in &config.headers {
            request = request.header(name, value);
        }

        // Body only travels on methods that conventionally carry one
        if config.method.carries_body() {
            if let Some(body_template) = &config.body {
                let body = template::resolve(body_template, ctx.scope)?;
                request = request.header("Content-Type", "application/json").body(body);
            }
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                EngineError::transient(format!("http request to {} failed: {}", endpoint, e))
            } else {
                EngineError::HttpExecution { status: None, message: e.to_string() }
            }
        })?;

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let body_text = response.text().await.map_err(|e| EngineError::HttpExecution {
            status: Some(status.as_u16()),
            message: format!("failed to read response body: {e}"),
        })?;

        if status.as_u16() == 429 {
            return Err(EngineError::transient(format!("{} rate limited (status 429)", endpoint)));
        }
        if !status.is_success() {
            // Non-2xx is a reportable failure, never silently swallowed
            return Err(EngineError::HttpExecution {
                status: Some(status.as_u16()),
                message: truncate(&body_text, 512),
            });
        }

        // Surface a JSON body structurally so downstream templates can
        // descend into it; anything else stays a string.
        let body = serde_json::from_str::<Value>(&body_text)
            .unwrap_or_else(|_| Value::String(body_text));

        Ok(json!({
            "status": status.as_u16(),
            "headers": headers,
            "body": body,
        }))
    }
}

/// AI text generation dispatched to the configured provider backend
pub struct AiGenerateHandler {
    backends: AiBackendSet,
}

#[async_trait]
impl NodeHandler for AiGenerateHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> Result<Value, EngineError> {
        let config = expect_ai_config(&ctx)?;

        let prompt = template::resolve(&config.prompt_template, ctx.scope)?;
        let backend = self.backends.get(config.provider)?;

        tracing::debug!(
            "ai node '{}': generating via {} ({} prompt chars)",
            ctx.node.id,
            config.provider.as_str(),
            prompt.len()
        );

        let generation = backend.generate(&config.system_prompt, &prompt).await?;

        Ok(json!({
            "provider": config.provider.as_str(),
            "text": generation.text,
            "usage": generation.usage,
        }))
    }
}

fn expect_http_config<'a>(ctx: &HandlerContext<'a>) -> Result<&'a HttpRequestConfig, EngineError> {
    match ctx.config {
        Some(NodeConfig::HttpRequest(cfg)) => Ok(cfg),
        _ => Err(EngineError::internal(format!(
            "node '{}' reached the http handler without http config",
            ctx.node.id
        ))),
    }
}

fn expect_ai_config<'a>(ctx: &HandlerContext<'a>) -> Result<&'a AiGenerateConfig, EngineError> {
    match ctx.config {
        Some(NodeConfig::AiGenerate(cfg)) => Ok(cfg),
        _ => Err(EngineError::internal(format!(
            "node '{}' reached the ai handler without ai config",
            ctx.node.id
        ))),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}
