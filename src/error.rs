/// Typed error taxonomy for the execution engine
///
/// Every failure a run can surface is one of these variants. The engine uses
/// `is_transient()` to decide whether an attempt may be retried and `kind()`
/// to produce the stable tag persisted on failed runs.

use thiserror::Error;

/// Top-level error type for the flowloom engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The workflow graph contains a cycle and cannot be linearized
    #[error("cyclic dependency detected in workflow at node '{node_id}'")]
    CyclicDependency { node_id: String },

    /// A node declares a type no handler is registered for
    #[error("unknown node type '{node_type}' for node '{node_id}'")]
    UnknownNodeType { node_id: String, node_type: String },

    /// A template placeholder referenced a path absent from prior outputs
    #[error("unresolved template path '{path}'")]
    TemplateResolution { path: String },

    /// An outbound HTTP call failed hard (non-2xx or unreadable response)
    #[error("http request failed{}: {message}", .status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    HttpExecution { status: Option<u16>, message: String },

    /// An AI model backend reported a non-retryable failure
    #[error("ai provider '{provider}' failed: {message}")]
    AiProvider { provider: String, message: String },

    /// A referenced entity does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Retryable failure class: timeouts, connection resets, rate limits
    #[error("transient failure: {message}")]
    Transient { message: String },

    /// Invalid or missing configuration (node config, env vars)
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage layer failure
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// JSON serialization/deserialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything the engine did not anticipate (e.g. a sorter failure that
    /// is not a cycle). Never conflated with CyclicDependency.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the engine may retry the failed attempt with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Stable kind tag stored on the run for terminal failures
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CyclicDependency { .. } => "cyclic_dependency",
            Self::UnknownNodeType { .. } => "unknown_node_type",
            Self::TemplateResolution { .. } => "template_resolution",
            Self::HttpExecution { .. } => "http_execution",
            Self::AiProvider { .. } => "ai_provider",
            Self::NotFound { .. } => "not_found",
            Self::Transient { .. } => "transient",
            Self::Config(_) => "config",
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }

    /// Create a transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient { message: message.into() }
    }

    /// Create a not-found error
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_the_only_retryable_kind() {
        assert!(EngineError::transient("timeout").is_transient());
        assert!(!EngineError::CyclicDependency { node_id: "a".into() }.is_transient());
        assert!(!EngineError::HttpExecution { status: Some(500), message: "boom".into() }
            .is_transient());
        assert!(!EngineError::Config("missing key".into()).is_transient());
    }

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(EngineError::CyclicDependency { node_id: "a".into() }.kind(), "cyclic_dependency");
        assert_eq!(EngineError::not_found("workflow", "wf-1").kind(), "not_found");
        assert_eq!(EngineError::TemplateResolution { path: "a.b".into() }.kind(), "template_resolution");
    }

    #[test]
    fn http_error_formats_with_and_without_status() {
        let with = EngineError::HttpExecution { status: Some(500), message: "server error".into() };
        assert!(with.to_string().contains("500"));
        let without = EngineError::HttpExecution { status: None, message: "no route".into() };
        assert!(without.to_string().contains("no route"));
    }
}
