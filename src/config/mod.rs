/// Configuration management for the flowloom engine
///
/// Handles server binding, database location, engine retry tuning, and AI
/// model selection. Everything can be overridden with FLOWLOOM_* environment
/// variables for container deployment.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Engine retry and outbound-call tuning
    pub engine: EngineConfig,
    /// AI backend model selection
    pub ai: AiConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file path (created if missing)
    pub path: String,
}

/// Engine tuning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Total attempts per node for transient failures, first one included
    pub max_attempts: u32,
    /// Base backoff in milliseconds, doubled per attempt
    pub base_backoff_ms: u64,
    /// Timeout applied to outbound HTTP and AI calls, in seconds
    pub http_timeout_secs: u64,
}

/// Model names used by the AI backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub openai_model: String,
    pub anthropic_model: String,
    pub gemini_model: String,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("FLOWLOOM_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("FLOWLOOM_PORT")
                    .unwrap_or_else(|_| "3007".to_string())
                    .parse()
                    .unwrap_or(3007),
            },
            database: DatabaseConfig {
                path: std::env::var("FLOWLOOM_DB_PATH")
                    .unwrap_or_else(|_| "data/flowloom.db".to_string()),
            },
            engine: EngineConfig {
                max_attempts: env_parse("FLOWLOOM_MAX_ATTEMPTS", 3),
                base_backoff_ms: env_parse("FLOWLOOM_BASE_BACKOFF_MS", 500),
                http_timeout_secs: env_parse("FLOWLOOM_HTTP_TIMEOUT_SECS", 30),
            },
            ai: AiConfig {
                openai_model: std::env::var("FLOWLOOM_OPENAI_MODEL")
                    .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                anthropic_model: std::env::var("FLOWLOOM_ANTHROPIC_MODEL")
                    .unwrap_or_else(|_| "claude-sonnet-4-0".to_string()),
                gemini_model: std::env::var("FLOWLOOM_GEMINI_MODEL")
                    .unwrap_or_else(|_| "gemini-2.5-flash".to_string()),
            },
        }
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
