/// AI model backend collaborator
///
/// One implementation per provider, each exposing the same narrow contract:
/// `generate(system_prompt, prompt) -> {text, usage}`. Backends read their
/// API keys from the environment at construction; the server only registers
/// backends whose keys are present.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub use anthropic::AnthropicBackend;
pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;

/// Supported model providers for AiGenerate nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    OpenAi,
    Anthropic,
    Gemini,
}

impl AiProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }
}

/// Token accounting reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One completed generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

/// A model backend able to produce text for a prompt
#[async_trait]
pub trait AiBackend: Send + Sync {
    fn provider(&self) -> AiProvider;

    /// Generate text for the given prompts
    ///
    /// Rate limits and timeouts surface as `Transient` so the engine can
    /// retry with backoff; anything else is a hard `AiProvider` failure.
    async fn generate(&self, system_prompt: &str, prompt: &str) -> Result<Generation, EngineError>;
}

/// The set of backends registered at startup, keyed by provider
#[derive(Clone, Default)]
pub struct AiBackendSet {
    backends: HashMap<AiProvider, Arc<dyn AiBackend>>,
}

impl AiBackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Arc<dyn AiBackend>) {
        self.backends.insert(backend.provider(), backend);
    }

    /// Backend for a provider, or a config error if none was registered
    pub fn get(&self, provider: AiProvider) -> Result<&Arc<dyn AiBackend>, EngineError> {
        self.backends.get(&provider).ok_or_else(|| {
            EngineError::Config(format!(
                "no backend registered for provider '{}' (is its API key set?)",
                provider.as_str()
            ))
        })
    }

    pub fn providers(&self) -> Vec<AiProvider> {
        self.backends.keys().copied().collect()
    }
}

/// Shared classification for backend HTTP failures
pub(crate) fn classify_send_error(provider: AiProvider, err: reqwest::Error) -> EngineError {
    if err.is_timeout() || err.is_connect() {
        EngineError::transient(format!("{} request failed: {}", provider.as_str(), err))
    } else {
        EngineError::AiProvider {
            provider: provider.as_str().to_string(),
            message: err.to_string(),
        }
    }
}

/// Shared classification for non-success backend responses
pub(crate) fn classify_status(provider: AiProvider, status: u16, body: &str) -> EngineError {
    if status == 429 {
        EngineError::transient(format!(
            "{} rate limited (status 429): {}",
            provider.as_str(),
            body
        ))
    } else {
        EngineError::AiProvider {
            provider: provider.as_str().to_string(),
            message: format!("status {}: {}", status, body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_tags_round_trip_through_serde() {
        for provider in [AiProvider::OpenAi, AiProvider::Anthropic, AiProvider::Gemini] {
            let json = serde_json::to_string(&provider).unwrap();
            assert_eq!(json, format!("\"{}\"", provider.as_str()));
            let back: AiProvider = serde_json::from_str(&json).unwrap();
            assert_eq!(back, provider);
        }
    }

    #[test]
    fn missing_backend_is_a_config_error() {
        let set = AiBackendSet::new();
        let err = set.get(AiProvider::Gemini).err().unwrap();
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains("gemini"));
    }

    #[test]
    fn rate_limit_status_is_transient() {
        assert!(classify_status(AiProvider::OpenAi, 429, "slow down").is_transient());
        assert_eq!(
            classify_status(AiProvider::OpenAi, 500, "boom").kind(),
            "ai_provider"
        );
    }
}
