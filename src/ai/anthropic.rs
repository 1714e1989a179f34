/// Anthropic backend for AiGenerate nodes
///
/// Talks to the messages API. Requires `ANTHROPIC_API_KEY`; honors
/// `ANTHROPIC_BASE_URL` for custom endpoints.

use std::env;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::ai::{classify_send_error, classify_status, AiBackend, AiProvider, Generation, TokenUsage};
use crate::error::EngineError;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicBackend {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicBackend {
    /// Create a new backend; fails if `ANTHROPIC_API_KEY` is unset
    pub fn new(client: Client, model: impl Into<String>) -> Result<Self, EngineError> {
        let api_key = env::var("ANTHROPIC_API_KEY")
            .map_err(|_| EngineError::Config("ANTHROPIC_API_KEY must be set".into()))?;
        let base_url = env::var("ANTHROPIC_BASE_URL")
            .unwrap_or_else(|_| "https://api.anthropic.com/v1".to_string());

        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url,
        })
    }

    /// Parse a messages API response into a Generation
    ///
    /// Concatenates all text blocks; thinking/tool blocks are ignored since
    /// this contract only surfaces generated text.
    fn parse_response(response: &Value) -> Result<Generation, EngineError> {
        let blocks = response["content"].as_array().ok_or_else(|| EngineError::AiProvider {
            provider: "anthropic".to_string(),
            message: "no content in response".to_string(),
        })?;

        let text: String = blocks
            .iter()
            .filter(|b| b["type"] == "text")
            .filter_map(|b| b["text"].as_str())
            .collect();

        if text.is_empty() {
            return Err(EngineError::AiProvider {
                provider: "anthropic".to_string(),
                message: "response contained no text blocks".to_string(),
            });
        }

        let usage = TokenUsage {
            input_tokens: response["usage"]["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: response["usage"]["output_tokens"].as_u64().unwrap_or(0),
        };

        Ok(Generation { text, usage })
    }
}

#[async_trait]
impl AiBackend for AnthropicBackend {
    fn provider(&self) -> AiProvider {
        AiProvider::Anthropic
    }

    async fn generate(&self, system_prompt: &str, prompt: &str) -> Result<Generation, EngineError> {
        let url = format!("{}/messages", self.base_url);

        let mut body = json!({
            "model": self.model,
            "max_tokens": DEFAULT_MAX_TOKENS,
            "messages": [{"role": "user", "content": prompt}],
        });
        if !system_prompt.is_empty() {
            body["system"] = json!(system_prompt);
        }

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_send_error(AiProvider::Anthropic, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(AiProvider::Anthropic, status.as_u16(), &text));
        }

        let resp_json: Value = resp
            .json()
            .await
            .map_err(|e| classify_send_error(AiProvider::Anthropic, e))?;

        Self::parse_response(&resp_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_and_usage() {
        let response = json!({
            "content": [{"type": "text", "text": "2+2 is 4"}],
            "usage": {"input_tokens": 20, "output_tokens": 6}
        });

        let gen = AnthropicBackend::parse_response(&response).unwrap();
        assert_eq!(gen.text, "2+2 is 4");
        assert_eq!(gen.usage.input_tokens, 20);
        assert_eq!(gen.usage.output_tokens, 6);
    }

    #[test]
    fn concatenates_multiple_text_blocks_and_skips_thinking() {
        let response = json!({
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "part one "},
                {"type": "text", "text": "part two"}
            ],
            "usage": {"input_tokens": 1, "output_tokens": 2}
        });

        let gen = AnthropicBackend::parse_response(&response).unwrap();
        assert_eq!(gen.text, "part one part two");
    }

    #[test]
    fn textless_response_is_a_provider_error() {
        let response = json!({"content": [], "usage": {}});
        let err = AnthropicBackend::parse_response(&response).unwrap_err();
        assert_eq!(err.kind(), "ai_provider");
    }
}
