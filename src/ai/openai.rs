/// OpenAI backend for AiGenerate nodes
///
/// Talks to the chat completions API. Requires `OPENAI_API_KEY`; honors
/// `OPENAI_BASE_URL` for proxies and compatible endpoints.

use std::env;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::ai::{classify_send_error, classify_status, AiBackend, AiProvider, Generation, TokenUsage};
use crate::error::EngineError;

pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiBackend {
    /// Create a new backend; fails if `OPENAI_API_KEY` is unset
    pub fn new(client: Client, model: impl Into<String>) -> Result<Self, EngineError> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| EngineError::Config("OPENAI_API_KEY must be set".into()))?;
        let base_url =
            env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url,
        })
    }

    /// Parse a chat completions response into a Generation
    fn parse_response(response: &Value) -> Result<Generation, EngineError> {
        let text = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| EngineError::AiProvider {
                provider: "openai".to_string(),
                message: "no message content in response".to_string(),
            })?
            .to_string();

        let usage = TokenUsage {
            input_tokens: response["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: response["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        };

        Ok(Generation { text, usage })
    }
}

#[async_trait]
impl AiBackend for OpenAiBackend {
    fn provider(&self) -> AiProvider {
        AiProvider::OpenAi
    }

    async fn generate(&self, system_prompt: &str, prompt: &str) -> Result<Generation, EngineError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut messages = Vec::new();
        if !system_prompt.is_empty() {
            messages.push(json!({"role": "system", "content": system_prompt}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let body = json!({
            "model": self.model,
            "messages": messages,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_send_error(AiProvider::OpenAi, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(AiProvider::OpenAi, status.as_u16(), &text));
        }

        let resp_json: Value = resp
            .json()
            .await
            .map_err(|e| classify_send_error(AiProvider::OpenAi, e))?;

        Self::parse_response(&resp_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_and_usage() {
        let response = json!({
            "choices": [{"message": {"role": "assistant", "content": "4"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 1}
        });

        let gen = OpenAiBackend::parse_response(&response).unwrap();
        assert_eq!(gen.text, "4");
        assert_eq!(gen.usage.input_tokens, 12);
        assert_eq!(gen.usage.output_tokens, 1);
    }

    #[test]
    fn missing_content_is_a_provider_error() {
        let response = json!({"choices": []});
        let err = OpenAiBackend::parse_response(&response).unwrap_err();
        assert_eq!(err.kind(), "ai_provider");
    }

    #[test]
    fn absent_usage_defaults_to_zero() {
        let response = json!({
            "choices": [{"message": {"content": "hi"}}]
        });
        let gen = OpenAiBackend::parse_response(&response).unwrap();
        assert_eq!(gen.usage, TokenUsage::default());
    }
}
