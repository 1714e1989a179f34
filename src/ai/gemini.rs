/// Gemini backend for AiGenerate nodes
///
/// Talks to the Generative Language API. Requires `GOOGLE_API_KEY`.

use std::env;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::ai::{classify_send_error, classify_status, AiBackend, AiProvider, Generation, TokenUsage};
use crate::error::EngineError;

pub struct GeminiBackend {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiBackend {
    /// Create a new backend; fails if `GOOGLE_API_KEY` is unset
    pub fn new(client: Client, model: impl Into<String>) -> Result<Self, EngineError> {
        let api_key = env::var("GOOGLE_API_KEY")
            .map_err(|_| EngineError::Config("GOOGLE_API_KEY must be set".into()))?;

        Ok(Self {
            client,
            api_key,
            model: model.into(),
        })
    }

    /// Parse a generateContent response into a Generation
    fn parse_response(response: &Value) -> Result<Generation, EngineError> {
        let parts = response["candidates"][0]["content"]["parts"]
            .as_array()
            .ok_or_else(|| EngineError::AiProvider {
                provider: "gemini".to_string(),
                message: "no candidates in response".to_string(),
            })?;

        let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();

        if text.is_empty() {
            return Err(EngineError::AiProvider {
                provider: "gemini".to_string(),
                message: "response contained no text parts".to_string(),
            });
        }

        let usage = TokenUsage {
            input_tokens: response["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0),
            output_tokens: response["usageMetadata"]["candidatesTokenCount"]
                .as_u64()
                .unwrap_or(0),
        };

        Ok(Generation { text, usage })
    }
}

#[async_trait]
impl AiBackend for GeminiBackend {
    fn provider(&self) -> AiProvider {
        AiProvider::Gemini
    }

    async fn generate(&self, system_prompt: &str, prompt: &str) -> Result<Generation, EngineError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let mut body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
        });
        if !system_prompt.is_empty() {
            body["system_instruction"] = json!({"parts": [{"text": system_prompt}]});
        }

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_send_error(AiProvider::Gemini, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(AiProvider::Gemini, status.as_u16(), &text));
        }

        let resp_json: Value = resp
            .json()
            .await
            .map_err(|e| classify_send_error(AiProvider::Gemini, e))?;

        Self::parse_response(&resp_json)
    }
}
