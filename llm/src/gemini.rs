//! Gemini-style generateContent adapter.

use crate::adapter::{Capabilities, LlmAdapter};
use crate::error::LlmError;
use crate::types::{Completion, GenerateRequest, Role, Usage};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;

const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Adapter for the Gemini generateContent API.
///
/// Assistant turns are sent with the `model` role; the system prompt rides
/// in the separate `system_instruction` field. Cache hints are ignored.
pub struct GeminiAdapter {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_output_tokens: u32,
}

impl GeminiAdapter {
    /// Create an adapter with a pooled HTTP client.
    #[must_use]
    pub fn new(
        api_key: String,
        model: String,
        base_url: Option<String>,
        max_output_tokens: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            max_output_tokens,
        }
    }

    fn build_body(&self, request: &GenerateRequest) -> serde_json::Value {
        let contents: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::User => "user",
                        Role::Assistant => "model",
                    },
                    "parts": [{ "text": m.content }],
                })
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": request.max_tokens.unwrap_or(self.max_output_tokens),
            },
        });

        if let Some(system) = &request.system {
            body["system_instruction"] = json!({ "parts": [{ "text": system }] });
        }

        body
    }
}

#[async_trait]
impl LlmAdapter for GeminiAdapter {
    async fn generate(&self, request: GenerateRequest) -> Result<Completion, LlmError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key,
        );
        let body = self.build_body(&request);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        match response.status() {
            StatusCode::OK => {
                let value: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| LlmError::Parse(e.to_string()))?;

                // A SAFETY finish reason means the model refused the content.
                if value["candidates"][0]["finishReason"] == "SAFETY" {
                    return Err(LlmError::ContentPolicy(
                        "generation blocked by safety filter".to_string(),
                    ));
                }

                let content = value["candidates"][0]["content"]["parts"][0]["text"]
                    .as_str()
                    .ok_or_else(|| {
                        LlmError::Parse("missing candidates[0].content.parts[0].text".to_string())
                    })?
                    .to_string();

                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let usage = Usage {
                    input_tokens: value["usageMetadata"]["promptTokenCount"]
                        .as_u64()
                        .unwrap_or(0) as u32,
                    output_tokens: value["usageMetadata"]["candidatesTokenCount"]
                        .as_u64()
                        .unwrap_or(0) as u32,
                };

                Ok(Completion { content, usage })
            }
            StatusCode::TOO_MANY_REQUESTS => Err(LlmError::RateLimited),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(LlmError::Unauthorized),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(LlmError::Api {
                    status: status.as_u16(),
                    message: message.chars().take(500).collect(),
                })
            }
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_prompt_cache: false,
            max_context_tokens: 1_000_000,
        }
    }
}
