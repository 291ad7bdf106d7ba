//! OpenAI-style chat completions adapter.

use crate::adapter::{Capabilities, LlmAdapter};
use crate::error::LlmError;
use crate::types::{Completion, GenerateRequest, Role, Usage};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;

const DEFAULT_API_URL: &str = "https://api.openai.com";

/// Adapter for OpenAI-compatible chat completion endpoints.
///
/// No prompt-cache support; cache hints are silently ignored.
pub struct OpenAiAdapter {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_output_tokens: u32,
}

impl OpenAiAdapter {
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
        let mut messages: Vec<serde_json::Value> = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        for m in &request.messages {
            messages.push(json!({
                "role": match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                "content": m.content,
            }));
        }

        json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(self.max_output_tokens),
        })
    }
}

#[async_trait]
impl LlmAdapter for OpenAiAdapter {
    async fn generate(&self, request: GenerateRequest) -> Result<Completion, LlmError> {
        let body = self.build_body(&request);

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
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

                let content = value["choices"][0]["message"]["content"]
                    .as_str()
                    .ok_or_else(|| {
                        LlmError::Parse("missing choices[0].message.content".to_string())
                    })?
                    .to_string();

                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let usage = Usage {
                    input_tokens: value["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                    output_tokens: value["usage"]["completion_tokens"].as_u64().unwrap_or(0)
                        as u32,
                };

                Ok(Completion { content, usage })
            }
            StatusCode::TOO_MANY_REQUESTS => Err(LlmError::RateLimited),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(LlmError::Unauthorized),
            status => {
                let message = response.text().await.unwrap_or_default();
                if message.contains("insufficient_quota") {
                    return Err(LlmError::QuotaExhausted(truncate(&message)));
                }
                Err(LlmError::Api {
                    status: status.as_u16(),
                    message: truncate(&message),
                })
            }
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_prompt_cache: false,
            max_context_tokens: 128_000,
        }
    }
}

fn truncate(message: &str) -> String {
    message.chars().take(500).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    fn adapter() -> OpenAiAdapter {
        OpenAiAdapter::new(
            "sk-test".to_string(),
            "gpt-4o-mini".to_string(),
            None,
            256,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn system_prompt_is_first_message() {
        let request = GenerateRequest::new(
            vec![ChatMessage::user("hello")],
            Some("be brief".to_string()),
        );
        let body = adapter().build_body(&request);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
    }

    #[test]
    fn cache_hint_is_ignored() {
        let request = GenerateRequest::new(vec![ChatMessage::user("hi")], Some("sys".to_string()))
            .with_cache_hint();
        let body = adapter().build_body(&request);
        // Same body with or without the hint.
        let plain =
            GenerateRequest::new(vec![ChatMessage::user("hi")], Some("sys".to_string()));
        assert_eq!(body, adapter().build_body(&plain));
        assert!(!adapter().capabilities().supports_prompt_cache);
    }
}
