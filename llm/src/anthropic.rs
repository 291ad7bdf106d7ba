//! Anthropic-style messages API adapter.

use crate::adapter::{Capabilities, LlmAdapter};
use crate::error::LlmError;
use crate::types::{Completion, GenerateRequest, Role, Usage};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Adapter for the Anthropic messages API.
///
/// The only adapter in this workspace with prompt-cache support: when the
/// request carries a cache hint, the system prompt is sent as a cacheable
/// block.
pub struct AnthropicAdapter {
    client: Client,
    api_key: String,
    model: String,
    api_url: String,
    max_output_tokens: u32,
}

impl AnthropicAdapter {
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
            api_url: base_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            max_output_tokens,
        }
    }

    fn build_body(&self, request: &GenerateRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens.unwrap_or(self.max_output_tokens),
            "messages": messages,
        });

        if let Some(system) = &request.system {
            if request.cache_system {
                body["system"] = json!([{
                    "type": "text",
                    "text": system,
                    "cache_control": { "type": "ephemeral" },
                }]);
            } else {
                body["system"] = json!(system);
            }
        }

        body
    }
}

#[async_trait]
impl LlmAdapter for AnthropicAdapter {
    async fn generate(&self, request: GenerateRequest) -> Result<Completion, LlmError> {
        let body = self.build_body(&request);

        let response = self
            .client
            .post(format!("{}/messages", self.api_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
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

                let content = value["content"][0]["text"]
                    .as_str()
                    .ok_or_else(|| LlmError::Parse("missing content[0].text".to_string()))?
                    .to_string();

                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let usage = Usage {
                    input_tokens: value["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
                    output_tokens: value["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
                };

                tracing::debug!(
                    model = %self.model,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "anthropic generation completed"
                );

                Ok(Completion { content, usage })
            }
            StatusCode::TOO_MANY_REQUESTS => Err(LlmError::RateLimited),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(LlmError::Unauthorized),
            status => {
                let message = response.text().await.unwrap_or_default();
                if message.contains("credit balance") || message.contains("billing") {
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
            supports_prompt_cache: true,
            max_context_tokens: 200_000,
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

    fn adapter() -> AnthropicAdapter {
        AnthropicAdapter::new(
            "test-key".to_string(),
            "claude-sonnet-4-5-20250929".to_string(),
            None,
            512,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn body_includes_plain_system() {
        let request = GenerateRequest::new(
            vec![ChatMessage::user("hello")],
            Some("be brief".to_string()),
        );
        let body = adapter().build_body(&request);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn cache_hint_becomes_cacheable_block() {
        let request = GenerateRequest::new(
            vec![ChatMessage::user("hello")],
            Some("stable prefix".to_string()),
        )
        .with_cache_hint();
        let body = adapter().build_body(&request);
        assert_eq!(body["system"][0]["cache_control"]["type"], "ephemeral");
        assert_eq!(body["system"][0]["text"], "stable prefix");
    }

    #[test]
    fn max_tokens_override() {
        let request =
            GenerateRequest::new(vec![ChatMessage::user("hi")], None).with_max_tokens(64);
        let body = adapter().build_body(&request);
        assert_eq!(body["max_tokens"], 64);
    }

    #[test]
    fn reports_prompt_cache_capability() {
        let capabilities = adapter().capabilities();
        assert!(capabilities.supports_prompt_cache);
        assert_eq!(capabilities.max_context_tokens, 200_000);
    }
}
