//! Embedding backends feeding the semantic cache.
//!
//! The backend is optional: when none is configured the cache is disabled
//! and every lookup is a miss. Backend errors never fail a thought; the
//! cache boundary swallows them.

use crate::error::LlmError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;

/// Produces fixed-dimension embeddings of thought text.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed one text.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] on backend failures; callers downgrade to a
    /// cache miss.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    /// The backend's native vector dimension.
    fn dimension(&self) -> usize;
}

/// OpenAI-style `/v1/embeddings` backend (1536-dimensional).
pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiEmbedder {
    const DEFAULT_API_URL: &'static str = "https://api.openai.com";

    /// Create a backend with a pooled HTTP client.
    #[must_use]
    pub fn new(
        api_key: String,
        model: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| Self::DEFAULT_API_URL.to_string()),
        }
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        match response.status() {
            StatusCode::OK => {
                let value: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| LlmError::Parse(e.to_string()))?;
                parse_vector(&value["data"][0]["embedding"])
            }
            StatusCode::TOO_MANY_REQUESTS => Err(LlmError::RateLimited),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(LlmError::Unauthorized),
            status => Err(LlmError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    fn dimension(&self) -> usize {
        1536
    }
}

/// Gemini-style `embedContent` backend (768-dimensional).
pub struct GeminiEmbedder {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiEmbedder {
    const DEFAULT_API_URL: &'static str = "https://generativelanguage.googleapis.com/v1beta";

    /// Create a backend with a pooled HTTP client.
    #[must_use]
    pub fn new(
        api_key: String,
        model: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| Self::DEFAULT_API_URL.to_string()),
        }
    }
}

#[async_trait]
impl EmbeddingBackend for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.base_url, self.model, self.api_key,
        );
        let response = self
            .client
            .post(&url)
            .json(&json!({ "content": { "parts": [{ "text": text }] } }))
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        match response.status() {
            StatusCode::OK => {
                let value: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| LlmError::Parse(e.to_string()))?;
                parse_vector(&value["embedding"]["values"])
            }
            StatusCode::TOO_MANY_REQUESTS => Err(LlmError::RateLimited),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(LlmError::Unauthorized),
            status => Err(LlmError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    fn dimension(&self) -> usize {
        768
    }
}

#[allow(clippy::cast_possible_truncation)]
fn parse_vector(value: &serde_json::Value) -> Result<Vec<f32>, LlmError> {
    value
        .as_array()
        .ok_or_else(|| LlmError::Parse("embedding is not an array".to_string()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| LlmError::Parse("embedding element is not a number".to_string()))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn parse_vector_accepts_numbers() {
        let value = json!([0.1, -0.2, 0.3]);
        let vector = parse_vector(&value).unwrap();
        assert_eq!(vector.len(), 3);
        assert!((vector[1] + 0.2).abs() < 1e-6);
    }

    #[test]
    fn parse_vector_rejects_non_arrays() {
        assert!(parse_vector(&json!("nope")).is_err());
        assert!(parse_vector(&json!([1.0, "x"])).is_err());
    }

    #[test]
    fn native_dimensions() {
        let openai = OpenAiEmbedder::new(
            "k".into(),
            "text-embedding-3-small".into(),
            None,
            Duration::from_secs(5),
        );
        assert_eq!(openai.dimension(), 1536);

        let gemini = GeminiEmbedder::new(
            "k".into(),
            "text-embedding-004".into(),
            None,
            Duration::from_secs(5),
        );
        assert_eq!(gemini.dimension(), 768);
    }
}
