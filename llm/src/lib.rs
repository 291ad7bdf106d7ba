//! # Thoughtflow LLM
//!
//! Provider-pluggable chat-completion and embedding adapters.
//!
//! Every provider implements the same [`adapter::LlmAdapter`] trait:
//! `generate(request) → { content, usage }` plus a capability query. New
//! providers are added by implementing the trait, not by reflection. The
//! adapters map provider errors onto the pipeline failure taxonomy via
//! [`error::LlmError::classify`].
//!
//! Prompt-cache hints are best-effort: the Anthropic adapter forwards them,
//! the others silently ignore them. Correctness never depends on the hint.

pub mod adapter;
pub mod anthropic;
pub mod embedding;
pub mod error;
pub mod gemini;
pub mod openai;
pub mod types;

use std::sync::Arc;
use thoughtflow_core::config::{EmbeddingConfig, EmbeddingProviderKind, LlmConfig, ProviderKind};

pub use adapter::{Capabilities, LlmAdapter};
pub use embedding::EmbeddingBackend;
pub use error::LlmError;
pub use types::{ChatMessage, Completion, GenerateRequest, Role, Usage};

/// Construct the configured chat-completion adapter.
///
/// # Errors
///
/// Returns [`LlmError::MissingApiKey`] when neither the config nor the
/// provider's conventional environment variable supplies a key.
pub fn build_adapter(config: &LlmConfig) -> Result<Arc<dyn LlmAdapter>, LlmError> {
    let api_key = config
        .resolve_api_key()
        .ok_or_else(|| LlmError::MissingApiKey(config.provider.to_string()))?;

    let adapter: Arc<dyn LlmAdapter> = match config.provider {
        ProviderKind::Anthropic => Arc::new(anthropic::AnthropicAdapter::new(
            api_key,
            config.model.clone(),
            config.base_url.clone(),
            config.max_output_tokens,
            std::time::Duration::from_secs(config.timeout_seconds),
        )),
        ProviderKind::OpenAi => Arc::new(openai::OpenAiAdapter::new(
            api_key,
            config.model.clone(),
            config.base_url.clone(),
            config.max_output_tokens,
            std::time::Duration::from_secs(config.timeout_seconds),
        )),
        ProviderKind::Gemini => Arc::new(gemini::GeminiAdapter::new(
            api_key,
            config.model.clone(),
            config.base_url.clone(),
            config.max_output_tokens,
            std::time::Duration::from_secs(config.timeout_seconds),
        )),
    };
    Ok(adapter)
}

/// Construct the configured embedding backend, or `None` when embeddings
/// are disabled (the semantic cache then misses on every lookup).
///
/// # Errors
///
/// Returns [`LlmError::MissingApiKey`] when an enabled backend has no key.
pub fn build_embedder(
    config: &EmbeddingConfig,
) -> Result<Option<Arc<dyn EmbeddingBackend>>, LlmError> {
    let backend: Arc<dyn EmbeddingBackend> = match config.provider {
        EmbeddingProviderKind::Disabled => return Ok(None),
        EmbeddingProviderKind::OpenAi => {
            let api_key = config
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .ok_or_else(|| LlmError::MissingApiKey("openai".to_string()))?;
            Arc::new(embedding::OpenAiEmbedder::new(
                api_key,
                config.model.clone(),
                config.base_url.clone(),
                std::time::Duration::from_secs(config.timeout_seconds),
            ))
        }
        EmbeddingProviderKind::Gemini => {
            let api_key = config
                .api_key
                .clone()
                .or_else(|| std::env::var("GEMINI_API_KEY").ok())
                .ok_or_else(|| LlmError::MissingApiKey("gemini".to_string()))?;
            Arc::new(embedding::GeminiEmbedder::new(
                api_key,
                config.model.clone(),
                config.base_url.clone(),
                std::time::Duration::from_secs(config.timeout_seconds),
            ))
        }
    };
    Ok(Some(backend))
}
