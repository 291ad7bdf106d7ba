//! The uniform adapter trait every provider implements.

use crate::error::LlmError;
use crate::types::{Completion, GenerateRequest};
use async_trait::async_trait;

/// What a provider can do, queried once at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether the provider honours system-prompt cache hints.
    pub supports_prompt_cache: bool,
    /// Context window in tokens. Callers must keep prompts under this,
    /// truncating the oldest prior context first.
    pub max_context_tokens: u32,
}

/// A chat-completion provider.
///
/// Implementations must be cheap to clone behind an `Arc` and hold a pooled
/// HTTP client reused across workers.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Run one generation.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] mapped onto the stage failure taxonomy via
    /// [`LlmError::classify`].
    async fn generate(&self, request: GenerateRequest) -> Result<Completion, LlmError>;

    /// The provider's capability set.
    fn capabilities(&self) -> Capabilities;
}
