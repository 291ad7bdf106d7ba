//! Scripted LLM adapter and deterministic embedder.

use crate::fixtures;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use thoughtflow_llm::adapter::{Capabilities, LlmAdapter};
use thoughtflow_llm::embedding::EmbeddingBackend;
use thoughtflow_llm::error::LlmError;
use thoughtflow_llm::types::{Completion, GenerateRequest, Usage};

/// An adapter that replays a script, optionally falling back to valid
/// canned stage outputs.
///
/// In `auto` mode the adapter sniffs the stage from the system prompt and
/// returns a fixture reply, so a full five-stage run needs no scripting.
/// Queued responses (text or errors) are always consumed first, which makes
/// failure-injection scenarios one-liners.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    auto: bool,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    /// Strictly scripted: an exhausted script is a parse error.
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            auto: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Script first, then canned valid outputs per stage.
    #[must_use]
    pub fn auto() -> Self {
        Self {
            auto: true,
            ..Self::new()
        }
    }

    /// Queue a raw reply text.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[allow(clippy::unwrap_used)]
    pub fn push_text(&self, text: impl Into<String>) {
        self.script.lock().unwrap().push_back(Ok(text.into()));
    }

    /// Queue an error.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[allow(clippy::unwrap_used)]
    pub fn push_error(&self, error: LlmError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    /// How many generate calls have been made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn canned_reply(system: &str) -> Option<String> {
        if system.starts_with("You classify") {
            Some(fixtures::classification_reply())
        } else if system.starts_with("You analyze") {
            Some(fixtures::analysis_reply())
        } else if system.starts_with("You score the impact") {
            Some(fixtures::value_impact_reply())
        } else if system.starts_with("You turn an analyzed thought") {
            Some(fixtures::action_plan_reply())
        } else if system.starts_with("You are the final prioritization") {
            Some(fixtures::priority_reply())
        } else {
            None
        }
    }
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmAdapter for ScriptedLlm {
    async fn generate(&self, request: GenerateRequest) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let scripted = self
            .script
            .lock()
            .map_err(|_| LlmError::Network("script lock poisoned".to_string()))?
            .pop_front();

        let content = match scripted {
            Some(Ok(text)) => text,
            Some(Err(error)) => return Err(error),
            None if self.auto => {
                let system = request.system.as_deref().unwrap_or_default();
                Self::canned_reply(system)
                    .ok_or_else(|| LlmError::Parse("unrecognized stage prompt".to_string()))?
            }
            None => return Err(LlmError::Parse("script exhausted".to_string())),
        };

        Ok(Completion {
            content,
            usage: Usage {
                input_tokens: 100,
                output_tokens: 50,
            },
        })
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_prompt_cache: false,
            max_context_tokens: 100_000,
        }
    }
}

/// Deterministic embedding backend: identical text always embeds to the
/// identical vector, so exact resubmissions hit the cache at similarity 1.
pub struct MockEmbedder {
    dimension: usize,
    fail: Mutex<bool>,
}

impl MockEmbedder {
    /// Create an embedder producing vectors of the given dimension.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail: Mutex::new(false),
        }
    }

    /// Make every subsequent embed call fail.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[allow(clippy::unwrap_used)]
    pub fn fail_embeddings(&self) {
        *self.fail.lock().unwrap() = true;
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        if *self
            .fail
            .lock()
            .map_err(|_| LlmError::Network("embedder lock poisoned".to_string()))?
        {
            return Err(LlmError::Timeout("injected embedding failure".to_string()));
        }

        // Simple seeded LCG over the text bytes: stable, spread out, and
        // different texts land far apart in cosine terms.
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        for byte in text.bytes() {
            state = state.wrapping_mul(31).wrapping_add(u64::from(byte));
        }
        let mut vector = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            #[allow(clippy::cast_precision_loss)]
            let value = ((state >> 33) as f32 / (u32::MAX >> 1) as f32).mul_add(2.0, -1.0);
            vector.push(value);
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use thoughtflow_core::cache::cosine_similarity;
    use thoughtflow_llm::types::ChatMessage;

    #[tokio::test]
    async fn identical_text_embeds_identically() {
        let embedder = MockEmbedder::new(8);
        let a = embedder.embed("Should I learn Rust?").await.unwrap();
        let b = embedder.embed("Should I learn Rust?").await.unwrap();
        assert_eq!(a, b);
        assert!((cosine_similarity(&a, &b).unwrap() - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn different_text_embeds_differently() {
        let embedder = MockEmbedder::new(8);
        let a = embedder.embed("Should I learn Rust?").await.unwrap();
        let b = embedder.embed("What should I cook tonight?").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn scripted_errors_come_first() {
        let llm = ScriptedLlm::auto();
        llm.push_error(LlmError::RateLimited);

        let request = GenerateRequest::new(
            vec![ChatMessage::user("x")],
            Some("You classify a user's short thought.".to_string()),
        );
        assert!(matches!(
            llm.generate(request.clone()).await,
            Err(LlmError::RateLimited)
        ));
        // Script drained; auto fallback kicks in.
        assert!(llm.generate(request).await.is_ok());
        assert_eq!(llm.call_count(), 2);
    }
}
