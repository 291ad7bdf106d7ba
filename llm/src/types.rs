//! Request and response types shared by every provider adapter.

use serde::{Deserialize, Serialize};

/// Message role in a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User turn.
    User,
    /// Assistant turn.
    Assistant,
}

/// One conversation turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who is speaking.
    pub role: Role,
    /// Plain-text content.
    pub content: String,
}

impl ChatMessage {
    /// A user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A generation request, provider-agnostic.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerateRequest {
    /// Conversation turns, oldest first.
    pub messages: Vec<ChatMessage>,
    /// System prompt, if any.
    pub system: Option<String>,
    /// Hint that the system prompt is stable and worth provider-side
    /// caching. Adapters without prompt-cache support ignore it.
    pub cache_system: bool,
    /// Override of the adapter's default output token limit.
    pub max_tokens: Option<u32>,
}

impl GenerateRequest {
    /// A single-turn request with an optional system prompt.
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>, system: Option<String>) -> Self {
        Self {
            messages,
            system,
            cache_system: false,
            max_tokens: None,
        }
    }

    /// Mark the system prompt as cacheable.
    #[must_use]
    pub const fn with_cache_hint(mut self) -> Self {
        self.cache_system = true;
        self
    }

    /// Override the output token limit.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Drop the oldest turns until the estimated prompt size fits the
    /// budget. The most recent turn is always kept.
    ///
    /// Token counts are estimated at four characters per token; the
    /// estimate only has to be conservative enough to stay under the
    /// provider's context window together with `reserve_tokens`.
    pub fn truncate_to_budget(&mut self, max_context_tokens: u32, reserve_tokens: u32) {
        let budget = max_context_tokens.saturating_sub(reserve_tokens) as usize;
        let system_tokens = self.system.as_deref().map_or(0, estimate_tokens);

        while self.messages.len() > 1 {
            let total: usize = system_tokens
                + self
                    .messages
                    .iter()
                    .map(|m| estimate_tokens(&m.content))
                    .sum::<usize>();
            if total <= budget {
                break;
            }
            self.messages.remove(0);
        }
    }
}

/// Rough token estimate: four characters per token.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Token accounting reported by the provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens consumed.
    pub input_tokens: u32,
    /// Completion tokens produced.
    pub output_tokens: u32,
}

/// A completed generation.
#[derive(Clone, Debug, PartialEq)]
pub struct Completion {
    /// The generated text.
    pub content: String,
    /// Token accounting.
    pub usage: Usage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn truncation_drops_oldest_first() {
        let mut request = GenerateRequest::new(
            vec![
                ChatMessage::user("a".repeat(400)),
                ChatMessage::assistant("b".repeat(400)),
                ChatMessage::user("c".repeat(400)),
            ],
            None,
        );
        // Budget of 250 tokens fits two 100-token turns, not three.
        request.truncate_to_budget(250, 0);
        assert_eq!(request.messages.len(), 2);
        assert!(request.messages[0].content.starts_with('b'));
    }

    #[test]
    fn truncation_keeps_last_turn() {
        let mut request = GenerateRequest::new(vec![ChatMessage::user("x".repeat(4000))], None);
        request.truncate_to_budget(10, 0);
        assert_eq!(request.messages.len(), 1);
    }

    #[test]
    fn truncation_accounts_for_system_prompt() {
        let mut request = GenerateRequest::new(
            vec![
                ChatMessage::user("a".repeat(400)),
                ChatMessage::user("b".repeat(400)),
            ],
            Some("s".repeat(400)),
        );
        // 300 tokens total: system (100) + one turn (100) fits, two turns do not.
        request.truncate_to_budget(250, 0);
        assert_eq!(request.messages.len(), 1);
    }
}
