//! Provider adapter tests against a mocked HTTP server.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use std::time::Duration;
use thoughtflow_llm::anthropic::AnthropicAdapter;
use thoughtflow_llm::embedding::{EmbeddingBackend, OpenAiEmbedder};
use thoughtflow_llm::gemini::GeminiAdapter;
use thoughtflow_llm::openai::OpenAiAdapter;
use thoughtflow_llm::{ChatMessage, GenerateRequest, LlmAdapter, LlmError};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request() -> GenerateRequest {
    GenerateRequest::new(
        vec![ChatMessage::user("Should I learn Rust?")],
        Some("You are a classifier.".to_string()),
    )
}

#[tokio::test]
async fn anthropic_parses_content_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [{ "type": "text", "text": "{\"ok\":true}" }],
            "usage": { "input_tokens": 42, "output_tokens": 7 },
        })))
        .mount(&server)
        .await;

    let adapter = AnthropicAdapter::new(
        "test-key".to_string(),
        "claude-sonnet-4-5-20250929".to_string(),
        Some(server.uri()),
        512,
        Duration::from_secs(5),
    );

    let completion = adapter.generate(request()).await.unwrap();
    assert_eq!(completion.content, "{\"ok\":true}");
    assert_eq!(completion.usage.input_tokens, 42);
    assert_eq!(completion.usage.output_tokens, 7);
}

#[tokio::test]
async fn anthropic_maps_429_to_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let adapter = AnthropicAdapter::new(
        "test-key".to_string(),
        "claude-sonnet-4-5-20250929".to_string(),
        Some(server.uri()),
        512,
        Duration::from_secs(5),
    );

    let err = adapter.generate(request()).await.unwrap_err();
    assert!(matches!(err, LlmError::RateLimited));
}

#[tokio::test]
async fn anthropic_maps_401_to_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let adapter = AnthropicAdapter::new(
        "bad-key".to_string(),
        "claude-sonnet-4-5-20250929".to_string(),
        Some(server.uri()),
        512,
        Duration::from_secs(5),
    );

    let err = adapter.generate(request()).await.unwrap_err();
    assert!(matches!(err, LlmError::Unauthorized));
}

#[tokio::test]
async fn openai_parses_chat_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "hello" } }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 3 },
        })))
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::new(
        "sk-test".to_string(),
        "gpt-4o-mini".to_string(),
        Some(server.uri()),
        256,
        Duration::from_secs(5),
    );

    let completion = adapter.generate(request()).await.unwrap();
    assert_eq!(completion.content, "hello");
    assert_eq!(completion.usage.input_tokens, 10);
}

#[tokio::test]
async fn openai_missing_content_is_a_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [],
        })))
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::new(
        "sk-test".to_string(),
        "gpt-4o-mini".to_string(),
        Some(server.uri()),
        256,
        Duration::from_secs(5),
    );

    let err = adapter.generate(request()).await.unwrap_err();
    assert!(matches!(err, LlmError::Parse(_)));
}

#[tokio::test]
async fn gemini_parses_candidates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "hi from gemini" }] },
                "finishReason": "STOP",
            }],
            "usageMetadata": { "promptTokenCount": 5, "candidatesTokenCount": 4 },
        })))
        .mount(&server)
        .await;

    let adapter = GeminiAdapter::new(
        "key".to_string(),
        "gemini-2.0-flash".to_string(),
        Some(server.uri()),
        256,
        Duration::from_secs(5),
    );

    let completion = adapter.generate(request()).await.unwrap();
    assert_eq!(completion.content, "hi from gemini");
    assert_eq!(completion.usage.output_tokens, 4);
}

#[tokio::test]
async fn gemini_safety_block_is_content_policy() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{ "finishReason": "SAFETY" }],
        })))
        .mount(&server)
        .await;

    let adapter = GeminiAdapter::new(
        "key".to_string(),
        "gemini-2.0-flash".to_string(),
        Some(server.uri()),
        256,
        Duration::from_secs(5),
    );

    let err = adapter.generate(request()).await.unwrap_err();
    assert!(matches!(err, LlmError::ContentPolicy(_)));
}

#[tokio::test]
async fn openai_embedder_parses_vector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "embedding": [0.25, -0.5, 0.75] }],
        })))
        .mount(&server)
        .await;

    let embedder = OpenAiEmbedder::new(
        "sk-test".to_string(),
        "text-embedding-3-small".to_string(),
        Some(server.uri()),
        Duration::from_secs(5),
    );

    let vector = embedder.embed("Should I learn Rust?").await.unwrap();
    assert_eq!(vector, vec![0.25, -0.5, 0.75]);
}
