//! Gateway integration tests against in-memory fakes.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use std::sync::Arc;
use thoughtflow_core::clock::Clock;
use thoughtflow_core::config::FanoutConfig;
use thoughtflow_core::thought::MAX_TEXT_CHARS;
use thoughtflow_testing::clock::test_clock;
use thoughtflow_testing::{InMemoryProgressBus, InMemoryThoughtStore, RecordingProducer};
use thoughtflow_web::AppState;

fn state_with(producer: RecordingProducer, max_connections: usize) -> (AppState, Arc<RecordingProducer>) {
    let clock = Arc::new(test_clock());
    let store = Arc::new(InMemoryThoughtStore::new(
        Arc::clone(&clock) as Arc<dyn Clock>
    ));
    let producer = Arc::new(producer);
    let bus = Arc::new(InMemoryProgressBus::new());
    let fanout = FanoutConfig {
        max_connections_per_instance: max_connections,
        ..FanoutConfig::default()
    };
    let state = AppState::new(
        store,
        Arc::clone(&producer) as _,
        bus,
        clock as _,
        fanout,
    );
    (state, producer)
}

#[tokio::test]
async fn submit_returns_stream_mode_and_publishes() {
    let (state, producer) = state_with(RecordingProducer::new(), 10);
    let server = axum_test::TestServer::new(thoughtflow_web::router(state)).unwrap();

    let response = server
        .post("/api/thoughts")
        .json(&serde_json::json!({ "user_id": "u1", "text": "Should I learn Rust?" }))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["accepted"], true);
    assert_eq!(body["mode"], "stream");
    assert!(body["thought_id"].is_string());

    let submitted = producer.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].user_id.as_str(), "u1");
}

#[tokio::test]
async fn submit_deferred_when_producer_disabled() {
    let (state, producer) = state_with(RecordingProducer::deferred(), 10);
    let server = axum_test::TestServer::new(thoughtflow_web::router(state)).unwrap();

    let response = server
        .post("/api/thoughts")
        .json(&serde_json::json!({ "user_id": "u1", "text": "deferred please" }))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["mode"], "deferred");
    assert_eq!(body["accepted"], true);
    // Deferred mode records the submission attempt without publishing
    // anything that the consumer would see; the sweeper owns it now.
    assert_eq!(producer.submitted().len(), 1);
}

#[tokio::test]
async fn submit_rejects_empty_and_oversized_text() {
    let (state, _) = state_with(RecordingProducer::new(), 10);
    let server = axum_test::TestServer::new(thoughtflow_web::router(state)).unwrap();

    let empty = server
        .post("/api/thoughts")
        .json(&serde_json::json!({ "user_id": "u1", "text": "" }))
        .await;
    empty.assert_status_bad_request();

    let oversized = server
        .post("/api/thoughts")
        .json(&serde_json::json!({
            "user_id": "u1",
            "text": "x".repeat(MAX_TEXT_CHARS + 1),
        }))
        .await;
    oversized.assert_status_bad_request();
}

#[tokio::test]
async fn submit_fails_closed_when_broker_down() {
    let producer = RecordingProducer::new();
    producer.fail_submissions();
    let (state, _) = state_with(producer, 10);
    let server = axum_test::TestServer::new(thoughtflow_web::router(state)).unwrap();

    let response = server
        .post("/api/thoughts")
        .json(&serde_json::json!({ "user_id": "u1", "text": "no broker" }))
        .await;
    response.assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn stream_rejected_at_capacity() {
    let (state, _) = state_with(RecordingProducer::new(), 1);
    let limiter = Arc::clone(&state.limiter);
    let server = axum_test::TestServer::new(thoughtflow_web::router(state)).unwrap();

    // Hold the only slot.
    let _permit = limiter.try_acquire().unwrap();

    let response = server.get("/api/users/u1/stream").await;
    response.assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn health_is_ok() {
    let (state, _) = state_with(RecordingProducer::new(), 10);
    let server = axum_test::TestServer::new(thoughtflow_web::router(state)).unwrap();

    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
}
