//! # Thoughtflow Web
//!
//! The HTTP gateway:
//!
//! - `POST /api/thoughts`: ingest a thought; returns the id and whether it
//!   was streamed to the broker or deferred to the sweeper
//! - `GET /api/users/{user_id}/stream`: long-lived SSE subscription to the
//!   user's progress channel, with heartbeats and a per-instance
//!   connection cap
//! - `GET /health`: liveness
//!
//! Ingest never waits on the pipeline: downstream state is communicated
//! exclusively through the fan-out stream and the persisted status.

pub mod error;
pub mod handlers;
pub mod limiter;
pub mod state;

pub use error::AppError;
pub use limiter::{ConnectionLimiter, ConnectionPermit};
pub use state::AppState;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the gateway router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/thoughts", post(handlers::thoughts::submit))
        .route("/api/users/:user_id/stream", get(handlers::stream::subscribe))
        .route("/health", get(handlers::health::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
