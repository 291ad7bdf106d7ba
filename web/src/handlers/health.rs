//! Liveness endpoint.

use axum::Json;
use serde::Serialize;

/// Health response body.
#[derive(Serialize)]
pub struct Health {
    status: &'static str,
}

/// `GET /health`.
pub async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}
