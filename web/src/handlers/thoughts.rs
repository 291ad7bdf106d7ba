//! Thought ingest.

use crate::error::AppError;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use thoughtflow_core::broker::{ProducerError, SubmitMode};
use thoughtflow_core::envelope::{EventEnvelope, EventPayload};
use thoughtflow_core::thought::{NewThought, ThoughtId, UserId, validate_text};

/// Ingest request body.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    /// Owning user.
    pub user_id: String,
    /// The thought text.
    pub text: String,
    /// Optional priority hint forwarded on the work order.
    #[serde(default)]
    pub priority_hint: Option<String>,
}

/// Ingest response body.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    /// The freshly assigned thought id.
    pub thought_id: ThoughtId,
    /// Always true on a 2xx response.
    pub accepted: bool,
    /// `"stream"` when the broker took the work order, `"deferred"` when
    /// the producer is disabled and the sweeper will pick it up.
    pub mode: &'static str,
}

/// `POST /api/thoughts`.
///
/// Inserts the `pending` row first, then publishes the work order, so a
/// publish failure can never orphan an event without a row. Returns quickly
/// in all cases; progress is delivered via the SSE stream only.
///
/// # Errors
///
/// `400` for invalid text, `503` when the broker is unavailable beyond the
/// producer's retry budget, `500` for sink failures.
pub async fn submit(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, AppError> {
    if request.user_id.is_empty() {
        return Err(AppError::bad_request("user_id cannot be empty"));
    }
    validate_text(&request.text).map_err(|e| AppError::bad_request(e.to_string()))?;

    let thought_id = ThoughtId::new();
    let user_id = UserId::new(request.user_id);

    state
        .store
        .insert_pending(NewThought {
            id: thought_id,
            user_id: user_id.clone(),
            text: request.text.clone(),
        })
        .await
        .map_err(|e| AppError::internal(format!("ingest insert failed: {e}")))?;

    let envelope = EventEnvelope::new(
        thought_id,
        user_id.clone(),
        state.clock.now(),
        EventPayload::ThoughtCreated {
            text: request.text,
            priority_hint: request.priority_hint,
        },
    );

    let mode = match state.producer.submit(&envelope).await {
        Ok(mode) => mode,
        Err(err @ (ProducerError::Exhausted(_) | ProducerError::Fatal(_))) => {
            // The row stays pending; the caller decides whether to retry.
            tracing::error!(%thought_id, error = %err, "work order publish failed");
            return Err(AppError::unavailable("broker unavailable, try again"));
        }
        Err(err) => {
            return Err(AppError::internal(format!("submit failed: {err}")));
        }
    };

    if mode == SubmitMode::Deferred {
        tracing::info!(%thought_id, user_id = %user_id, "thought accepted in deferred mode");
    }
    metrics::counter!("gateway.thoughts_submitted", "mode" => mode.as_str()).increment(1);

    Ok(Json(SubmitResponse {
        thought_id,
        accepted: true,
        mode: mode.as_str(),
    }))
}
