//! SSE progress streaming.

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use std::convert::Infallible;
use thoughtflow_core::thought::UserId;

/// `GET /api/users/{user_id}/stream`.
///
/// Wraps a fan-out subscription in a long-lived SSE response. Heartbeat
/// frames keep intermediaries from closing the connection; the client
/// disconnecting drops the stream, which releases both the connection
/// permit and the underlying pub/sub subscription.
///
/// # Errors
///
/// `503` when this instance's subscription cap is reached or the bus is
/// unreachable.
pub async fn subscribe(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if user_id.is_empty() {
        return Err(AppError::bad_request("user_id cannot be empty"));
    }

    let Some(permit) = state.limiter.try_acquire() else {
        return Err(AppError::at_capacity());
    };

    let user_id = UserId::new(user_id);
    let mut subscription = state
        .bus
        .subscribe(&user_id)
        .await
        .map_err(|e| AppError::unavailable(format!("subscription failed: {e}")))?;

    tracing::debug!(user_id = %user_id, "sse stream opened");

    let stream = async_stream::stream! {
        // The permit lives exactly as long as the stream.
        let _permit = permit;
        while let Some(result) = subscription.next().await {
            match result {
                Ok(envelope) => {
                    match Event::default()
                        .event(envelope.payload.event_type())
                        .json_data(&envelope)
                    {
                        Ok(event) => yield Ok(event),
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to encode sse event");
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "progress stream error");
                    yield Ok(Event::default().event("error").data(err.to_string()));
                }
            }
        }
        tracing::debug!("sse stream closed");
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.fanout.heartbeat_interval())
            .text("heartbeat"),
    ))
}
