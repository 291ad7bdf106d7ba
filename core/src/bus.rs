//! The progress fan-out seam.
//!
//! One logical channel per user (`updates:<user_id>` on the production bus).
//! Delivery is best-effort with no replay: events published while nobody is
//! subscribed are dropped. Within a single orchestrator run, events arrive
//! in the order they were published.

use crate::envelope::EventEnvelope;
use crate::thought::UserId;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;

/// Fan-out failures.
#[derive(Debug, Error, Clone)]
pub enum BusError {
    /// Could not reach the bus.
    #[error("bus connection failed: {0}")]
    ConnectionFailed(String),
    /// Publishing to a channel failed.
    #[error("publish failed for user '{user_id}': {reason}")]
    PublishFailed {
        /// Target user channel.
        user_id: String,
        /// Failure detail.
        reason: String,
    },
    /// Subscribing to a channel failed.
    #[error("subscription failed for user '{user_id}': {reason}")]
    SubscriptionFailed {
        /// Target user channel.
        user_id: String,
        /// Failure detail.
        reason: String,
    },
    /// A received message was not a valid envelope.
    #[error("bus message decode failed: {0}")]
    Decode(String),
}

/// Stream of progress envelopes for one user.
///
/// Dropping the stream releases the underlying pub/sub resources within a
/// small bounded time.
pub type ProgressStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope, BusError>> + Send>>;

/// Publish/subscribe access to per-user progress channels.
///
/// Implementations: Redis pub/sub in `thoughtflow-fanout`, in-memory in
/// `thoughtflow-testing`.
#[async_trait]
pub trait ProgressBus: Send + Sync {
    /// Publish an envelope to the user's channel. Best-effort: succeeding
    /// says nothing about whether anyone was listening.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] when the bus rejects the message.
    async fn publish(&self, user_id: &UserId, envelope: &EventEnvelope) -> Result<(), BusError>;

    /// Subscribe to the user's channel.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] when the subscription cannot
    /// be established.
    async fn subscribe(&self, user_id: &UserId) -> Result<ProgressStream, BusError>;
}
