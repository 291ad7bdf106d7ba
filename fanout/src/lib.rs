//! # Thoughtflow Fan-Out
//!
//! Redis pub/sub implementation of the progress bus.
//!
//! One logical channel per user (`<prefix>:<user_id>`), envelope JSON as
//! the payload: the same encoding as the broker, no schema translation.
//! Delivery is best-effort with no replay: publishes while nobody is
//! subscribed are dropped by Redis itself. Because the bus is
//! process-external, any number of gateway instances can subscribe to the
//! same user's channel and serve different HTTP clients.
//!
//! Dropping a subscription stream tears down its dedicated pub/sub
//! connection, which releases the server-side subscription within the
//! connection's keepalive window.

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use thoughtflow_core::bus::{BusError, ProgressBus, ProgressStream};
use thoughtflow_core::config::FanoutConfig;
use thoughtflow_core::envelope::EventEnvelope;
use thoughtflow_core::thought::UserId;

/// Redis-backed progress bus.
///
/// Publishing shares one managed connection (auto-reconnecting); each
/// subscription gets its own pub/sub connection owned by a forwarding task.
pub struct RedisProgressBus {
    client: redis::Client,
    manager: ConnectionManager,
    channel_prefix: String,
}

impl RedisProgressBus {
    /// Connect to the bus.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] when the URL is invalid or
    /// the server is unreachable.
    pub async fn connect(config: &FanoutConfig) -> Result<Self, BusError> {
        let client = redis::Client::open(config.bus_url.as_str())
            .map_err(|e| BusError::ConnectionFailed(e.to_string()))?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BusError::ConnectionFailed(e.to_string()))?;

        tracing::info!(
            bus_url = %config.bus_url,
            channel_prefix = %config.channel_prefix,
            "progress bus connected"
        );

        Ok(Self {
            client,
            manager,
            channel_prefix: config.channel_prefix.clone(),
        })
    }

    fn channel_for(&self, user_id: &UserId) -> String {
        channel_name(&self.channel_prefix, user_id)
    }
}

/// Channel for one user's progress events: `<prefix>:<user_id>`.
#[must_use]
pub fn channel_name(prefix: &str, user_id: &UserId) -> String {
    format!("{}:{}", prefix, user_id.as_str())
}

#[async_trait]
impl ProgressBus for RedisProgressBus {
    async fn publish(&self, user_id: &UserId, envelope: &EventEnvelope) -> Result<(), BusError> {
        let channel = self.channel_for(user_id);
        let payload = envelope.encode().map_err(|e| BusError::PublishFailed {
            user_id: user_id.as_str().to_string(),
            reason: e.to_string(),
        })?;

        let mut conn = self.manager.clone();
        // The reply is the subscriber count; zero listeners is fine,
        // the event is simply dropped.
        let receivers: i64 =
            conn.publish(&channel, payload)
                .await
                .map_err(|e| BusError::PublishFailed {
                    user_id: user_id.as_str().to_string(),
                    reason: e.to_string(),
                })?;

        metrics::counter!("fanout.published").increment(1);
        tracing::trace!(
            channel = %channel,
            event_type = envelope.payload.event_type(),
            receivers,
            "progress event published"
        );
        Ok(())
    }

    async fn subscribe(&self, user_id: &UserId) -> Result<ProgressStream, BusError> {
        let channel = self.channel_for(user_id);
        let mut pubsub =
            self.client
                .get_async_pubsub()
                .await
                .map_err(|e| BusError::SubscriptionFailed {
                    user_id: user_id.as_str().to_string(),
                    reason: e.to_string(),
                })?;
        pubsub
            .subscribe(&channel)
            .await
            .map_err(|e| BusError::SubscriptionFailed {
                user_id: user_id.as_str().to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(channel = %channel, "progress subscription established");
        metrics::gauge!("fanout.subscriptions").increment(1.0);

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<EventEnvelope, BusError>>(64);

        // The task owns the pub/sub connection. When the receiver side is
        // dropped (SSE client gone), the send fails, the task exits, and
        // dropping the connection releases the subscription.
        tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(message) = messages.next().await {
                let decoded = message
                    .get_payload::<Vec<u8>>()
                    .map_err(|e| BusError::Decode(e.to_string()))
                    .and_then(|bytes| {
                        EventEnvelope::decode(&bytes).map_err(|e| BusError::Decode(e.to_string()))
                    });
                if tx.send(decoded).await.is_err() {
                    break;
                }
            }
            metrics::gauge!("fanout.subscriptions").decrement(1.0);
            tracing::debug!("progress subscription released");
        });

        let stream = async_stream::stream! {
            let mut rx = rx;
            while let Some(result) = rx.recv().await {
                yield result;
            }
        };

        Ok(Box::pin(stream) as ProgressStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_naming() {
        assert_eq!(
            channel_name("updates", &UserId::new("u-42")),
            "updates:u-42"
        );
    }
}
