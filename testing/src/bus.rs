//! In-memory progress bus with a per-user publish log.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use thoughtflow_core::bus::{BusError, ProgressBus, ProgressStream};
use thoughtflow_core::envelope::EventEnvelope;
use thoughtflow_core::thought::UserId;
use tokio::sync::broadcast;

/// Broadcast-channel bus preserving per-user publish order.
///
/// Every publish is also appended to a per-user log so tests can assert on
/// the exact envelope sequence without racing a subscriber task.
pub struct InMemoryProgressBus {
    channels: Mutex<HashMap<String, broadcast::Sender<EventEnvelope>>>,
    log: Mutex<HashMap<String, Vec<EventEnvelope>>>,
}

impl InMemoryProgressBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            log: Mutex::new(HashMap::new()),
        }
    }

    /// All envelopes ever published for a user, in publish order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn published(&self, user_id: &UserId) -> Vec<EventEnvelope> {
        self.log
            .lock()
            .unwrap()
            .get(user_id.as_str())
            .cloned()
            .unwrap_or_default()
    }

    /// Just the `event_type` strings for a user, in publish order.
    #[must_use]
    pub fn event_types(&self, user_id: &UserId) -> Vec<&'static str> {
        self.published(user_id)
            .iter()
            .map(|e| e.payload.event_type())
            .collect()
    }

    fn sender_for(&self, user_id: &UserId) -> Result<broadcast::Sender<EventEnvelope>, BusError> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| BusError::ConnectionFailed("bus lock poisoned".to_string()))?;
        Ok(channels
            .entry(user_id.as_str().to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone())
    }
}

impl Default for InMemoryProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressBus for InMemoryProgressBus {
    async fn publish(&self, user_id: &UserId, envelope: &EventEnvelope) -> Result<(), BusError> {
        self.log
            .lock()
            .map_err(|_| BusError::ConnectionFailed("bus lock poisoned".to_string()))?
            .entry(user_id.as_str().to_string())
            .or_default()
            .push(envelope.clone());

        // No subscriber is fine: best-effort drop, like the real bus.
        let _ = self.sender_for(user_id)?.send(envelope.clone());
        Ok(())
    }

    async fn subscribe(&self, user_id: &UserId) -> Result<ProgressStream, BusError> {
        let mut receiver = self.sender_for(user_id)?.subscribe();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(envelope) => yield Ok(envelope),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        yield Err(BusError::Decode(format!("subscriber lagged by {skipped}")));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(Box::pin(stream) as ProgressStream)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::StreamExt;
    use thoughtflow_core::envelope::EventPayload;
    use thoughtflow_core::thought::ThoughtId;

    fn envelope(user: &UserId) -> EventEnvelope {
        EventEnvelope::new(
            ThoughtId::new(),
            user.clone(),
            Utc::now(),
            EventPayload::ThoughtProcessing,
        )
    }

    #[tokio::test]
    async fn log_preserves_publish_order() {
        let bus = InMemoryProgressBus::new();
        let user = UserId::new("u1");
        for _ in 0..3 {
            bus.publish(&user, &envelope(&user)).await.unwrap();
        }
        assert_eq!(bus.published(&user).len(), 3);
        assert_eq!(
            bus.event_types(&user),
            vec![
                "thought_processing",
                "thought_processing",
                "thought_processing"
            ]
        );
    }

    #[tokio::test]
    async fn live_subscription_receives_events() {
        let bus = InMemoryProgressBus::new();
        let user = UserId::new("u2");
        let mut stream = bus.subscribe(&user).await.unwrap();

        let sent = envelope(&user);
        bus.publish(&user, &sent).await.unwrap();

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn users_do_not_cross_talk() {
        let bus = InMemoryProgressBus::new();
        let u1 = UserId::new("u1");
        let u2 = UserId::new("u2");
        bus.publish(&u1, &envelope(&u1)).await.unwrap();
        assert!(bus.published(&u2).is_empty());
    }
}
