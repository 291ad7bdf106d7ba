//! Dead-letter topic publisher.
//!
//! Envelopes that permanently failed (unparseable bytes, unknown schema
//! versions, exhausted retry budgets, permanent pipeline failures) are
//! retained on a dedicated topic, verbatim, with an added `failure_reason`.

use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use thiserror::Error;
use thoughtflow_core::config::BrokerConfig;
use thoughtflow_core::envelope::EventEnvelope;

/// Dead-letter publishing failures.
#[derive(Debug, Error)]
pub enum DlqError {
    /// Client construction failed.
    #[error("failed to create DLQ producer: {0}")]
    Create(String),
    /// The publish itself failed.
    #[error("DLQ publish failed: {0}")]
    Publish(String),
}

/// Publisher for the dead-letter topic.
pub struct DlqPublisher {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl DlqPublisher {
    /// Build a publisher from broker configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::Create`] when the client cannot be constructed.
    pub fn from_config(config: &BrokerConfig) -> Result<Self, DlqError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("acks", "all")
            .set("message.timeout.ms", "10000")
            .create()
            .map_err(|e| DlqError::Create(e.to_string()))?;

        Ok(Self {
            producer,
            topic: config.dlq_topic.clone(),
            timeout: Duration::from_secs(10),
        })
    }

    /// Dead-letter a decoded envelope.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::Publish`] when the broker rejects the record.
    pub async fn publish(&self, envelope: &EventEnvelope, reason: &str) -> Result<(), DlqError> {
        let original =
            serde_json::to_value(envelope).map_err(|e| DlqError::Publish(e.to_string()))?;
        let record = dead_letter_record(&original, reason);
        self.publish_record(&record, Some(envelope.user_id.as_str()))
            .await
    }

    /// Dead-letter raw bytes that never decoded into an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::Publish`] when the broker rejects the record.
    pub async fn publish_raw(&self, payload: &[u8], reason: &str) -> Result<(), DlqError> {
        let original = serde_json::from_slice::<serde_json::Value>(payload)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(payload).into()));
        let record = dead_letter_record(&original, reason);
        self.publish_record(&record, None).await
    }

    async fn publish_record(
        &self,
        record: &serde_json::Value,
        key: Option<&str>,
    ) -> Result<(), DlqError> {
        let payload =
            serde_json::to_vec(record).map_err(|e| DlqError::Publish(e.to_string()))?;
        let mut future_record = FutureRecord::to(&self.topic).payload(&payload);
        if let Some(key) = key {
            future_record = future_record.key(key);
        }

        self.producer
            .send(future_record, Timeout::After(self.timeout))
            .await
            .map_err(|(err, _)| DlqError::Publish(err.to_string()))?;

        metrics::counter!("broker.dlq.added").increment(1);
        tracing::warn!(topic = %self.topic, "envelope dead-lettered");
        Ok(())
    }
}

/// The DLQ record: the original envelope object with `failure_reason`
/// spliced in. Non-object originals (corrupt payloads) are wrapped instead.
#[must_use]
pub fn dead_letter_record(original: &serde_json::Value, reason: &str) -> serde_json::Value {
    match original {
        serde_json::Value::Object(fields) => {
            let mut fields = fields.clone();
            fields.insert(
                "failure_reason".to_string(),
                serde_json::Value::String(reason.to_string()),
            );
            serde_json::Value::Object(fields)
        }
        other => serde_json::json!({
            "original": other,
            "failure_reason": reason,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn record_splices_reason_into_envelopes() {
        let original = serde_json::json!({
            "event_type": "thought_created",
            "thought_id": "t-1",
        });
        let record = dead_letter_record(&original, "permanent/unknown_user");
        assert_eq!(record["failure_reason"], "permanent/unknown_user");
        assert_eq!(record["event_type"], "thought_created");
    }

    #[test]
    fn record_wraps_non_objects() {
        let original = serde_json::Value::String("not an envelope".to_string());
        let record = dead_letter_record(&original, "decode failed");
        assert_eq!(record["original"], "not an envelope");
        assert_eq!(record["failure_reason"], "decode failed");
    }
}
