//! Work-order producer.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use thoughtflow_core::broker::{ProducerError, SubmitMode, ThoughtProducer};
use thoughtflow_core::config::BrokerConfig;
use thoughtflow_core::envelope::EventEnvelope;
use thoughtflow_core::retry::{RetryPolicy, retry_with_predicate};

/// Kafka producer for `thought_created` work orders.
///
/// Events are keyed by `user_id` so every event for a given user lands on
/// the same partition; the producer waits for all-replica acknowledgement
/// before reporting success. When disabled via configuration it degrades
/// gracefully: submissions succeed without publishing and the thought stays
/// `pending` for the recovery sweeper.
pub struct KafkaThoughtProducer {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
    retry: RetryPolicy,
    enabled: bool,
}

impl KafkaThoughtProducer {
    /// Build a producer from broker configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ProducerError::Fatal`] when the underlying client cannot
    /// be constructed (bad bootstrap servers, invalid settings).
    pub fn from_config(config: &BrokerConfig) -> Result<Self, ProducerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("acks", "all")
            .set("message.timeout.ms", "10000")
            .set("linger.ms", config.linger_ms.to_string())
            .create()
            .map_err(|e| ProducerError::Fatal(format!("failed to create producer: {e}")))?;

        tracing::info!(
            bootstrap_servers = %config.bootstrap_servers,
            topic = %config.work_topic,
            enabled = config.enabled,
            "work-order producer created"
        );

        Ok(Self {
            producer,
            topic: config.work_topic.clone(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                initial_delay: config.retry_backoff(),
                max_delay: Duration::from_secs(10),
                multiplier: 2.0,
                jitter: 0.25,
            },
            enabled: config.enabled,
        })
    }
}

/// Whether a Kafka error is worth retrying: connection-level failures,
/// timeouts, and leadership churn. Everything else is fatal to the caller.
fn is_transient(err: &KafkaError) -> bool {
    matches!(
        err.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::OperationTimedOut
                | RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::MessageTimedOut
                | RDKafkaErrorCode::LeaderNotAvailable
                | RDKafkaErrorCode::NotLeaderForPartition
                | RDKafkaErrorCode::NetworkException
                | RDKafkaErrorCode::QueueFull
        )
    )
}

#[async_trait]
impl ThoughtProducer for KafkaThoughtProducer {
    async fn submit(&self, envelope: &EventEnvelope) -> Result<SubmitMode, ProducerError> {
        if !self.enabled {
            tracing::warn!(
                thought_id = %envelope.thought_id,
                "producer disabled, deferring to the recovery sweeper"
            );
            metrics::counter!("broker.producer.deferred").increment(1);
            return Ok(SubmitMode::Deferred);
        }

        let payload = envelope
            .encode()
            .map_err(|e| ProducerError::Encode(e.to_string()))?;
        let key = envelope.user_id.as_str().to_string();

        let delivery = retry_with_predicate(
            &self.retry,
            || {
                let producer = self.producer.clone();
                let topic = self.topic.clone();
                let payload = payload.clone();
                let key = key.clone();
                let timeout = self.timeout;
                async move {
                    let record = FutureRecord::to(&topic).payload(&payload).key(&key);
                    producer
                        .send(record, Timeout::After(timeout))
                        .await
                        .map_err(|(err, _)| err)
                }
            },
            is_transient,
        )
        .await;

        match delivery {
            Ok((partition, offset)) => {
                tracing::debug!(
                    thought_id = %envelope.thought_id,
                    user_id = %envelope.user_id,
                    partition,
                    offset,
                    "work order published"
                );
                metrics::counter!("broker.producer.published").increment(1);
                Ok(SubmitMode::Streamed)
            }
            Err(err) if is_transient(&err) => {
                tracing::error!(
                    thought_id = %envelope.thought_id,
                    error = %err,
                    "broker unavailable after retries"
                );
                metrics::counter!("broker.producer.exhausted").increment(1);
                Err(ProducerError::Exhausted(err.to_string()))
            }
            Err(err) => {
                tracing::error!(
                    thought_id = %envelope.thought_id,
                    error = %err,
                    "broker rejected the work order"
                );
                Err(ProducerError::Fatal(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_codes() {
        let err = KafkaError::MessageProduction(RDKafkaErrorCode::LeaderNotAvailable);
        assert!(is_transient(&err));

        let err = KafkaError::MessageProduction(RDKafkaErrorCode::OperationTimedOut);
        assert!(is_transient(&err));

        let err = KafkaError::MessageProduction(RDKafkaErrorCode::InvalidMessageSize);
        assert!(!is_transient(&err));
    }
}
