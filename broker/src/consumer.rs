//! Consumer-group worker loop.
//!
//! Each partition is owned by at most one consumer; messages within a
//! partition are processed strictly in order. Offsets are committed
//! manually, only after the handler (and therefore the sink) acknowledged
//! the message. A crash before commit re-drives the work and the sink's
//! idempotency absorbs the duplicate.

use crate::dlq::DlqPublisher;
use async_trait::async_trait;
use futures::StreamExt;
use rdkafka::Offset;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use thoughtflow_core::config::BrokerConfig;
use thoughtflow_core::envelope::{EventEnvelope, EventPayload};
use tokio::sync::watch;

/// What to do with a delivery after the handler ran.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Work is done (or was already done); commit the offset.
    Done,
    /// Transient failure; back off, then seek back so the broker redelivers
    /// the same message in order. The offset is not committed.
    Retry {
        /// How long to wait before the redelivery.
        backoff: Duration,
    },
    /// Permanent failure or exhausted retry budget; dead-letter the
    /// envelope and commit.
    DeadLetter {
        /// Goes into the DLQ record's `failure_reason`.
        reason: String,
    },
}

/// Processes one decoded work order.
///
/// Implemented by the worker runtime on top of the pipeline orchestrator;
/// the handler owns the retry-budget decision because it can see the stored
/// attempt counter.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    /// Handle a `thought_created` envelope.
    async fn handle(&self, envelope: &EventEnvelope) -> Disposition;
}

/// Consumer loop failures.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// Client construction failed.
    #[error("failed to create consumer: {0}")]
    Create(String),
    /// Topic subscription failed.
    #[error("failed to subscribe: {0}")]
    Subscribe(String),
}

/// The consumer-group worker.
pub struct KafkaThoughtConsumer {
    consumer: StreamConsumer,
    dlq: DlqPublisher,
    work_topic: String,
}

impl KafkaThoughtConsumer {
    /// Build and subscribe a consumer from broker configuration.
    ///
    /// The session timeout and poll interval are set well above typical
    /// pipeline latency so long LLM calls do not trigger partition
    /// rebalances mid-run.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError`] when the client cannot be created or the
    /// subscription fails.
    pub fn from_config(config: &BrokerConfig, dlq: DlqPublisher) -> Result<Self, ConsumerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "45000")
            .set("max.poll.interval.ms", "900000")
            .set("queued.min.messages", config.batch_size.to_string())
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| ConsumerError::Create(e.to_string()))?;

        consumer
            .subscribe(&[config.work_topic.as_str()])
            .map_err(|e| ConsumerError::Subscribe(e.to_string()))?;

        tracing::info!(
            topic = %config.work_topic,
            consumer_group = %config.consumer_group,
            batch_size = config.batch_size,
            manual_commit = true,
            "consumer subscribed"
        );

        Ok(Self {
            consumer,
            dlq,
            work_topic: config.work_topic.clone(),
        })
    }

    /// Run the loop until the shutdown signal flips.
    ///
    /// On shutdown the loop stops polling; in-flight work is bounded by the
    /// caller's drain deadline, and anything force-cancelled is recovered
    /// later by the sweeper.
    pub async fn run(&self, handler: Arc<dyn WorkHandler>, mut shutdown: watch::Receiver<bool>) {
        let mut stream = self.consumer.stream();

        loop {
            tokio::select! {
                message = stream.next() => {
                    match message {
                        Some(Ok(message)) => self.process(&message, handler.as_ref()).await,
                        Some(Err(err)) => {
                            tracing::error!(error = %err, "consumer poll error");
                            metrics::counter!("broker.consumer.poll_errors").increment(1);
                        }
                        None => {
                            tracing::warn!("consumer stream ended");
                            return;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("consumer stopping: shutdown signal");
                        return;
                    }
                }
            }
        }
    }

    async fn process(&self, message: &BorrowedMessage<'_>, handler: &dyn WorkHandler) {
        let Some(payload) = message.payload() else {
            tracing::warn!(
                partition = message.partition(),
                offset = message.offset(),
                "message without payload, committing"
            );
            self.commit(message);
            return;
        };

        let envelope = match EventEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                // Unparseable or wrong schema version: straight to the DLQ.
                tracing::warn!(
                    partition = message.partition(),
                    offset = message.offset(),
                    error = %err,
                    "undecodable envelope, dead-lettering"
                );
                if let Err(dlq_err) = self.dlq.publish_raw(payload, &err.to_string()).await {
                    tracing::error!(error = %dlq_err, "dead-letter publish failed");
                    return; // Neither DLQ'd nor committed; redelivered later.
                }
                self.commit(message);
                return;
            }
        };

        if !matches!(envelope.payload, EventPayload::ThoughtCreated { .. }) {
            // Informational fan-out traffic, not a work order.
            tracing::trace!(
                event_type = envelope.payload.event_type(),
                "ignoring non-work-order event"
            );
            self.commit(message);
            return;
        }

        tracing::debug!(
            thought_id = %envelope.thought_id,
            user_id = %envelope.user_id,
            partition = message.partition(),
            offset = message.offset(),
            "dispatching work order"
        );

        match handler.handle(&envelope).await {
            Disposition::Done => {
                metrics::counter!("broker.consumer.handled").increment(1);
                self.commit(message);
            }
            Disposition::Retry { backoff } => {
                metrics::counter!("broker.consumer.retries").increment(1);
                tracing::info!(
                    thought_id = %envelope.thought_id,
                    backoff_ms = backoff.as_millis() as u64,
                    "transient failure, seeking back for redelivery"
                );
                tokio::time::sleep(backoff).await;
                if let Err(err) = self.consumer.seek(
                    &self.work_topic,
                    message.partition(),
                    Offset::Offset(message.offset()),
                    Duration::from_secs(5),
                ) {
                    // Seek failure leaves the offset uncommitted; the
                    // message comes back on the next rebalance or restart.
                    tracing::error!(error = %err, "seek-back failed");
                }
            }
            Disposition::DeadLetter { reason } => {
                metrics::counter!("broker.consumer.dead_lettered").increment(1);
                if let Err(err) = self.dlq.publish(&envelope, &reason).await {
                    tracing::error!(
                        thought_id = %envelope.thought_id,
                        error = %err,
                        "dead-letter publish failed, leaving uncommitted"
                    );
                    return;
                }
                self.commit(message);
            }
        }
    }

    fn commit(&self, message: &BorrowedMessage<'_>) {
        // Async commit after the sink acknowledged; a lost commit only
        // causes a redelivery, which the sink absorbs.
        if let Err(err) = self.consumer.commit_message(message, CommitMode::Async) {
            tracing::warn!(
                partition = message.partition(),
                offset = message.offset(),
                error = %err,
                "offset commit failed, message may be redelivered"
            );
        }
    }
}
