//! # Thoughtflow Broker
//!
//! Kafka-backed job transport with at-least-once delivery.
//!
//! - [`producer`]: publishes `thought_created` work orders keyed by user
//!   id (the sole ordering guarantee), waits for durable acknowledgement,
//!   retries transient broker errors with jittered backoff, and degrades to
//!   deferred mode when disabled
//! - [`consumer`]: the consumer-group worker loop: strictly in-order per
//!   partition, manual offset commits only after the sink acknowledged,
//!   seek-back redelivery for transient failures, dead-lettering for
//!   everything that escapes the retry budget
//! - [`dlq`]: the dead-letter topic publisher; failed envelopes are
//!   retained verbatim with an added `failure_reason`
//!
//! # Delivery semantics
//!
//! At-least-once with manual commits: a crash between the sink write and
//! the offset commit re-drives the work, and idempotency at the sink makes
//! the redelivery a no-op. Subscribers must never rely on exactly-once.

pub mod consumer;
pub mod dlq;
pub mod producer;

pub use consumer::{ConsumerError, Disposition, KafkaThoughtConsumer, WorkHandler};
pub use dlq::DlqPublisher;
pub use producer::KafkaThoughtProducer;
