//! The work-order producer seam.
//!
//! Ingest and the recovery sweeper both publish `ThoughtCreated` envelopes
//! through this trait; the Kafka implementation lives in
//! `thoughtflow-broker`.

use crate::envelope::EventEnvelope;
use async_trait::async_trait;
use thiserror::Error;

/// How a submission reached (or didn't reach) the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitMode {
    /// Published and durably acknowledged by the broker.
    Streamed,
    /// The producer is disabled; the thought stays `pending` for the
    /// recovery sweeper. Observable to callers as `mode = "deferred"`.
    Deferred,
}

impl SubmitMode {
    /// Wire string used in the ingest response.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Streamed => "stream",
            Self::Deferred => "deferred",
        }
    }
}

/// Producer failures, already classified.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// Exhausted the retry budget on transient broker errors.
    #[error("broker unavailable after retries: {0}")]
    Exhausted(String),
    /// A non-retryable broker error.
    #[error("broker rejected the event: {0}")]
    Fatal(String),
    /// The envelope could not be encoded.
    #[error("envelope encode failed: {0}")]
    Encode(String),
}

/// Publishes work orders to the broker, keyed by user id.
#[async_trait]
pub trait ThoughtProducer: Send + Sync {
    /// Publish a `ThoughtCreated` envelope, waiting for broker durability
    /// acknowledgement. The partitioning key is the envelope's `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProducerError`] once the internal retry budget (transient
    /// errors only) is exhausted or on a fatal broker error. The caller is
    /// responsible for the thought at that point; nothing is buffered.
    async fn submit(&self, envelope: &EventEnvelope) -> Result<SubmitMode, ProducerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_mode_wire_strings() {
        assert_eq!(SubmitMode::Streamed.as_str(), "stream");
        assert_eq!(SubmitMode::Deferred.as_str(), "deferred");
    }
}
