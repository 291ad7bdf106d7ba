//! Recording work-order producer.

use async_trait::async_trait;
use std::sync::Mutex;
use thoughtflow_core::broker::{ProducerError, SubmitMode, ThoughtProducer};
use thoughtflow_core::envelope::EventEnvelope;

/// Captures every submitted envelope instead of talking to a broker.
pub struct RecordingProducer {
    submitted: Mutex<Vec<EventEnvelope>>,
    mode: SubmitMode,
    fail_all: Mutex<bool>,
}

impl RecordingProducer {
    /// A producer that reports `Streamed` for every submission.
    #[must_use]
    pub fn new() -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            mode: SubmitMode::Streamed,
            fail_all: Mutex::new(false),
        }
    }

    /// A producer in deferred (disabled) mode.
    #[must_use]
    pub fn deferred() -> Self {
        Self {
            mode: SubmitMode::Deferred,
            ..Self::new()
        }
    }

    /// Make every subsequent submit fail as exhausted.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[allow(clippy::unwrap_used)]
    pub fn fail_submissions(&self) {
        *self.fail_all.lock().unwrap() = true;
    }

    /// Everything submitted so far, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn submitted(&self) -> Vec<EventEnvelope> {
        self.submitted.lock().unwrap().clone()
    }
}

impl Default for RecordingProducer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThoughtProducer for RecordingProducer {
    async fn submit(&self, envelope: &EventEnvelope) -> Result<SubmitMode, ProducerError> {
        if *self
            .fail_all
            .lock()
            .map_err(|_| ProducerError::Fatal("producer lock poisoned".to_string()))?
        {
            return Err(ProducerError::Exhausted("injected failure".to_string()));
        }
        self.submitted
            .lock()
            .map_err(|_| ProducerError::Fatal("producer lock poisoned".to_string()))?
            .push(envelope.clone());
        Ok(self.mode)
    }
}
