//! The recovery sweeper.
//!
//! The sole safeguard against consumers that crash after claiming a thought
//! but before any terminal transition. Each cycle scans a bounded batch of
//! rows stuck in `processing` beyond the grace window and either republishes
//! the work order (attempts remaining) or fails the thought as stuck.

use std::sync::Arc;
use thoughtflow_core::broker::ThoughtProducer;
use thoughtflow_core::bus::ProgressBus;
use thoughtflow_core::clock::Clock;
use thoughtflow_core::config::PipelineConfig;
use thoughtflow_core::envelope::{EventEnvelope, EventPayload};
use thoughtflow_core::error::PermanentKind;
use thoughtflow_core::sink::{StoreError, StuckThought, ThoughtStore};
use tokio::sync::watch;

/// What one sweep cycle did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stuck thoughts republished for redelivery.
    pub requeued: usize,
    /// Stuck thoughts failed terminally (`permanent/stuck`).
    pub failed: usize,
}

/// Periodic stuck-thought scanner.
pub struct RecoverySweeper {
    store: Arc<dyn ThoughtStore>,
    producer: Arc<dyn ThoughtProducer>,
    bus: Arc<dyn ProgressBus>,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
}

impl RecoverySweeper {
    /// Build a sweeper.
    #[must_use]
    pub fn new(
        store: Arc<dyn ThoughtStore>,
        producer: Arc<dyn ThoughtProducer>,
        bus: Arc<dyn ProgressBus>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            producer,
            bus,
            clock,
            config,
        }
    }

    /// Run a single bounded sweep cycle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the stuck scan itself fails; per-thought
    /// republish/fail errors are logged and skipped so one bad row cannot
    /// stall the cycle.
    pub async fn run_once(&self) -> Result<SweepReport, StoreError> {
        let cutoff = self.clock.now()
            - chrono::Duration::seconds(i64::try_from(self.config.stuck_grace().as_secs()).unwrap_or(i64::MAX));
        let stuck = self
            .store
            .list_stuck(cutoff, self.config.sweep_batch_limit)
            .await?;

        let mut report = SweepReport::default();
        for thought in stuck {
            if thought.attempt_count < self.config.pipeline_max_attempts {
                if self.requeue(&thought).await {
                    report.requeued += 1;
                }
            } else {
                self.fail_stuck(&thought).await;
                report.failed += 1;
            }
        }

        if report.requeued > 0 || report.failed > 0 {
            tracing::info!(
                requeued = report.requeued,
                failed = report.failed,
                "sweep cycle finished"
            );
            metrics::counter!("sweeper.requeued").increment(report.requeued as u64);
            metrics::counter!("sweeper.failed").increment(report.failed as u64);
        }
        Ok(report)
    }

    /// Run cycles on the configured interval until the shutdown signal.
    pub async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(self.config.sweep_interval_seconds));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        tracing::error!(error = %err, "sweep cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("sweeper shutting down");
                        return;
                    }
                }
            }
        }
    }

    async fn requeue(&self, thought: &StuckThought) -> bool {
        let envelope = EventEnvelope::new(
            thought.id,
            thought.user_id.clone(),
            self.clock.now(),
            EventPayload::ThoughtCreated {
                text: thought.text.clone(),
                priority_hint: None,
            },
        );
        match self.producer.submit(&envelope).await {
            Ok(_) => {
                tracing::info!(
                    thought_id = %thought.id,
                    attempt = thought.attempt_count,
                    "republished stuck thought"
                );
                true
            }
            Err(err) => {
                tracing::warn!(
                    thought_id = %thought.id,
                    error = %err,
                    "failed to republish stuck thought, will retry next cycle"
                );
                false
            }
        }
    }

    async fn fail_stuck(&self, thought: &StuckThought) {
        let kind = PermanentKind::Stuck;
        let message = format!(
            "stuck in processing since {} after {} attempts",
            thought.processing_started_at, thought.attempt_count
        );
        if let Err(err) = self.store.fail(thought.id, kind.as_str(), &message).await {
            tracing::error!(
                thought_id = %thought.id,
                error = %err,
                "failed to mark stuck thought as failed"
            );
            return;
        }

        let envelope = EventEnvelope::new(
            thought.id,
            thought.user_id.clone(),
            self.clock.now(),
            EventPayload::ThoughtFailed {
                error_kind: kind.as_str().to_string(),
                error_message: message,
                retry_count: thought.attempt_count,
            },
        );
        if let Err(err) = self.bus.publish(&thought.user_id, &envelope).await {
            tracing::warn!(thought_id = %thought.id, error = %err, "stuck failure publish failed");
        }
        tracing::warn!(thought_id = %thought.id, "stuck thought failed terminally");
    }
}
