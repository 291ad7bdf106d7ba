//! The delivery handler and the worker process wiring.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thoughtflow_broker::{
    Disposition, DlqPublisher, KafkaThoughtConsumer, KafkaThoughtProducer, WorkHandler,
};
use thoughtflow_core::bus::ProgressBus;
use thoughtflow_core::clock::{Clock, SystemClock};
use thoughtflow_core::config::Config;
use thoughtflow_core::envelope::{EventEnvelope, EventPayload};
use thoughtflow_core::error::{PipelineError, TransientKind};
use thoughtflow_core::sink::ThoughtStore;
use thoughtflow_fanout::RedisProgressBus;
use thoughtflow_pipeline::{Orchestrator, OrchestratorDeps, RecoverySweeper};
use thoughtflow_postgres::{PgSemanticCache, PgThoughtStore, PgUserContextStore};

use crate::shutdown::{ShutdownSignal, drain_with_deadline, wait_for_signal};

/// Bridges broker deliveries to pipeline runs.
///
/// The retry-budget decision lives here because it needs the stored attempt
/// counter: a transient failure is redelivered while attempts remain, and
/// becomes a terminal failure plus a dead-letter entry once the budget is
/// exhausted.
pub struct PipelineWorkHandler {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn ThoughtStore>,
    bus: Arc<dyn ProgressBus>,
    clock: Arc<dyn Clock>,
    max_attempts: i32,
    retry_backoff: Duration,
}

impl PipelineWorkHandler {
    /// Build a handler.
    #[must_use]
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        store: Arc<dyn ThoughtStore>,
        bus: Arc<dyn ProgressBus>,
        clock: Arc<dyn Clock>,
        max_attempts: i32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            orchestrator,
            store,
            bus,
            clock,
            max_attempts,
            retry_backoff,
        }
    }

    /// Transient failure with the budget gone: terminal bookkeeping the
    /// orchestrator only does for permanent failures.
    async fn exhaust(&self, envelope: &EventEnvelope, err: &PipelineError, attempts: i32) {
        if let Err(store_err) = self
            .store
            .fail(envelope.thought_id, err.kind_str(), err.message())
            .await
        {
            tracing::error!(
                thought_id = %envelope.thought_id,
                error = %store_err,
                "failed to record exhausted thought"
            );
        }

        let failed = EventEnvelope::new(
            envelope.thought_id,
            envelope.user_id.clone(),
            self.clock.now(),
            EventPayload::ThoughtFailed {
                error_kind: err.kind_str().to_string(),
                error_message: err.message().to_string(),
                retry_count: attempts,
            },
        );
        if let Err(bus_err) = self.bus.publish(&envelope.user_id, &failed).await {
            tracing::warn!(
                thought_id = %envelope.thought_id,
                error = %bus_err,
                "exhaustion publish failed"
            );
        }
    }
}

#[async_trait]
impl WorkHandler for PipelineWorkHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Disposition {
        match self.orchestrator.run(envelope.thought_id).await {
            Ok(()) => Disposition::Done,
            Err(err) if err.is_transient() => {
                // Contention is not an attempt: another delivery owns the
                // row, so just back off and redeliver.
                if matches!(
                    err,
                    PipelineError::Transient {
                        kind: TransientKind::InProgress,
                        ..
                    }
                ) {
                    return Disposition::Retry {
                        backoff: self.retry_backoff,
                    };
                }

                let attempts = match self.store.load(envelope.thought_id).await {
                    Ok(Some(thought)) => thought.attempt_count,
                    Ok(None) => 0,
                    Err(store_err) => {
                        tracing::warn!(
                            thought_id = %envelope.thought_id,
                            error = %store_err,
                            "cannot read attempt counter, retrying"
                        );
                        return Disposition::Retry {
                            backoff: self.retry_backoff,
                        };
                    }
                };

                if attempts >= self.max_attempts {
                    tracing::error!(
                        thought_id = %envelope.thought_id,
                        attempts,
                        error = %err,
                        "delivery budget exhausted, dead-lettering"
                    );
                    self.exhaust(envelope, &err, attempts).await;
                    Disposition::DeadLetter {
                        reason: format!("retry budget exhausted: {}", err.kind_str()),
                    }
                } else {
                    Disposition::Retry {
                        backoff: self.retry_backoff,
                    }
                }
            }
            Err(err) => {
                // Permanent: the orchestrator already failed the row and
                // published thought_failed; only dead-lettering is left.
                Disposition::DeadLetter {
                    reason: err.kind_str().to_string(),
                }
            }
        }
    }
}

/// Wire the whole worker from configuration and run it to shutdown.
///
/// # Errors
///
/// Returns an error when any client (database, broker, bus, LLM adapter)
/// cannot be constructed; runtime errors inside the loops are handled per
/// delivery and do not abort the process.
pub async fn run_worker(config: Config) -> anyhow::Result<()> {
    let pool = thoughtflow_postgres::connect(&config.database).await?;
    thoughtflow_postgres::MIGRATOR.run(&pool).await?;

    let store: Arc<dyn ThoughtStore> = Arc::new(PgThoughtStore::new(pool.clone()));
    let contexts = Arc::new(PgUserContextStore::new(pool.clone()));
    let cache = Arc::new(PgSemanticCache::new(pool, config.cache.clone()));
    let bus: Arc<dyn ProgressBus> = Arc::new(RedisProgressBus::connect(&config.fanout).await?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let adapter = thoughtflow_llm::build_adapter(&config.llm)?;
    let embedder = thoughtflow_llm::build_embedder(&config.embedding)?;
    if embedder.is_none() {
        tracing::warn!("embedding backend disabled, semantic cache will always miss");
    }

    let producer = Arc::new(KafkaThoughtProducer::from_config(&config.broker)?);
    let dlq = DlqPublisher::from_config(&config.broker)?;
    let consumer = KafkaThoughtConsumer::from_config(&config.broker, dlq)?;

    let orchestrator = Arc::new(Orchestrator::new(OrchestratorDeps {
        store: Arc::clone(&store),
        contexts,
        bus: Arc::clone(&bus),
        cache,
        embedder,
        adapter,
        clock: Arc::clone(&clock),
        config: config.pipeline.clone(),
    }));

    let handler: Arc<dyn WorkHandler> = Arc::new(PipelineWorkHandler::new(
        orchestrator,
        Arc::clone(&store),
        Arc::clone(&bus),
        Arc::clone(&clock),
        config.pipeline.pipeline_max_attempts,
        config.broker.retry_backoff(),
    ));

    let sweeper = RecoverySweeper::new(
        store,
        producer,
        bus,
        clock,
        config.pipeline.clone(),
    );

    let signal = ShutdownSignal::new();
    let consumer_rx = signal.subscribe();
    let sweeper_rx = signal.subscribe();

    let consumer_task = tokio::spawn(async move {
        consumer.run(handler, consumer_rx).await;
    });
    let sweeper_task = tokio::spawn(async move {
        sweeper.run_loop(sweeper_rx).await;
    });

    tracing::info!("worker running");
    wait_for_signal().await;

    tracing::info!(
        drain_deadline_secs = config.pipeline.drain_deadline_seconds,
        "shutting down: stopping polls, draining in-flight work"
    );
    signal.trigger();
    drain_with_deadline(
        vec![consumer_task, sweeper_task],
        config.pipeline.drain_deadline(),
    )
    .await;

    tracing::info!("worker stopped");
    Ok(())
}
