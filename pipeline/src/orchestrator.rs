//! The per-delivery pipeline run.
//!
//! One [`Orchestrator::run`] call per broker delivery. The run claims the
//! thought row via the sink's compare-and-set, short-circuits on a semantic
//! cache hit, otherwise drives A1..A5 in sequence (persisting each output
//! immediately and fanning progress out) and finishes with a terminal
//! transition. Stages whose outputs are already persisted (a crashed
//! earlier delivery) are skipped without an LLM call.

use crate::agents::{AgentRunner, StageContext};
use std::sync::Arc;
use thoughtflow_core::bus::ProgressBus;
use thoughtflow_core::cache::SemanticCache;
use thoughtflow_core::clock::Clock;
use thoughtflow_core::config::PipelineConfig;
use thoughtflow_core::context::{UserContext, UserContextStore};
use thoughtflow_core::envelope::{EventEnvelope, EventPayload};
use thoughtflow_core::error::{PermanentKind, PipelineError, TransientKind};
use thoughtflow_core::sink::{BeginProcessing, StoreError, ThoughtStore};
use thoughtflow_core::stages::{CompletedOutputs, StageName, StageOutput};
use thoughtflow_core::thought::{Thought, ThoughtId};
use thoughtflow_llm::{EmbeddingBackend, LlmAdapter};

/// Largest serialized stage output forwarded on the fan-out bus.
const MAX_INLINE_OUTPUT_BYTES: usize = 8 * 1024;

/// Everything a pipeline run touches, passed in explicitly.
pub struct OrchestratorDeps {
    /// The persistence sink.
    pub store: Arc<dyn ThoughtStore>,
    /// Read-only user contexts.
    pub contexts: Arc<dyn UserContextStore>,
    /// The progress fan-out bus.
    pub bus: Arc<dyn ProgressBus>,
    /// The semantic cache.
    pub cache: Arc<dyn SemanticCache>,
    /// The embedding backend; `None` disables the cache entirely.
    pub embedder: Option<Arc<dyn EmbeddingBackend>>,
    /// The chat-completion adapter.
    pub adapter: Arc<dyn LlmAdapter>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Pipeline settings.
    pub config: PipelineConfig,
}

/// Stateless driver of one thought's analysis.
pub struct Orchestrator {
    deps: OrchestratorDeps,
    runner: AgentRunner,
}

impl Orchestrator {
    /// Build an orchestrator from its dependencies.
    #[must_use]
    pub fn new(deps: OrchestratorDeps) -> Self {
        let runner = AgentRunner::new(
            Arc::clone(&deps.adapter),
            deps.config.agent_internal_retries,
        );
        Self { deps, runner }
    }

    /// Run the pipeline for one delivery.
    ///
    /// Returns `Ok(())` for completed runs *and* for redeliveries of already
    /// terminal thoughts (idempotence). Permanent failures are fully
    /// handled here (terminal sink transition plus a `thought_failed`
    /// fan-out event) before the error is returned so the consumer can
    /// dead-letter the envelope.
    ///
    /// # Errors
    ///
    /// A transient [`PipelineError`] asks the broker to redeliver; a
    /// permanent one asks it to dead-letter and commit.
    pub async fn run(&self, thought_id: ThoughtId) -> Result<(), PipelineError> {
        let started = self.deps.clock.now();

        // Claim the row. The CAS also answers "already terminal?" so a
        // redelivery after a crash-before-commit is a clean no-op.
        let thought = match self
            .deps
            .store
            .begin_processing(thought_id, self.deps.config.stuck_grace())
            .await
            .map_err(map_store_error)?
        {
            BeginProcessing::Started { thought } => *thought,
            BeginProcessing::Busy => {
                return Err(PipelineError::transient(
                    TransientKind::InProgress,
                    format!("thought {thought_id} is owned by another delivery"),
                ));
            }
            BeginProcessing::AlreadyTerminal { status } => {
                tracing::debug!(%thought_id, %status, "redelivery of terminal thought, skipping");
                return Ok(());
            }
            BeginProcessing::NotFound => {
                return Err(PipelineError::permanent(
                    PermanentKind::InvalidPayload,
                    format!("thought {thought_id} does not exist"),
                ));
            }
        };

        tracing::info!(
            %thought_id,
            user_id = %thought.user_id,
            attempt = thought.attempt_count,
            "pipeline run started"
        );
        self.publish(&thought, EventPayload::ThoughtProcessing).await;

        // User context is mandatory; a missing user is permanent.
        let context = match self.load_context(&thought).await {
            Ok(context) => context,
            Err(err) if err.is_transient() => return Err(err),
            Err(err) => return self.fail_terminally(&thought, err).await,
        };

        // Cache gate. Everything in here is best-effort: embedding or
        // lookup failures downgrade to a miss.
        let embedding = self.embed(&thought).await;
        if let Some(vector) = &embedding {
            match self.deps.cache.lookup(&thought.user_id, vector).await {
                Ok(Some(hit)) => {
                    tracing::info!(%thought_id, similarity = hit.similarity, "semantic cache hit");
                    metrics::counter!("pipeline.cache.hits").increment(1);
                    return self
                        .complete_from_cache(&thought, &context, vector, hit.outputs, started)
                        .await;
                }
                Ok(None) => metrics::counter!("pipeline.cache.misses").increment(1),
                Err(err) => {
                    tracing::warn!(%thought_id, error = %err, "cache lookup failed, treating as miss");
                    metrics::counter!("pipeline.cache.errors").increment(1);
                }
            }
        }

        // A1..A5, strictly in sequence, resuming past persisted outputs.
        let mut outputs = thought.outputs.clone();
        for stage in StageName::ALL {
            if outputs.has(stage) {
                tracing::debug!(%thought_id, %stage, "stage output already persisted, skipping");
                continue;
            }

            let ctx = StageContext {
                text: &thought.text,
                user_context: &context,
                prior: &outputs,
            };
            let output = match self.runner.run(stage, &ctx).await {
                Ok(output) => output,
                Err(err) if err.is_transient() => return Err(err),
                Err(err) => return self.fail_terminally(&thought, err).await,
            };

            self.deps
                .store
                .write_stage(thought.id, &output)
                .await
                .map_err(map_store_error)?;
            self.publish(
                &thought,
                EventPayload::agent_completed(stage, inline_output(&output)),
            )
            .await;
            outputs.insert(output);
        }

        // Terminal success plus a fresh cache entry.
        let vector: &[f32] = embedding.as_deref().unwrap_or(&[]);
        match self
            .deps
            .store
            .complete(thought.id, vector, context.version)
            .await
        {
            Ok(()) => {}
            Err(StoreError::Invariant(message)) => {
                let err = PipelineError::permanent(PermanentKind::Invariant, message);
                return self.fail_terminally(&thought, err).await;
            }
            Err(err) => return Err(map_store_error(err)),
        }

        if let Some(vector) = &embedding {
            if let Ok(completed) = CompletedOutputs::try_from(outputs) {
                if let Err(err) = self
                    .deps
                    .cache
                    .store(&thought.user_id, &thought.text, vector, &completed)
                    .await
                {
                    tracing::warn!(%thought_id, error = %err, "cache store failed, continuing");
                }
            }
        }

        let elapsed = seconds_since(&*self.deps.clock, started);
        self.publish(
            &thought,
            EventPayload::ThoughtCompleted {
                processing_time_seconds: elapsed,
                cache_hit: false,
            },
        )
        .await;
        metrics::counter!("pipeline.completed", "cache_hit" => "false").increment(1);
        metrics::histogram!("pipeline.duration_seconds").record(elapsed);
        tracing::info!(%thought_id, elapsed_seconds = elapsed, "pipeline run completed");
        Ok(())
    }

    /// Cache hit: persist the stored outputs and finish.
    async fn complete_from_cache(
        &self,
        thought: &Thought,
        context: &UserContext,
        vector: &[f32],
        outputs: CompletedOutputs,
        started: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), PipelineError> {
        for output in outputs.as_stage_outputs() {
            self.deps
                .store
                .write_stage(thought.id, &output)
                .await
                .map_err(map_store_error)?;
        }
        match self
            .deps
            .store
            .complete(thought.id, vector, context.version)
            .await
        {
            Ok(()) => {}
            Err(StoreError::Invariant(message)) => {
                let err = PipelineError::permanent(PermanentKind::Invariant, message);
                return self.fail_terminally(thought, err).await;
            }
            Err(err) => return Err(map_store_error(err)),
        }

        let elapsed = seconds_since(&*self.deps.clock, started);
        self.publish(
            thought,
            EventPayload::ThoughtCompleted {
                processing_time_seconds: elapsed,
                cache_hit: true,
            },
        )
        .await;
        metrics::counter!("pipeline.completed", "cache_hit" => "true").increment(1);
        Ok(())
    }

    /// Permanent failure: terminal sink transition, `thought_failed` on the
    /// bus, then hand the error back for dead-lettering.
    async fn fail_terminally(
        &self,
        thought: &Thought,
        err: PipelineError,
    ) -> Result<(), PipelineError> {
        if let Err(store_err) = self
            .deps
            .store
            .fail(thought.id, err.kind_str(), err.message())
            .await
        {
            tracing::error!(
                thought_id = %thought.id,
                error = %store_err,
                "failed to record terminal failure"
            );
        }
        self.publish(
            thought,
            EventPayload::ThoughtFailed {
                error_kind: err.kind_str().to_string(),
                error_message: err.message().to_string(),
                retry_count: thought.attempt_count,
            },
        )
        .await;
        metrics::counter!("pipeline.failed", "kind" => err.kind_str()).increment(1);
        Err(err)
    }

    async fn load_context(&self, thought: &Thought) -> Result<UserContext, PipelineError> {
        let loaded = self
            .deps
            .contexts
            .load(&thought.user_id)
            .await
            .map_err(|e| {
                PipelineError::transient(TransientKind::Network, format!("context store: {e}"))
            })?;
        let context = loaded.ok_or_else(|| {
            PipelineError::permanent(
                PermanentKind::UnknownUser,
                format!("no context for user {}", thought.user_id),
            )
        })?;
        context.validate().map_err(|e| {
            PipelineError::permanent(
                PermanentKind::InvalidPayload,
                format!("user context invalid: {e}"),
            )
        })?;
        Ok(context)
    }

    /// Compute the thought embedding, downgrading every failure to `None`.
    async fn embed(&self, thought: &Thought) -> Option<Vec<f32>> {
        let embedder = self.deps.embedder.as_ref()?;
        match embedder.embed(&thought.text).await {
            Ok(vector) => Some(vector),
            Err(err) => {
                tracing::warn!(
                    thought_id = %thought.id,
                    error = %err,
                    "embedding failed, cache disabled for this run"
                );
                None
            }
        }
    }

    /// Best-effort fan-out publish; failures are logged, never propagated.
    async fn publish(&self, thought: &Thought, payload: EventPayload) {
        let envelope = EventEnvelope::new(
            thought.id,
            thought.user_id.clone(),
            self.deps.clock.now(),
            payload,
        );
        if let Err(err) = self.deps.bus.publish(&thought.user_id, &envelope).await {
            tracing::warn!(
                thought_id = %thought.id,
                error = %err,
                "progress publish failed, continuing"
            );
        }
    }
}

fn map_store_error(err: StoreError) -> PipelineError {
    match err {
        StoreError::Backend(message) => {
            PipelineError::transient(TransientKind::Network, format!("sink: {message}"))
        }
        StoreError::NotFound(id) => PipelineError::permanent(
            PermanentKind::InvalidPayload,
            format!("thought {id} vanished mid-run"),
        ),
        StoreError::Invariant(message) => {
            PipelineError::permanent(PermanentKind::Invariant, message)
        }
    }
}

fn inline_output(output: &StageOutput) -> Option<serde_json::Value> {
    let value = output.to_json().ok()?;
    let size = serde_json::to_vec(&value).map(|b| b.len()).ok()?;
    (size <= MAX_INLINE_OUTPUT_BYTES).then_some(value)
}

fn seconds_since(clock: &dyn Clock, started: chrono::DateTime<chrono::Utc>) -> f64 {
    let elapsed = clock.now().signed_duration_since(started);
    f64::from(u32::try_from(elapsed.num_milliseconds().max(0)).unwrap_or(u32::MAX)) / 1000.0
}
