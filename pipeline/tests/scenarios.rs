//! End-to-end pipeline scenarios against the in-memory fakes.
//!
//! These mirror the seed scenarios of the system design: happy paths with
//! cache miss and hit, transient redelivery, permanent failure, sweeper
//! recovery after a mid-pipeline crash, and per-user ordering.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use std::sync::Arc;
use thoughtflow_core::clock::Clock;
use thoughtflow_core::config::{CacheConfig, PipelineConfig};
use thoughtflow_core::envelope::EventPayload;
use thoughtflow_core::error::PipelineError;
use thoughtflow_core::thought::{NewThought, ThoughtId, ThoughtStatus, UserId};
use thoughtflow_llm::LlmError;
use thoughtflow_pipeline::sweeper::RecoverySweeper;
use thoughtflow_pipeline::{Orchestrator, OrchestratorDeps};
use thoughtflow_testing::clock::FixedClock;
use thoughtflow_testing::{
    InMemoryContextStore, InMemoryProgressBus, InMemorySemanticCache, InMemoryThoughtStore,
    MockEmbedder, RecordingProducer, ScriptedLlm, sample_user_context, test_clock,
};

// High enough that two unrelated mock embeddings cannot spuriously clear
// the 0.92 similarity threshold.
const DIMENSION: usize = 64;

struct Harness {
    clock: Arc<FixedClock>,
    store: Arc<InMemoryThoughtStore>,
    contexts: Arc<InMemoryContextStore>,
    bus: Arc<InMemoryProgressBus>,
    cache: Arc<InMemorySemanticCache>,
    embedder: Arc<MockEmbedder>,
    llm: Arc<ScriptedLlm>,
    config: PipelineConfig,
    orchestrator: Orchestrator,
}

fn harness(llm: ScriptedLlm, internal_retries: u32) -> Harness {
    let clock = Arc::new(test_clock());
    let cache_config = CacheConfig {
        embedding_dimension: DIMENSION,
        ..CacheConfig::default()
    };
    let config = PipelineConfig {
        agent_internal_retries: internal_retries,
        ..PipelineConfig::default()
    };

    let store = Arc::new(InMemoryThoughtStore::new(
        Arc::clone(&clock) as Arc<dyn Clock>
    ));
    let contexts = Arc::new(InMemoryContextStore::new());
    let bus = Arc::new(InMemoryProgressBus::new());
    let cache = Arc::new(InMemorySemanticCache::new(
        Arc::clone(&clock) as Arc<dyn Clock>,
        cache_config,
    ));
    let embedder = Arc::new(MockEmbedder::new(DIMENSION));
    let llm = Arc::new(llm);

    let orchestrator = Orchestrator::new(OrchestratorDeps {
        store: Arc::clone(&store) as _,
        contexts: Arc::clone(&contexts) as _,
        bus: Arc::clone(&bus) as _,
        cache: Arc::clone(&cache) as _,
        embedder: Some(Arc::clone(&embedder) as _),
        adapter: Arc::clone(&llm) as _,
        clock: Arc::clone(&clock) as _,
        config: config.clone(),
    });

    Harness {
        clock,
        store,
        contexts,
        bus,
        cache,
        embedder,
        llm,
        config,
        orchestrator,
    }
}

async fn ingest(h: &Harness, user: &str, text: &str) -> ThoughtId {
    use thoughtflow_core::sink::ThoughtStore;
    let id = ThoughtId::new();
    h.store
        .insert_pending(NewThought {
            id,
            user_id: UserId::new(user),
            text: text.to_string(),
        })
        .await
        .unwrap();
    id
}

fn completed_events(h: &Harness, user: &str) -> Vec<(ThoughtId, bool)> {
    h.bus
        .published(&UserId::new(user))
        .into_iter()
        .filter_map(|e| match e.payload {
            EventPayload::ThoughtCompleted { cache_hit, .. } => Some((e.thought_id, cache_hit)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn s1_happy_path_cache_miss() {
    let h = harness(ScriptedLlm::auto(), 2);
    h.contexts.insert(sample_user_context("U1"));
    let id = ingest(&h, "U1", "Should I learn Rust?").await;

    h.orchestrator.run(id).await.unwrap();

    let user = UserId::new("U1");
    assert_eq!(
        h.bus.event_types(&user),
        vec![
            "thought_processing",
            "thought_agent_completed",
            "thought_agent_completed",
            "thought_agent_completed",
            "thought_agent_completed",
            "thought_agent_completed",
            "thought_completed",
        ]
    );

    // Agent events carry 1/5..5/5 with matching progress.
    let agent_events: Vec<(u8, u8)> = h
        .bus
        .published(&user)
        .into_iter()
        .filter_map(|e| match e.payload {
            EventPayload::ThoughtAgentCompleted {
                agent_number,
                progress_percent,
                total_agents,
                ..
            } => {
                assert_eq!(total_agents, 5);
                Some((agent_number, progress_percent))
            }
            _ => None,
        })
        .collect();
    assert_eq!(agent_events, vec![(1, 20), (2, 40), (3, 60), (4, 80), (5, 100)]);

    assert_eq!(completed_events(&h, "U1"), vec![(id, false)]);

    let row = h.store.snapshot(id).unwrap();
    assert_eq!(row.status, ThoughtStatus::Completed);
    assert!(row.outputs.is_complete());
    assert!(row.embedding.is_some());
    assert_eq!(row.context_version, Some(1));
    assert_eq!(h.cache.len(), 1);
    assert_eq!(h.llm.call_count(), 5);
}

#[tokio::test]
async fn s2_happy_path_cache_hit() {
    let h = harness(ScriptedLlm::auto(), 2);
    h.contexts.insert(sample_user_context("U1"));

    let first = ingest(&h, "U1", "Should I learn Rust?").await;
    h.orchestrator.run(first).await.unwrap();
    assert_eq!(h.llm.call_count(), 5);

    // Same user, same text: the cache short-circuits the whole pipeline.
    let second = ingest(&h, "U1", "Should I learn Rust?").await;
    h.orchestrator.run(second).await.unwrap();

    assert_eq!(h.llm.call_count(), 5, "cache hit must not call the LLM");
    assert_eq!(
        completed_events(&h, "U1"),
        vec![(first, false), (second, true)]
    );

    // No per-agent events for the second run.
    let user = UserId::new("U1");
    let events = h.bus.event_types(&user);
    assert_eq!(
        &events[7..],
        &["thought_processing", "thought_completed"],
        "hit path is processing → completed"
    );

    let first_row = h.store.snapshot(first).unwrap();
    let second_row = h.store.snapshot(second).unwrap();
    assert_eq!(second_row.status, ThoughtStatus::Completed);
    assert_eq!(first_row.outputs, second_row.outputs);
}

#[tokio::test]
async fn s3_transient_retry_succeeds_on_second_delivery() {
    // No internal retries, so the first delivery's timeout bubbles up and
    // the broker redelivers.
    let llm = ScriptedLlm::auto();
    llm.push_error(LlmError::Timeout("provider stalled".to_string()));
    let h = harness(llm, 0);
    h.contexts.insert(sample_user_context("U2"));
    let id = ingest(&h, "U2", "renegotiate the contract").await;

    let first = h.orchestrator.run(id).await;
    assert!(matches!(first, Err(PipelineError::Transient { .. })));
    assert_eq!(h.store.snapshot(id).unwrap().attempt_count, 1);

    // The row is still owned by the crashed-looking delivery; redelivery
    // reclaims it after the grace window.
    h.clock.advance_secs(i64::try_from(h.config.stuck_grace().as_secs()).unwrap() + 1);
    h.orchestrator.run(id).await.unwrap();

    let row = h.store.snapshot(id).unwrap();
    assert_eq!(row.status, ThoughtStatus::Completed);
    assert_eq!(row.attempt_count, 2);
    assert_eq!(completed_events(&h, "U2").len(), 1);
}

#[tokio::test]
async fn s4_unknown_user_fails_permanently() {
    let h = harness(ScriptedLlm::auto(), 2);
    // No context inserted for this user.
    let id = ingest(&h, "ghost", "hello?").await;

    let err = h.orchestrator.run(id).await.unwrap_err();
    assert_eq!(err.kind_str(), "permanent/unknown_user");

    let row = h.store.snapshot(id).unwrap();
    assert_eq!(row.status, ThoughtStatus::Failed);
    assert_eq!(
        row.failure.unwrap().kind,
        "permanent/unknown_user".to_string()
    );

    let user = UserId::new("ghost");
    let failed: Vec<_> = h
        .bus
        .published(&user)
        .into_iter()
        .filter(|e| matches!(e.payload, EventPayload::ThoughtFailed { .. }))
        .collect();
    assert_eq!(failed.len(), 1);
    match &failed[0].payload {
        EventPayload::ThoughtFailed {
            error_kind,
            retry_count,
            ..
        } => {
            assert_eq!(error_kind, "permanent/unknown_user");
            assert_eq!(*retry_count, 1);
        }
        other => panic!("unexpected payload: {other:?}"),
    }
    assert_eq!(h.llm.call_count(), 0);
}

#[tokio::test]
async fn s5_crash_mid_pipeline_sweeper_recovery() {
    // First delivery: A1 and A2 succeed, then the adapter dies. The row is
    // left in processing with two persisted outputs, as after a crash.
    let llm = ScriptedLlm::auto();
    llm.push_text(thoughtflow_testing::fixtures::classification_reply());
    llm.push_text(thoughtflow_testing::fixtures::analysis_reply());
    llm.push_error(LlmError::Network("connection reset".to_string()));
    let h = harness(llm, 0);
    h.contexts.insert(sample_user_context("U3"));
    let id = ingest(&h, "U3", "plan the offsite").await;

    assert!(h.orchestrator.run(id).await.is_err());
    let row = h.store.snapshot(id).unwrap();
    assert_eq!(row.status, ThoughtStatus::Processing);
    assert!(row.outputs.classification.is_some());
    assert!(row.outputs.analysis.is_some());
    assert!(row.outputs.value_impact.is_none());

    // Past the grace window the sweeper republishes the work order.
    let producer = Arc::new(RecordingProducer::new());
    let sweeper = RecoverySweeper::new(
        Arc::clone(&h.store) as _,
        Arc::clone(&producer) as _,
        Arc::clone(&h.bus) as _,
        Arc::clone(&h.clock) as _,
        h.config.clone(),
    );
    h.clock.advance_secs(i64::try_from(h.config.stuck_grace().as_secs()).unwrap() + 60);
    let report = sweeper.run_once().await.unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(report.failed, 0);

    let republished = producer.submitted();
    assert_eq!(republished.len(), 1);
    assert_eq!(republished[0].thought_id, id);
    assert!(matches!(
        republished[0].payload,
        EventPayload::ThoughtCreated { .. }
    ));

    // The next delivery resumes from A3: only three more LLM calls.
    let calls_before = h.llm.call_count();
    h.orchestrator.run(id).await.unwrap();
    assert_eq!(h.llm.call_count() - calls_before, 3);

    let row = h.store.snapshot(id).unwrap();
    assert_eq!(row.status, ThoughtStatus::Completed);
    assert!(row.outputs.is_complete());
    assert!(h.cache.len() <= 1);
}

#[tokio::test]
async fn s6_per_user_ordering() {
    let h = harness(ScriptedLlm::auto(), 2);
    h.contexts.insert(sample_user_context("U4"));
    h.contexts.insert(sample_user_context("U5"));

    let mut expected_u4 = Vec::new();
    let mut expected_u5 = Vec::new();
    for (user, is_u4, text) in [
        ("U4", true, "t4a"),
        ("U4", true, "t4b"),
        ("U4", true, "t4c"),
        ("U5", false, "t5a"),
        ("U5", false, "t5b"),
        ("U5", false, "t5c"),
    ] {
        let id = ingest(&h, user, text).await;
        if is_u4 {
            expected_u4.push(id);
        } else {
            expected_u5.push(id);
        }
        h.orchestrator.run(id).await.unwrap();
    }

    let u4_completed: Vec<ThoughtId> = completed_events(&h, "U4")
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    let u5_completed: Vec<ThoughtId> = completed_events(&h, "U5")
        .into_iter()
        .map(|(id, _)| id)
        .collect();

    assert_eq!(u4_completed, expected_u4);
    assert_eq!(u5_completed, expected_u5);
}

#[tokio::test]
async fn redelivery_after_completion_is_a_no_op() {
    let h = harness(ScriptedLlm::auto(), 2);
    h.contexts.insert(sample_user_context("U1"));
    let id = ingest(&h, "U1", "idempotency check").await;

    h.orchestrator.run(id).await.unwrap();
    let row_before = h.store.snapshot(id).unwrap();
    let events_before = h.bus.published(&UserId::new("U1")).len();
    let cache_before = h.cache.len();

    h.orchestrator.run(id).await.unwrap();

    let row_after = h.store.snapshot(id).unwrap();
    assert_eq!(row_before.outputs, row_after.outputs);
    assert_eq!(row_after.status, ThoughtStatus::Completed);
    assert_eq!(row_before.attempt_count, row_after.attempt_count);
    assert_eq!(h.bus.published(&UserId::new("U1")).len(), events_before);
    assert_eq!(h.cache.len(), cache_before);
}

#[tokio::test]
async fn cache_errors_are_swallowed() {
    let h = harness(ScriptedLlm::auto(), 2);
    h.contexts.insert(sample_user_context("U1"));
    h.cache.fail_lookups();
    let id = ingest(&h, "U1", "cache outage").await;

    h.orchestrator.run(id).await.unwrap();
    assert_eq!(h.store.snapshot(id).unwrap().status, ThoughtStatus::Completed);
    assert_eq!(completed_events(&h, "U1"), vec![(id, false)]);
}

#[tokio::test]
async fn embedder_outage_disables_cache_but_completes() {
    let h = harness(ScriptedLlm::auto(), 2);
    h.contexts.insert(sample_user_context("U1"));
    h.embedder.fail_embeddings();
    let id = ingest(&h, "U1", "no embeddings today").await;

    h.orchestrator.run(id).await.unwrap();
    let row = h.store.snapshot(id).unwrap();
    assert_eq!(row.status, ThoughtStatus::Completed);
    assert!(row.embedding.is_none());
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn boundary_text_lengths_pass_end_to_end() {
    let h = harness(ScriptedLlm::auto(), 2);
    h.contexts.insert(sample_user_context("U1"));

    let one_char = ingest(&h, "U1", "x").await;
    h.orchestrator.run(one_char).await.unwrap();
    assert_eq!(
        h.store.snapshot(one_char).unwrap().status,
        ThoughtStatus::Completed
    );

    let max_text = "y".repeat(thoughtflow_core::thought::MAX_TEXT_CHARS);
    let max = ingest(&h, "U1", &max_text).await;
    h.orchestrator.run(max).await.unwrap();
    assert_eq!(h.store.snapshot(max).unwrap().status, ThoughtStatus::Completed);
}

#[tokio::test]
async fn sweeper_fails_thought_out_of_budget() {
    let llm = ScriptedLlm::auto();
    llm.push_error(LlmError::Network("down".to_string()));
    let h = harness(llm, 0);
    h.contexts.insert(sample_user_context("U6"));
    let id = ingest(&h, "U6", "doomed").await;

    // Burn the delivery budget with transient failures.
    for _ in 0..h.config.pipeline_max_attempts {
        let _ = h.orchestrator.run(id).await;
        h.llm.push_error(LlmError::Network("down".to_string()));
        h.clock
            .advance_secs(i64::try_from(h.config.stuck_grace().as_secs()).unwrap() + 1);
    }
    assert_eq!(
        h.store.snapshot(id).unwrap().attempt_count,
        h.config.pipeline_max_attempts
    );

    let producer = Arc::new(RecordingProducer::new());
    let sweeper = RecoverySweeper::new(
        Arc::clone(&h.store) as _,
        Arc::clone(&producer) as _,
        Arc::clone(&h.bus) as _,
        Arc::clone(&h.clock) as _,
        h.config.clone(),
    );
    let report = sweeper.run_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.requeued, 0);
    assert!(producer.submitted().is_empty());

    let row = h.store.snapshot(id).unwrap();
    assert_eq!(row.status, ThoughtStatus::Failed);
    assert_eq!(row.failure.unwrap().kind, "permanent/stuck");
}
