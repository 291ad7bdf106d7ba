//! In-memory thought store enforcing the full status machine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thoughtflow_core::clock::Clock;
use thoughtflow_core::sink::{BeginProcessing, StoreError, StuckThought, ThoughtStore};
use thoughtflow_core::stages::{StageOutput, StageOutputs};
use thoughtflow_core::thought::{FailureRecord, NewThought, Thought, ThoughtId, ThoughtStatus};

/// HashMap-backed `ThoughtStore` with the same transition semantics as the
/// Postgres sink: single-owner claims, first-writer-wins stage slots,
/// invariant-checked completion, monotonic failure.
pub struct InMemoryThoughtStore {
    clock: Arc<dyn Clock>,
    rows: Mutex<HashMap<ThoughtId, Thought>>,
}

impl InMemoryThoughtStore {
    /// Create an empty store driven by the given clock.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            rows: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot a row for assertions.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn snapshot(&self, id: ThoughtId) -> Option<Thought> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    fn with_rows<T>(
        &self,
        f: impl FnOnce(&mut HashMap<ThoughtId, Thought>) -> T,
    ) -> Result<T, StoreError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Backend("store lock poisoned".to_string()))?;
        Ok(f(&mut rows))
    }
}

#[async_trait]
impl ThoughtStore for InMemoryThoughtStore {
    async fn insert_pending(&self, thought: NewThought) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.with_rows(|rows| {
            rows.insert(
                thought.id,
                Thought {
                    id: thought.id,
                    user_id: thought.user_id,
                    text: thought.text,
                    status: ThoughtStatus::Pending,
                    attempt_count: 0,
                    outputs: StageOutputs::default(),
                    embedding: None,
                    context_version: None,
                    created_at: now,
                    processing_started_at: None,
                    processed_at: None,
                    failure: None,
                },
            );
        })
    }

    async fn load(&self, id: ThoughtId) -> Result<Option<Thought>, StoreError> {
        self.with_rows(|rows| rows.get(&id).cloned())
    }

    async fn begin_processing(
        &self,
        id: ThoughtId,
        grace: Duration,
    ) -> Result<BeginProcessing, StoreError> {
        let now = self.clock.now();
        self.with_rows(|rows| {
            let Some(row) = rows.get_mut(&id) else {
                return BeginProcessing::NotFound;
            };

            let claimable = match row.status {
                ThoughtStatus::Pending | ThoughtStatus::Failed => true,
                ThoughtStatus::Processing => row.processing_started_at.is_some_and(|started| {
                    now.signed_duration_since(started).num_seconds()
                        > i64::try_from(grace.as_secs()).unwrap_or(i64::MAX)
                }),
                ThoughtStatus::Completed => false,
            };

            if claimable {
                row.status = ThoughtStatus::Processing;
                row.attempt_count += 1;
                row.processing_started_at = Some(now);
                BeginProcessing::Started {
                    thought: Box::new(row.clone()),
                }
            } else if row.status == ThoughtStatus::Processing {
                BeginProcessing::Busy
            } else {
                BeginProcessing::AlreadyTerminal { status: row.status }
            }
        })
    }

    async fn write_stage(&self, id: ThoughtId, output: &StageOutput) -> Result<(), StoreError> {
        self.with_rows(|rows| {
            let Some(row) = rows.get_mut(&id) else {
                return Err(StoreError::NotFound(id));
            };
            if row.status == ThoughtStatus::Processing {
                // insert() is already first-writer-wins.
                row.outputs.insert(output.clone());
            }
            Ok(())
        })?
    }

    async fn complete(
        &self,
        id: ThoughtId,
        embedding: &[f32],
        context_version: i64,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.with_rows(|rows| {
            let Some(row) = rows.get_mut(&id) else {
                return Err(StoreError::NotFound(id));
            };
            if row.status == ThoughtStatus::Completed {
                return Ok(());
            }
            if !row.outputs.is_complete() {
                return Err(StoreError::Invariant(format!(
                    "cannot complete thought {id}: not all stage outputs are present"
                )));
            }
            row.status = ThoughtStatus::Completed;
            row.processed_at = Some(now);
            row.embedding = (!embedding.is_empty()).then(|| embedding.to_vec());
            row.context_version = Some(context_version);
            row.failure = None;
            Ok(())
        })?
    }

    async fn fail(&self, id: ThoughtId, kind: &str, message: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.with_rows(|rows| {
            let Some(row) = rows.get_mut(&id) else {
                return Err(StoreError::NotFound(id));
            };
            if row.status == ThoughtStatus::Completed {
                return Ok(());
            }
            row.status = ThoughtStatus::Failed;
            row.processed_at = Some(now);
            row.failure = Some(FailureRecord {
                kind: kind.to_string(),
                message: message.to_string(),
            });
            Ok(())
        })?
    }

    async fn list_stuck(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StuckThought>, StoreError> {
        self.with_rows(|rows| {
            let mut stuck: Vec<StuckThought> = rows
                .values()
                .filter(|row| row.status == ThoughtStatus::Processing)
                .filter_map(|row| {
                    let started = row.processing_started_at?;
                    (started < older_than).then(|| StuckThought {
                        id: row.id,
                        user_id: row.user_id.clone(),
                        text: row.text.clone(),
                        attempt_count: row.attempt_count,
                        processing_started_at: started,
                    })
                })
                .collect();
            stuck.sort_by_key(|s| s.processing_started_at);
            stuck.truncate(limit);
            stuck
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic
mod tests {
    use super::*;
    use crate::clock::test_clock;
    use thoughtflow_core::thought::UserId;

    fn new_thought(id: ThoughtId) -> NewThought {
        NewThought {
            id,
            user_id: UserId::new("u1"),
            text: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn claim_increments_attempts() {
        let store = InMemoryThoughtStore::new(Arc::new(test_clock()));
        let id = ThoughtId::new();
        store.insert_pending(new_thought(id)).await.unwrap();

        let claim = store
            .begin_processing(id, Duration::from_secs(600))
            .await
            .unwrap();
        match claim {
            BeginProcessing::Started { thought } => assert_eq!(thought.attempt_count, 1),
            other => panic!("expected Started, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_claim_within_grace_is_busy() {
        let store = InMemoryThoughtStore::new(Arc::new(test_clock()));
        let id = ThoughtId::new();
        store.insert_pending(new_thought(id)).await.unwrap();

        let _ = store
            .begin_processing(id, Duration::from_secs(600))
            .await
            .unwrap();
        let second = store
            .begin_processing(id, Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(second, BeginProcessing::Busy);
    }

    #[tokio::test]
    async fn claim_after_grace_succeeds() {
        let clock = Arc::new(test_clock());
        let store = InMemoryThoughtStore::new(Arc::clone(&clock) as Arc<dyn Clock>);
        let id = ThoughtId::new();
        store.insert_pending(new_thought(id)).await.unwrap();

        let _ = store
            .begin_processing(id, Duration::from_secs(600))
            .await
            .unwrap();
        clock.advance_secs(601);
        let reclaim = store
            .begin_processing(id, Duration::from_secs(600))
            .await
            .unwrap();
        match reclaim {
            BeginProcessing::Started { thought } => assert_eq!(thought.attempt_count, 2),
            other => panic!("expected Started, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn complete_requires_all_outputs() {
        let store = InMemoryThoughtStore::new(Arc::new(test_clock()));
        let id = ThoughtId::new();
        store.insert_pending(new_thought(id)).await.unwrap();
        let _ = store
            .begin_processing(id, Duration::from_secs(600))
            .await
            .unwrap();

        let result = store.complete(id, &[0.1], 1).await;
        assert!(matches!(result, Err(StoreError::Invariant(_))));
    }

    #[tokio::test]
    async fn fail_never_downgrades_completed() {
        let store = InMemoryThoughtStore::new(Arc::new(test_clock()));
        let id = ThoughtId::new();
        store.insert_pending(new_thought(id)).await.unwrap();
        let _ = store
            .begin_processing(id, Duration::from_secs(600))
            .await
            .unwrap();
        for output in crate::fixtures::sample_completed_outputs().as_stage_outputs() {
            store.write_stage(id, &output).await.unwrap();
        }
        store.complete(id, &[0.5], 1).await.unwrap();

        store.fail(id, "permanent/stuck", "should be ignored").await.unwrap();
        let row = store.snapshot(id).unwrap();
        assert_eq!(row.status, ThoughtStatus::Completed);
        assert!(row.failure.is_none());
    }
}
