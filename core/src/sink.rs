//! The persistence sink seam.
//!
//! The sink is the sole place where status transitions are enforced. Every
//! mutation is a single atomic, idempotent operation so at-least-once
//! redelivery cannot corrupt the row.

use crate::stages::StageOutput;
use crate::thought::{NewThought, Thought, ThoughtId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Outcome of [`ThoughtStore::begin_processing`].
#[derive(Clone, Debug, PartialEq)]
pub enum BeginProcessing {
    /// The compare-and-set succeeded; this delivery now owns the row.
    Started {
        /// The row after the transition (attempt counter incremented).
        thought: Box<Thought>,
    },
    /// Another delivery owns the row and is within the grace window.
    Busy,
    /// The row already reached a terminal state; redelivery is a no-op.
    AlreadyTerminal {
        /// The terminal status observed.
        status: crate::thought::ThoughtStatus,
    },
    /// No such thought.
    NotFound,
}

/// A thought the sweeper considers stuck.
#[derive(Clone, Debug, PartialEq)]
pub struct StuckThought {
    /// The stuck row's id.
    pub id: ThoughtId,
    /// Owning user.
    pub user_id: crate::thought::UserId,
    /// Original text, needed to republish the work order.
    pub text: String,
    /// Deliveries attempted so far.
    pub attempt_count: i32,
    /// When the stalled delivery began.
    pub processing_started_at: DateTime<Utc>,
}

/// Sink failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend failure (connection, SQL, serialization).
    #[error("store backend error: {0}")]
    Backend(String),
    /// The referenced thought does not exist.
    #[error("thought not found: {0}")]
    NotFound(ThoughtId),
    /// A transition precondition was violated, e.g. completing a thought
    /// with missing stage outputs.
    #[error("store invariant violated: {0}")]
    Invariant(String),
}

/// Atomic, idempotent access to thought rows.
///
/// Implementations: Postgres in `thoughtflow-postgres`, in-memory in
/// `thoughtflow-testing`.
#[async_trait]
pub trait ThoughtStore: Send + Sync {
    /// Insert a freshly ingested thought in `pending` status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failures.
    async fn insert_pending(&self, thought: NewThought) -> Result<(), StoreError>;

    /// Load a thought row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failures; an absent row is
    /// `Ok(None)`.
    async fn load(&self, id: ThoughtId) -> Result<Option<Thought>, StoreError>;

    /// Atomically claim the row for processing.
    ///
    /// Succeeds when the status is `pending`, `failed`, or `processing` with
    /// `processing_started_at` older than `grace` (a crashed delivery).
    /// Increments the attempt counter and stamps `processing_started_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failures. Contention and
    /// terminal states are reported in [`BeginProcessing`], not as errors.
    async fn begin_processing(
        &self,
        id: ThoughtId,
        grace: Duration,
    ) -> Result<BeginProcessing, StoreError>;

    /// Persist one stage output. A no-op if the slot is already filled
    /// (first-writer-wins under redelivery).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown thought and
    /// [`StoreError::Backend`] on storage failures.
    async fn write_stage(&self, id: ThoughtId, output: &StageOutput) -> Result<(), StoreError>;

    /// Terminal success: requires all five stage slots filled; persists the
    /// embedding and the context version, sets `processed_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invariant`] when a stage slot is empty (the
    /// orchestrator maps this to `permanent/invariant`), otherwise
    /// [`StoreError::NotFound`] / [`StoreError::Backend`].
    async fn complete(
        &self,
        id: ThoughtId,
        embedding: &[f32],
        context_version: i64,
    ) -> Result<(), StoreError>;

    /// Terminal failure. Idempotent: repeating the call leaves the row
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] / [`StoreError::Backend`].
    async fn fail(&self, id: ThoughtId, kind: &str, message: &str) -> Result<(), StoreError>;

    /// Rows in `processing` whose delivery began before `older_than`,
    /// oldest first, bounded by `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on storage failures.
    async fn list_stuck(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StuckThought>, StoreError>;
}
