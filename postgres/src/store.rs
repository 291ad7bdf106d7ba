//! The Postgres thought sink.
//!
//! Status transitions are enforced here and nowhere else. Each mutation is
//! one statement whose `WHERE` clause encodes the allowed preconditions, so
//! concurrent deliveries race safely: the loser's update simply matches
//! zero rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::time::Duration;
use thoughtflow_core::sink::{BeginProcessing, StoreError, StuckThought, ThoughtStore};
use thoughtflow_core::stages::{StageName, StageOutput, StageOutputs};
use thoughtflow_core::thought::{
    FailureRecord, NewThought, Thought, ThoughtId, ThoughtStatus, UserId,
};

/// `ThoughtStore` over a shared connection pool.
pub struct PgThoughtStore {
    pool: PgPool,
}

impl PgThoughtStore {
    /// Wrap a pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_thought(row: &PgRow) -> Result<Thought, StoreError> {
        let status_str: String = row.get("status");
        let status = ThoughtStatus::parse(&status_str)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let outputs = StageOutputs {
            classification: decode_stage(row, "classification")?,
            analysis: decode_stage(row, "analysis")?,
            value_impact: decode_stage(row, "value_impact")?,
            action_plan: decode_stage(row, "action_plan")?,
            priority: decode_stage(row, "priority")?,
        };

        let embedding: Option<Vector> = row.get("embedding");
        let error_kind: Option<String> = row.get("error_kind");
        let error_message: Option<String> = row.get("error_message");
        let failure = match (error_kind, error_message) {
            (Some(kind), Some(message)) if status == ThoughtStatus::Failed => {
                Some(FailureRecord { kind, message })
            }
            _ => None,
        };

        Ok(Thought {
            id: ThoughtId(row.get("id")),
            user_id: UserId::new(row.get::<String, _>("user_id")),
            text: row.get("text"),
            status,
            attempt_count: row.get("attempt_count"),
            outputs,
            embedding: embedding.map(|v| v.to_vec()),
            context_version: row.get("context_version"),
            created_at: row.get("created_at"),
            processing_started_at: row.get("processing_started_at"),
            processed_at: row.get("processed_at"),
            failure,
        })
    }
}

fn decode_stage<T: serde::de::DeserializeOwned>(
    row: &PgRow,
    column: &str,
) -> Result<Option<T>, StoreError> {
    let value: Option<serde_json::Value> = row.get(column);
    value
        .map(|v| serde_json::from_value(v))
        .transpose()
        .map_err(|e| StoreError::Backend(format!("corrupt {column} column: {e}")))
}

/// The sink column for a stage. Stage names are a closed enum, so splicing
/// the identifier into SQL is safe.
const fn stage_column(stage: StageName) -> &'static str {
    stage.as_str()
}

const THOUGHT_COLUMNS: &str = "id, user_id, text, status, attempt_count, \
     classification, analysis, value_impact, action_plan, priority, \
     embedding, context_version, error_kind, error_message, \
     created_at, processing_started_at, processed_at";

#[async_trait]
impl ThoughtStore for PgThoughtStore {
    async fn insert_pending(&self, thought: NewThought) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO thoughts (id, user_id, text, status) VALUES ($1, $2, $3, 'pending')",
        )
        .bind(thought.id.0)
        .bind(thought.user_id.as_str())
        .bind(&thought.text)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        tracing::debug!(thought_id = %thought.id, user_id = %thought.user_id, "thought ingested");
        Ok(())
    }

    async fn load(&self, id: ThoughtId) -> Result<Option<Thought>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {THOUGHT_COLUMNS} FROM thoughts WHERE id = $1"
        ))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.as_ref().map(Self::row_to_thought).transpose()
    }

    async fn begin_processing(
        &self,
        id: ThoughtId,
        grace: Duration,
    ) -> Result<BeginProcessing, StoreError> {
        // One CAS: claimable when pending, failed, or processing past the
        // grace window (a crashed delivery). Attempt counter only ever
        // increments here.
        let claimed = sqlx::query(&format!(
            "UPDATE thoughts SET status = 'processing', \
                 attempt_count = attempt_count + 1, \
                 processing_started_at = NOW() \
             WHERE id = $1 AND (status IN ('pending', 'failed') \
                OR (status = 'processing' \
                    AND processing_started_at < NOW() - make_interval(secs => $2))) \
             RETURNING {THOUGHT_COLUMNS}"
        ))
        .bind(id.0)
        .bind(grace.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        if let Some(row) = claimed {
            let thought = Self::row_to_thought(&row)?;
            return Ok(BeginProcessing::Started {
                thought: Box::new(thought),
            });
        }

        // The CAS matched nothing: terminal, busy, or missing.
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM thoughts WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match status.as_deref() {
            None => Ok(BeginProcessing::NotFound),
            Some("processing") => Ok(BeginProcessing::Busy),
            Some(terminal) => {
                let status = ThoughtStatus::parse(terminal)
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                Ok(BeginProcessing::AlreadyTerminal { status })
            }
        }
    }

    async fn write_stage(&self, id: ThoughtId, output: &StageOutput) -> Result<(), StoreError> {
        let column = stage_column(output.stage());
        let value = output
            .to_json()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let result = sqlx::query(&format!(
            "UPDATE thoughts SET {column} = $2 \
             WHERE id = $1 AND {column} IS NULL AND status = 'processing'"
        ))
        .bind(id.0)
        .bind(&value)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            // First-writer-wins: a filled slot is a silent no-op, but a
            // missing row is an error.
            let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM thoughts WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            if exists.is_none() {
                return Err(StoreError::NotFound(id));
            }
            tracing::debug!(thought_id = %id, stage = column, "stage already written, no-op");
        }
        Ok(())
    }

    async fn complete(
        &self,
        id: ThoughtId,
        embedding: &[f32],
        context_version: i64,
    ) -> Result<(), StoreError> {
        let vector = (!embedding.is_empty()).then(|| Vector::from(embedding.to_vec()));

        let result = sqlx::query(
            "UPDATE thoughts SET status = 'completed', processed_at = NOW(), \
                 embedding = $2, context_version = $3, \
                 error_kind = NULL, error_message = NULL \
             WHERE id = $1 AND status = 'processing' \
               AND classification IS NOT NULL AND analysis IS NOT NULL \
               AND value_impact IS NOT NULL AND action_plan IS NOT NULL \
               AND priority IS NOT NULL",
        )
        .bind(id.0)
        .bind(vector)
        .bind(context_version)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        if result.rows_affected() > 0 {
            metrics::counter!("sink.completed").increment(1);
            return Ok(());
        }

        // Distinguish the idempotent redelivery from a real violation.
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM thoughts WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match status.as_deref() {
            None => Err(StoreError::NotFound(id)),
            Some("completed") => Ok(()),
            Some(_) => Err(StoreError::Invariant(format!(
                "cannot complete thought {id}: not all stage outputs are present"
            ))),
        }
    }

    async fn fail(&self, id: ThoughtId, kind: &str, message: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE thoughts SET status = 'failed', processed_at = NOW(), \
                 error_kind = $2, error_message = $3 \
             WHERE id = $1 AND status != 'completed'",
        )
        .bind(id.0)
        .bind(kind)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM thoughts WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            if exists.is_none() {
                return Err(StoreError::NotFound(id));
            }
            // Completed rows stay completed; failing them would break
            // status monotonicity.
            tracing::warn!(thought_id = %id, "fail() on completed thought ignored");
            return Ok(());
        }

        metrics::counter!("sink.failed", "kind" => kind.to_string()).increment(1);
        tracing::warn!(thought_id = %id, kind, "thought failed terminally");
        Ok(())
    }

    async fn list_stuck(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StuckThought>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, user_id, text, attempt_count, processing_started_at \
             FROM thoughts \
             WHERE status = 'processing' AND processing_started_at < $1 \
             ORDER BY processing_started_at ASC \
             LIMIT $2",
        )
        .bind(older_than)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| StuckThought {
                id: ThoughtId(row.get("id")),
                user_id: UserId::new(row.get::<String, _>("user_id")),
                text: row.get("text"),
                attempt_count: row.get("attempt_count"),
                processing_started_at: row.get("processing_started_at"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_columns_match_wire_names() {
        assert_eq!(stage_column(StageName::Classification), "classification");
        assert_eq!(stage_column(StageName::ValueImpact), "value_impact");
        assert_eq!(stage_column(StageName::Priority), "priority");
    }

    #[test]
    fn column_list_has_all_stage_slots() {
        for stage in StageName::ALL {
            assert!(THOUGHT_COLUMNS.contains(stage.as_str()));
        }
    }
}
