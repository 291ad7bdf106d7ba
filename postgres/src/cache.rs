//! The pgvector semantic cache.
//!
//! One row per stored pipeline result, scoped to a user, expiring a fixed
//! TTL after creation. Lookup is a cosine nearest-neighbour query over the
//! user's non-expired entries; ties on distance break on the most recent
//! `created_at`. Expired rows are reaped lazily on write.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::{PgPool, Row};
use thoughtflow_core::cache::{CacheError, CacheHit, SemanticCache};
use thoughtflow_core::config::CacheConfig;
use thoughtflow_core::stages::CompletedOutputs;
use thoughtflow_core::thought::UserId;
use uuid::Uuid;

/// `SemanticCache` over a shared connection pool.
pub struct PgSemanticCache {
    pool: PgPool,
    config: CacheConfig,
}

impl PgSemanticCache {
    /// Wrap a pool with cache settings.
    #[must_use]
    pub const fn new(pool: PgPool, config: CacheConfig) -> Self {
        Self { pool, config }
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<(), CacheError> {
        if embedding.len() != self.config.embedding_dimension {
            return Err(CacheError::DimensionMismatch {
                got: embedding.len(),
                expected: self.config.embedding_dimension,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SemanticCache for PgSemanticCache {
    async fn lookup(
        &self,
        user_id: &UserId,
        embedding: &[f32],
    ) -> Result<Option<CacheHit>, CacheError> {
        self.check_dimension(embedding)?;
        let query_vector = Vector::from(embedding.to_vec());

        // `<=>` is cosine distance; similarity = 1 - distance. Expired
        // entries are invisible regardless of whether reaping ran.
        let row = sqlx::query(
            "SELECT id, outputs, 1 - (embedding <=> $2) AS similarity \
             FROM cache_entries \
             WHERE user_id = $1 AND expires_at > NOW() \
             ORDER BY embedding <=> $2 ASC, created_at DESC \
             LIMIT 1",
        )
        .bind(user_id.as_str())
        .bind(&query_vector)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CacheError::Backend(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let similarity: f64 = row.get("similarity");
        #[allow(clippy::cast_possible_truncation)]
        let similarity = similarity as f32;
        if similarity < self.config.similarity_threshold {
            return Ok(None);
        }

        let outputs: serde_json::Value = row.get("outputs");
        let outputs: CompletedOutputs =
            serde_json::from_value(outputs).map_err(|e| CacheError::Decode(e.to_string()))?;

        let entry_id: Uuid = row.get("id");
        sqlx::query(
            "UPDATE cache_entries SET hit_count = hit_count + 1, last_hit_at = NOW() \
             WHERE id = $1",
        )
        .bind(entry_id)
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Backend(e.to_string()))?;

        tracing::debug!(user_id = %user_id, similarity, "semantic cache hit");
        Ok(Some(CacheHit {
            outputs,
            similarity,
        }))
    }

    async fn store(
        &self,
        user_id: &UserId,
        text: &str,
        embedding: &[f32],
        outputs: &CompletedOutputs,
    ) -> Result<(), CacheError> {
        self.check_dimension(embedding)?;
        let vector = Vector::from(embedding.to_vec());
        let payload =
            serde_json::to_value(outputs).map_err(|e| CacheError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO cache_entries (id, user_id, text, embedding, outputs, expires_at) \
             VALUES ($1, $2, $3, $4, $5, NOW() + make_interval(secs => $6))",
        )
        .bind(Uuid::new_v4())
        .bind(user_id.as_str())
        .bind(text)
        .bind(&vector)
        .bind(&payload)
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Backend(e.to_string()))?;

        // Lazy reap: clear this user's expired entries while we are here.
        let reaped = sqlx::query(
            "DELETE FROM cache_entries WHERE user_id = $1 AND expires_at <= NOW()",
        )
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Backend(e.to_string()))?;

        if reaped.rows_affected() > 0 {
            tracing::debug!(
                user_id = %user_id,
                reaped = reaped.rows_affected(),
                "reaped expired cache entries"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_is_reported() {
        let config = CacheConfig {
            embedding_dimension: 4,
            ..CacheConfig::default()
        };
        let err = CacheError::DimensionMismatch {
            got: 3,
            expected: config.embedding_dimension,
        };
        assert!(err.to_string().contains("got 3"));
        assert!(err.to_string().contains("expected 4"));
    }
}
