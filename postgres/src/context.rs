//! Read-only user context loading.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use thoughtflow_core::context::{ContextError, UserContext, UserContextStore, ValuesRanking};
use thoughtflow_core::thought::UserId;

/// `UserContextStore` over a shared connection pool.
pub struct PgUserContextStore {
    pool: PgPool,
}

impl PgUserContextStore {
    /// Wrap a pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserContextStore for PgUserContextStore {
    async fn load(&self, user_id: &UserId) -> Result<Option<UserContext>, ContextError> {
        let row = sqlx::query(
            "SELECT user_id, version, profile, values_ranking, energy_constraints \
             FROM user_contexts WHERE user_id = $1",
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ContextError::Load(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let values_ranking: serde_json::Value = row.get("values_ranking");
        let values_ranking: ValuesRanking = serde_json::from_value(values_ranking)
            .map_err(|e| ContextError::Malformed(format!("values_ranking: {e}")))?;

        Ok(Some(UserContext {
            user_id: UserId::new(row.get::<String, _>("user_id")),
            version: row.get("version"),
            profile: row.get("profile"),
            values_ranking,
            energy_constraints: row.get("energy_constraints"),
        }))
    }
}
