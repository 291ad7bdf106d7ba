//! User context: the read-only profile every agent consumes.

use crate::stages::ValueDimension;
use crate::thought::UserId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum serialized profile size the pipeline accepts, in bytes.
pub const MAX_PROFILE_BYTES: usize = 4096;

/// Relative weights of the five value dimensions, from the user's ranking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValuesRanking {
    /// Weight of the economic dimension.
    pub economic: f64,
    /// Weight of the relational dimension.
    pub relational: f64,
    /// Weight of the legacy dimension.
    pub legacy: f64,
    /// Weight of the health dimension.
    pub health: f64,
    /// Weight of the growth dimension.
    pub growth: f64,
}

impl ValuesRanking {
    /// Weight for one dimension.
    #[must_use]
    pub const fn weight_for(&self, dimension: ValueDimension) -> f64 {
        match dimension {
            ValueDimension::Economic => self.economic,
            ValueDimension::Relational => self.relational,
            ValueDimension::Legacy => self.legacy,
            ValueDimension::Health => self.health,
            ValueDimension::Growth => self.growth,
        }
    }
}

impl Default for ValuesRanking {
    /// Equal weights.
    fn default() -> Self {
        Self {
            economic: 1.0,
            relational: 1.0,
            legacy: 1.0,
            health: 1.0,
            growth: 1.0,
        }
    }
}

/// The user profile as the pipeline sees it.
///
/// The `profile` blob (demographics, goals, constraints) is opaque to the
/// core: it is rendered into agent prompts verbatim. Only the values ranking
/// and the energy/time constraints are consumed structurally.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    /// Owning user.
    pub user_id: UserId,
    /// Monotonically increasing version; recorded on each processed thought.
    pub version: i64,
    /// Opaque profile object, at most [`MAX_PROFILE_BYTES`] serialized.
    pub profile: serde_json::Value,
    /// Value-dimension weights used by the A3 weighted total.
    pub values_ranking: ValuesRanking,
    /// Free-text energy/time constraints consulted by A4 timing hints.
    #[serde(default)]
    pub energy_constraints: Option<String>,
}

impl UserContext {
    /// Check the profile blob against the size bound.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::ProfileTooLarge`] when the serialized profile
    /// exceeds [`MAX_PROFILE_BYTES`].
    pub fn validate(&self) -> Result<(), ContextError> {
        let bytes = serde_json::to_vec(&self.profile)
            .map_err(|e| ContextError::Malformed(e.to_string()))?
            .len();
        if bytes > MAX_PROFILE_BYTES {
            return Err(ContextError::ProfileTooLarge { bytes });
        }
        Ok(())
    }
}

/// Errors from the user-context store.
#[derive(Debug, Error)]
pub enum ContextError {
    /// Backend failure while loading.
    #[error("context load failed: {0}")]
    Load(String),
    /// The stored profile could not be decoded.
    #[error("malformed user context: {0}")]
    Malformed(String),
    /// The profile blob exceeds the documented bound.
    #[error("profile is {bytes} bytes, max {MAX_PROFILE_BYTES}")]
    ProfileTooLarge {
        /// Observed serialized size.
        bytes: usize,
    },
}

/// Read-only access to user contexts.
#[async_trait]
pub trait UserContextStore: Send + Sync {
    /// Load the current context for a user, or `None` if the user is
    /// unknown.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] on backend failures; an absent user is
    /// `Ok(None)`, not an error.
    async fn load(&self, user_id: &UserId) -> Result<Option<UserContext>, ContextError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn ranking_weight_lookup() {
        let ranking = ValuesRanking {
            economic: 5.0,
            relational: 4.0,
            legacy: 3.0,
            health: 2.0,
            growth: 1.0,
        };
        assert!((ranking.weight_for(ValueDimension::Economic) - 5.0).abs() < f64::EPSILON);
        assert!((ranking.weight_for(ValueDimension::Growth) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn profile_size_bound() {
        let context = UserContext {
            user_id: UserId::new("u1"),
            version: 1,
            profile: serde_json::json!({ "goals": ["learn rust"] }),
            values_ranking: ValuesRanking::default(),
            energy_constraints: None,
        };
        assert!(context.validate().is_ok());

        let oversized = UserContext {
            profile: serde_json::json!({ "blob": "x".repeat(MAX_PROFILE_BYTES) }),
            ..context
        };
        assert!(matches!(
            oversized.validate(),
            Err(ContextError::ProfileTooLarge { .. })
        ));
    }
}
