//! The semantic cache seam and the cosine similarity it is built on.
//!
//! The cache is a best-effort guard in front of the whole pipeline: any
//! internal error (including the embedding backend being unavailable) is
//! swallowed by the caller and treated as a miss. The cache must never cause
//! a thought to fail.

use crate::stages::CompletedOutputs;
use crate::thought::UserId;
use async_trait::async_trait;
use thiserror::Error;

/// A successful cache lookup.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheHit {
    /// The stored five-stage outputs, returned verbatim.
    pub outputs: CompletedOutputs,
    /// Cosine similarity of the winning entry.
    pub similarity: f32,
}

/// Cache-internal failures. Callers downgrade every variant to a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Storage backend failure.
    #[error("cache backend error: {0}")]
    Backend(String),
    /// The query or stored vector has the wrong dimension.
    #[error("embedding dimension mismatch: got {got}, expected {expected}")]
    DimensionMismatch {
        /// Observed vector length.
        got: usize,
        /// Configured dimension.
        expected: usize,
    },
    /// A stored payload could not be decoded.
    #[error("cache entry decode failed: {0}")]
    Decode(String),
}

/// Per-user vector-similarity store over completed pipeline outputs.
///
/// Implementations: Postgres + pgvector in `thoughtflow-postgres`,
/// in-memory in `thoughtflow-testing`.
#[async_trait]
pub trait SemanticCache: Send + Sync {
    /// Find the best non-expired entry for this user with
    /// `similarity ≥ threshold`. The highest similarity wins; ties break on
    /// the most recent `created_at`. A hit increments the entry's hit
    /// counter and stamps `last_hit_at`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] on backend failures; callers treat errors as
    /// misses.
    async fn lookup(
        &self,
        user_id: &UserId,
        embedding: &[f32],
    ) -> Result<Option<CacheHit>, CacheError>;

    /// Store a new entry. Does not deduplicate; duplicate entries for the
    /// same text converge via TTL expiry.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] on backend failures; callers log and continue.
    async fn store(
        &self,
        user_id: &UserId,
        text: &str,
        embedding: &[f32],
        outputs: &CompletedOutputs,
    ) -> Result<(), CacheError>;
}

/// Cosine similarity of two equal-length vectors.
///
/// Returns `None` when the lengths differ or either vector has zero norm,
/// so degenerate embeddings can never produce a spurious hit.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = [0.3f32, -0.5, 0.8];
        let sim = cosine_similarity(&v, &v).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn opposite_vectors_have_similarity_minus_one() {
        let a = [2.0f32, 1.0];
        let b = [-2.0f32, -1.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn mismatched_or_zero_vectors_yield_none() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), None);
        assert_eq!(cosine_similarity(&[], &[]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), None);
    }

    proptest! {
        #[test]
        fn similarity_is_bounded(
            a in proptest::collection::vec(-10.0f32..10.0, 8),
            b in proptest::collection::vec(-10.0f32..10.0, 8),
        ) {
            if let Some(sim) = cosine_similarity(&a, &b) {
                prop_assert!((-1.0 - 1e-5..=1.0 + 1e-5).contains(&sim));
            }
        }

        #[test]
        fn similarity_is_symmetric(
            a in proptest::collection::vec(-10.0f32..10.0, 8),
            b in proptest::collection::vec(-10.0f32..10.0, 8),
        ) {
            prop_assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
        }
    }
}
