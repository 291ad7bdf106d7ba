//! In-memory semantic cache with real similarity and TTL semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use thoughtflow_core::cache::{CacheError, CacheHit, SemanticCache, cosine_similarity};
use thoughtflow_core::clock::Clock;
use thoughtflow_core::config::CacheConfig;
use thoughtflow_core::stages::CompletedOutputs;
use thoughtflow_core::thought::UserId;

struct Entry {
    user_id: UserId,
    embedding: Vec<f32>,
    outputs: CompletedOutputs,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    hit_count: u32,
}

/// Vec-backed `SemanticCache` with cosine lookup, threshold, TTL filtering
/// and hit accounting, matching the observable behaviour of the pgvector
/// store.
pub struct InMemorySemanticCache {
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    entries: Mutex<Vec<Entry>>,
    fail_lookups: Mutex<bool>,
}

impl InMemorySemanticCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            clock,
            config,
            entries: Mutex::new(Vec::new()),
            fail_lookups: Mutex::new(false),
        }
    }

    /// Make every subsequent lookup fail, to exercise the swallow-to-miss
    /// contract at the call site.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[allow(clippy::unwrap_used)]
    pub fn fail_lookups(&self) {
        *self.fail_lookups.lock().unwrap() = true;
    }

    /// Number of stored (non-reaped) entries.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit count of the entry storing exactly this embedding.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn hit_count_for(&self, embedding: &[f32]) -> Option<u32> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.embedding == embedding)
            .map(|e| e.hit_count)
    }
}

#[async_trait]
impl SemanticCache for InMemorySemanticCache {
    async fn lookup(
        &self,
        user_id: &UserId,
        embedding: &[f32],
    ) -> Result<Option<CacheHit>, CacheError> {
        if *self
            .fail_lookups
            .lock()
            .map_err(|_| CacheError::Backend("cache lock poisoned".to_string()))?
        {
            return Err(CacheError::Backend("injected lookup failure".to_string()));
        }
        if embedding.len() != self.config.embedding_dimension {
            return Err(CacheError::DimensionMismatch {
                got: embedding.len(),
                expected: self.config.embedding_dimension,
            });
        }

        let now = self.clock.now();
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Backend("cache lock poisoned".to_string()))?;

        // Best similarity wins; ties break on the most recent created_at.
        let mut best: Option<(usize, f32)> = None;
        for (index, entry) in entries.iter().enumerate() {
            if entry.user_id != *user_id || entry.expires_at <= now {
                continue;
            }
            let Some(similarity) = cosine_similarity(embedding, &entry.embedding) else {
                continue;
            };
            if similarity < self.config.similarity_threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_index, best_similarity)) => {
                    similarity > best_similarity
                        || (similarity == best_similarity
                            && entry.created_at > entries[best_index].created_at)
                }
            };
            if better {
                best = Some((index, similarity));
            }
        }

        Ok(best.map(|(index, similarity)| {
            let entry = &mut entries[index];
            entry.hit_count += 1;
            CacheHit {
                outputs: entry.outputs.clone(),
                similarity,
            }
        }))
    }

    async fn store(
        &self,
        user_id: &UserId,
        _text: &str,
        embedding: &[f32],
        outputs: &CompletedOutputs,
    ) -> Result<(), CacheError> {
        if embedding.len() != self.config.embedding_dimension {
            return Err(CacheError::DimensionMismatch {
                got: embedding.len(),
                expected: self.config.embedding_dimension,
            });
        }
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.config.ttl())
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Backend("cache lock poisoned".to_string()))?;
        // Lazy reap on write, like the production store.
        entries.retain(|e| e.expires_at > now);
        entries.push(Entry {
            user_id: user_id.clone(),
            embedding: embedding.to_vec(),
            outputs: outputs.clone(),
            created_at: now,
            expires_at: now + ttl,
            hit_count: 0,
        });
        Ok(())
    }
}
