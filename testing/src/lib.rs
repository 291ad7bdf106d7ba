//! # Thoughtflow Testing
//!
//! In-memory implementations of every core seam, plus fixtures, for fast
//! deterministic tests. The fakes honour the same contracts as the
//! production implementations (the thought store enforces the full status
//! machine, the cache computes real cosine similarity with TTL filtering,
//! the bus preserves per-user publish order) so the pipeline scenario
//! suite runs against them unchanged.

pub mod bus;
pub mod cache;
pub mod clock;
pub mod context;
pub mod fixtures;
pub mod llm;
pub mod producer;
pub mod store;

pub use bus::InMemoryProgressBus;
pub use cache::InMemorySemanticCache;
pub use clock::{FixedClock, test_clock};
pub use context::InMemoryContextStore;
pub use fixtures::{sample_completed_outputs, sample_user_context};
pub use llm::{MockEmbedder, ScriptedLlm};
pub use producer::RecordingProducer;
pub use store::InMemoryThoughtStore;
