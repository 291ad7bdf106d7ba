//! # Thoughtflow Postgres
//!
//! Postgres implementations of the core persistence seams:
//!
//! - [`store::PgThoughtStore`]: the thought sink; every status transition
//!   is a single compare-and-set statement, stage writes are
//!   first-writer-wins
//! - [`cache::PgSemanticCache`]: per-user pgvector similarity cache with
//!   TTL expiry and lazy reaping
//! - [`context::PgUserContextStore`]: read-only user contexts
//!
//! The sink is the sole writer of thought status; any collaborator that
//! touches thought rows must go through [`store::PgThoughtStore`].

pub mod cache;
pub mod context;
pub mod store;

pub use cache::PgSemanticCache;
pub use context::PgUserContextStore;
pub use store::PgThoughtStore;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, migrate::Migrator};
use thoughtflow_core::config::DatabaseConfig;

/// Embedded migrations for the thoughtflow schema.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Open a connection pool from configuration.
///
/// # Errors
///
/// Returns [`sqlx::Error`] when the database is unreachable.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;
    tracing::info!(max_connections = config.max_connections, "database pool ready");
    Ok(pool)
}
