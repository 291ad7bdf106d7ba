//! Thoughtflow gateway: ingest + SSE streaming.
//!
//! Usage: `gateway [config.toml]` (default `thoughtflow.toml`). The listen
//! address comes from `THOUGHTFLOW_LISTEN` (default `0.0.0.0:8080`).

use std::sync::Arc;
use thoughtflow_broker::KafkaThoughtProducer;
use thoughtflow_core::clock::SystemClock;
use thoughtflow_core::config::Config;
use thoughtflow_fanout::RedisProgressBus;
use thoughtflow_postgres::PgThoughtStore;
use thoughtflow_web::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "thoughtflow.toml".to_string());
    let config = Config::load(&config_path)?;

    let pool = thoughtflow_postgres::connect(&config.database).await?;
    thoughtflow_postgres::MIGRATOR.run(&pool).await?;

    let state = AppState::new(
        Arc::new(PgThoughtStore::new(pool)),
        Arc::new(KafkaThoughtProducer::from_config(&config.broker)?),
        Arc::new(RedisProgressBus::connect(&config.fanout).await?),
        Arc::new(SystemClock),
        config.fanout.clone(),
    );

    let listen =
        std::env::var("THOUGHTFLOW_LISTEN").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!(%listen, "gateway listening");

    axum::serve(listener, thoughtflow_web::router(state)).await?;
    Ok(())
}
