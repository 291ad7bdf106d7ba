//! Thoughtflow worker: broker consumer, pipeline, recovery sweeper.
//!
//! Usage: `worker [config.toml]` (default `thoughtflow.toml`). Secrets come
//! from the environment (`ANTHROPIC_API_KEY` etc.), optionally via `.env`.

use metrics_exporter_prometheus::PrometheusBuilder;
use thoughtflow_core::config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(err) = PrometheusBuilder::new().install() {
        tracing::warn!(error = %err, "metrics exporter not installed, continuing without");
    }

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "thoughtflow.toml".to_string());
    let config = Config::load(&config_path)?;
    tracing::info!(config = %config_path, "configuration loaded");

    thoughtflow_runtime::run_worker(config).await
}
