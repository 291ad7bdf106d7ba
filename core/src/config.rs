//! Statically typed configuration.
//!
//! One struct per concern, loaded from a TOML file. Unknown keys are
//! rejected at parse time (`deny_unknown_fields`) and every section is
//! validated after load, so a typo fails startup instead of silently
//! running with a default.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(String),
    /// The TOML did not match the schema (includes unknown keys).
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    /// A value was out of its valid range.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Which chat-completion provider the LLM adapter talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Anthropic-style messages API.
    Anthropic,
    /// OpenAI-style chat completions API.
    OpenAi,
    /// Gemini-style generateContent API.
    Gemini,
}

impl ProviderKind {
    /// Conventional environment variable holding the provider's API key.
    #[must_use]
    pub const fn api_key_env(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAi => write!(f, "openai"),
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

/// Which embedding backend is in use, if any.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// OpenAI-style embeddings API.
    OpenAi,
    /// Gemini-style embedContent API.
    Gemini,
    /// No backend; the semantic cache is disabled and every lookup misses.
    Disabled,
}

/// Broker (Kafka) settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// Comma-separated bootstrap servers.
    pub bootstrap_servers: String,
    /// Primary work topic.
    pub work_topic: String,
    /// Dead-letter topic.
    pub dlq_topic: String,
    /// Consumer group name.
    pub consumer_group: String,
    /// Partition count of the work topic.
    pub partitions: u32,
    /// Producer retry budget for transient errors.
    pub max_retries: u32,
    /// Producer backoff base in milliseconds.
    pub retry_backoff_ms: u64,
    /// Consumer prefetch batch size.
    pub batch_size: usize,
    /// Producer linger in milliseconds.
    pub linger_ms: u64,
    /// When false the producer degrades to deferred mode: submissions
    /// succeed without publishing and the sweeper picks the thoughts up.
    pub enabled: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            work_topic: "thought-processing".to_string(),
            dlq_topic: "thought-processing-dlq".to_string(),
            consumer_group: "thought-workers".to_string(),
            partitions: 3,
            max_retries: 3,
            retry_backoff_ms: 200,
            batch_size: 16,
            linger_ms: 5,
            enabled: true,
        }
    }
}

impl BrokerConfig {
    /// Validate broker settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] on empty or zero values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bootstrap_servers.is_empty() {
            return Err(ConfigError::Validation(
                "broker.bootstrap_servers cannot be empty".to_string(),
            ));
        }
        if self.work_topic.is_empty() || self.dlq_topic.is_empty() {
            return Err(ConfigError::Validation(
                "broker topics cannot be empty".to_string(),
            ));
        }
        if self.consumer_group.is_empty() {
            return Err(ConfigError::Validation(
                "broker.consumer_group cannot be empty".to_string(),
            ));
        }
        if self.partitions == 0 {
            return Err(ConfigError::Validation(
                "broker.partitions must be > 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Validation(
                "broker.batch_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Producer backoff base as a [`Duration`].
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Fan-out bus settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FanoutConfig {
    /// Bus connection URL (e.g. `redis://127.0.0.1:6379`).
    pub bus_url: String,
    /// Channel name prefix; channels are `<prefix>:<user_id>`.
    pub channel_prefix: String,
    /// SSE heartbeat interval in seconds.
    pub heartbeat_interval_seconds: u64,
    /// Per-gateway-instance cap on concurrent SSE subscriptions.
    pub max_connections_per_instance: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            bus_url: "redis://127.0.0.1:6379".to_string(),
            channel_prefix: "updates".to_string(),
            heartbeat_interval_seconds: 30,
            max_connections_per_instance: 1000,
        }
    }
}

impl FanoutConfig {
    /// Validate fan-out settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] on empty or zero values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus_url.is_empty() {
            return Err(ConfigError::Validation(
                "fanout.bus_url cannot be empty".to_string(),
            ));
        }
        if self.channel_prefix.is_empty() {
            return Err(ConfigError::Validation(
                "fanout.channel_prefix cannot be empty".to_string(),
            ));
        }
        if self.heartbeat_interval_seconds == 0 {
            return Err(ConfigError::Validation(
                "fanout.heartbeat_interval_seconds must be > 0".to_string(),
            ));
        }
        if self.max_connections_per_instance == 0 {
            return Err(ConfigError::Validation(
                "fanout.max_connections_per_instance must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Heartbeat interval as a [`Duration`].
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }
}

/// Semantic cache settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Minimum cosine similarity for a hit. `1.0` degenerates to
    /// exact-embedding match only.
    pub similarity_threshold: f32,
    /// Entry time-to-live in days, fixed at creation.
    pub ttl_days: u32,
    /// Embedding vector dimension; store and lookup both enforce it.
    pub embedding_dimension: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.92,
            ttl_days: 7,
            embedding_dimension: 1536,
        }
    }
}

impl CacheConfig {
    /// Validate cache settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when the threshold is outside
    /// `(0, 1]` or a size is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(ConfigError::Validation(
                "cache.similarity_threshold must be in (0, 1]".to_string(),
            ));
        }
        if self.ttl_days == 0 {
            return Err(ConfigError::Validation(
                "cache.ttl_days must be > 0".to_string(),
            ));
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::Validation(
                "cache.embedding_dimension must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Entry TTL as a [`Duration`].
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_days as u64 * 24 * 60 * 60)
    }
}

/// Pipeline and sweeper settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Internal retries per agent stage for transient failures.
    pub agent_internal_retries: u32,
    /// Delivery budget per thought before the failure is terminal.
    pub pipeline_max_attempts: i32,
    /// Minutes a thought may sit in `processing` before the sweeper acts.
    pub stuck_grace_minutes: u64,
    /// Sweeper cycle interval in seconds.
    pub sweep_interval_seconds: u64,
    /// Maximum stuck rows handled per sweeper cycle.
    pub sweep_batch_limit: usize,
    /// Seconds to let in-flight runs finish on shutdown.
    pub drain_deadline_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            agent_internal_retries: 2,
            pipeline_max_attempts: 3,
            stuck_grace_minutes: 10,
            sweep_interval_seconds: 120,
            sweep_batch_limit: 100,
            drain_deadline_seconds: 60,
        }
    }
}

impl PipelineConfig {
    /// Validate pipeline settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] on zero budgets or windows.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline_max_attempts <= 0 {
            return Err(ConfigError::Validation(
                "pipeline.pipeline_max_attempts must be > 0".to_string(),
            ));
        }
        if self.stuck_grace_minutes == 0 {
            return Err(ConfigError::Validation(
                "pipeline.stuck_grace_minutes must be > 0".to_string(),
            ));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(ConfigError::Validation(
                "pipeline.sweep_interval_seconds must be > 0".to_string(),
            ));
        }
        if self.sweep_batch_limit == 0 {
            return Err(ConfigError::Validation(
                "pipeline.sweep_batch_limit must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Stuck grace window as a [`Duration`].
    #[must_use]
    pub const fn stuck_grace(&self) -> Duration {
        Duration::from_secs(self.stuck_grace_minutes * 60)
    }

    /// Drain deadline as a [`Duration`].
    #[must_use]
    pub const fn drain_deadline(&self) -> Duration {
        Duration::from_secs(self.drain_deadline_seconds)
    }
}

/// Chat-completion adapter settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    /// Which provider to use.
    pub provider: ProviderKind,
    /// Model name passed to the provider.
    pub model: String,
    /// API key; usually left unset here and supplied via the provider's
    /// conventional environment variable instead.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Override of the provider base URL (testing, proxies).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Maximum tokens per generation.
    pub max_output_tokens: u32,
    /// Per-call timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Anthropic,
            model: "claude-sonnet-4-5-20250929".to_string(),
            api_key: None,
            base_url: None,
            max_output_tokens: 1024,
            timeout_seconds: 60,
        }
    }
}

impl LlmConfig {
    /// Validate LLM settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] on empty model or zero limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.is_empty() {
            return Err(ConfigError::Validation(
                "llm.model cannot be empty".to_string(),
            ));
        }
        if self.max_output_tokens == 0 {
            return Err(ConfigError::Validation(
                "llm.max_output_tokens must be > 0".to_string(),
            ));
        }
        if self.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "llm.timeout_seconds must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// The API key from config, falling back to the provider's
    /// conventional environment variable.
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(self.provider.api_key_env()).ok())
    }
}

/// Embedding adapter settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Which backend to use; `disabled` turns the semantic cache off.
    pub provider: EmbeddingProviderKind,
    /// Model name passed to the backend.
    pub model: String,
    /// API key; usually supplied via environment.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Override of the backend base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Per-call timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::OpenAi,
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            base_url: None,
            timeout_seconds: 30,
        }
    }
}

impl EmbeddingConfig {
    /// Validate embedding settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] on an empty model for an enabled
    /// backend.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider != EmbeddingProviderKind::Disabled && self.model.is_empty() {
            return Err(ConfigError::Validation(
                "embedding.model cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Database settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Postgres connection URL.
    pub url: String,
    /// Connection pool size.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/thoughtflow".to_string(),
            max_connections: 10,
        }
    }
}

impl DatabaseConfig {
    /// Validate database settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] on empty URL or a zero pool.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Validation(
                "database.url cannot be empty".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration for both the worker and the gateway.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Broker settings.
    pub broker: BrokerConfig,
    /// Fan-out bus settings.
    pub fanout: FanoutConfig,
    /// Semantic cache settings.
    pub cache: CacheConfig,
    /// Pipeline and sweeper settings.
    pub pipeline: PipelineConfig,
    /// Chat-completion adapter settings.
    pub llm: LlmConfig,
    /// Embedding adapter settings.
    pub embedding: EmbeddingConfig,
    /// Database settings.
    pub database: DatabaseConfig,
}

impl Config {
    /// Parse from a TOML string. Unknown keys are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys
    /// and [`ConfigError::Validation`] for out-of-range values.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate from a file path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read, plus the
    /// errors of [`Config::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml_str(&raw)
    }

    /// Run every section's validation.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Validation`] encountered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker.validate()?;
        self.fanout.validate()?;
        self.cache.validate()?;
        self.pipeline.validate()?;
        self.llm.validate()?;
        self.embedding.validate()?;
        self.database.validate()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let raw = r#"
            [broker]
            bootstrap_servers = "localhost:9092"
            work_topic = "thought-processing"
            dlq_topic = "thought-processing-dlq"
            consumer_group = "thought-workers"
            partitions = 3
            max_retries = 3
            retry_backoff_ms = 200
            batch_size = 16
            linger_ms = 5
            enabled = true
            surprise = "nope"
        "#;
        assert!(matches!(
            Config::from_toml_str(raw),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn unknown_sections_are_rejected() {
        let raw = r#"
            [telemetry]
            enabled = true
        "#;
        assert!(matches!(
            Config::from_toml_str(raw),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let raw = r#"
            [cache]
            similarity_threshold = 1.0
            ttl_days = 1
            embedding_dimension = 8
        "#;
        let config = Config::from_toml_str(raw).unwrap();
        assert!((config.cache.similarity_threshold - 1.0).abs() < f32::EPSILON);
        assert_eq!(config.broker.work_topic, "thought-processing");
        assert_eq!(config.fanout.max_connections_per_instance, 1000);
    }

    #[test]
    fn threshold_range_is_enforced() {
        let mut config = Config::default();
        config.cache.similarity_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));

        config.cache.similarity_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn ttl_duration() {
        let cache = CacheConfig {
            ttl_days: 7,
            ..CacheConfig::default()
        };
        assert_eq!(cache.ttl(), Duration::from_secs(7 * 24 * 3600));
    }

    #[test]
    fn provider_env_vars() {
        assert_eq!(ProviderKind::Anthropic.api_key_env(), "ANTHROPIC_API_KEY");
        assert_eq!(ProviderKind::OpenAi.api_key_env(), "OPENAI_API_KEY");
        assert_eq!(ProviderKind::Gemini.api_key_env(), "GEMINI_API_KEY");
    }
}
