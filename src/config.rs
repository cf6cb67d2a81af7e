//! Process configuration, loaded once at startup from the environment.
//!
//! Field set mirrors the original Python service's settings object
//! (database/object-store credentials, registry endpoints, fetcher and
//! embedding tuning, loop intervals). Validation is eager: a missing
//! required key fails fast before any loop starts.

use serde::Deserialize;

fn default_fetcher_max_retries() -> u32 { 3 }
fn default_fetcher_timeout_secs() -> u64 { 30 }
fn default_embedding_batch_size() -> usize { 32 }
fn default_embedding_chunk_size() -> usize { 512 }
fn default_embedding_dimension() -> usize { 1536 }
fn default_discovery_interval_minutes() -> u64 { 15 }
fn default_reconciliation_interval_hours() -> u64 { 6 }
fn default_parser_confidence_threshold() -> f32 { 0.5 }
fn default_storage_type() -> String { "local".to_string() }
fn default_storage_path() -> String { "./data/raw".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }
fn default_health_port() -> u16 { 9100 }
fn default_kafka_enabled() -> bool { false }
fn default_reconciliation_batch_size() -> i64 { 100 }

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_storage_type")]
    pub storage_type: String,
    #[serde(default = "default_storage_path")]
    pub storage_path: String,
    pub minio_endpoint: Option<String>,
    pub minio_access_key: Option<String>,
    pub minio_secret_key: Option<String>,
    pub minio_bucket_name: Option<String>,
    #[serde(default)]
    pub minio_use_ssl: bool,

    pub court_registry_base_url: String,
    #[serde(default = "default_rss_endpoint")]
    pub court_registry_rss_endpoint: String,
    #[serde(default = "default_search_endpoint")]
    pub court_registry_search_endpoint: String,

    pub fetcher_workers: usize,
    #[serde(default = "default_fetcher_max_retries")]
    pub fetcher_max_retries: u32,
    #[serde(default = "default_fetcher_timeout_secs")]
    pub fetcher_timeout_secs: u64,

    pub embedding_api_base: String,
    pub embedding_api_key: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
    #[serde(default = "default_embedding_chunk_size")]
    pub embedding_chunk_size: usize,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    #[serde(default = "default_discovery_interval_minutes")]
    pub discovery_interval_minutes: u64,
    #[serde(default = "default_reconciliation_interval_hours")]
    pub reconciliation_interval_hours: u64,
    #[serde(default = "default_reconciliation_batch_size")]
    pub reconciliation_batch_size: i64,

    #[serde(default = "default_parser_confidence_threshold")]
    pub parser_confidence_threshold: f32,
    #[serde(default = "default_parser_version")]
    pub parser_version: String,

    #[serde(default = "default_kafka_enabled")]
    pub kafka_enabled: bool,
    pub kafka_bootstrap_servers: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,

    #[serde(default = "default_health_port")]
    pub health_port: u16,
}

fn default_rss_endpoint() -> String { "/RSS".to_string() }
fn default_search_endpoint() -> String { "/Search".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_parser_version() -> String { "1.0.0".to_string() }

impl Config {
    /// Loads configuration from the process environment, validating eagerly.
    ///
    /// Required keys without a default (`database_url`, `court_registry_base_url`,
    /// `fetcher_workers`, `embedding_api_base`) cause a descriptive error rather
    /// than a panic deep inside a loop.
    pub fn load() -> anyhow::Result<Self> {
        let cfg: Config = envy::from_env()
            .map_err(|e| anyhow::anyhow!("failed to load configuration from environment: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.fetcher_workers == 0 {
            anyhow::bail!("fetcher_workers must be >= 1");
        }
        if self.embedding_dimension == 0 {
            anyhow::bail!("embedding_dimension must be >= 1");
        }
        if self.storage_type == "minio"
            && (self.minio_endpoint.is_none() || self.minio_bucket_name.is_none())
        {
            anyhow::bail!("storage_type=minio requires minio_endpoint and minio_bucket_name");
        }
        Ok(())
    }
}
