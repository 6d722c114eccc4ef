use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Args, ValueEnum};
use thiserror::Error;

use crate::redis_client;
use crate::store::{BucketWidth, MemoryBackend, MetricBackend, MetricStore, RedisBackend};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no target URLs configured (set URLS or --urls)")]
    MissingUrls,

    #[error("URLS contains an empty entry")]
    EmptyUrl,

    #[error("target `{url}` is not a valid http(s) URL: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("MODULO must be a positive number of seconds")]
    ZeroBucketWidth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

// ─── Shared settings ─────────────────────────────────────────────

/// Settings shared by every subcommand. Each flag falls back to its
/// environment variable.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Comma-separated URLs to probe; also the query allow-list
    #[arg(long, env = "URLS", value_delimiter = ',', global = true)]
    pub urls: Vec<String>,

    /// Redis endpoint backing the metric store
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379/", global = true)]
    pub redis_url: String,

    /// Key namespace the store writes under
    #[arg(long = "table", env = "STORE_TABLE", default_value = "uptime", global = true)]
    pub table: String,

    /// Bucket width in seconds
    #[arg(long, env = "MODULO", default_value_t = BucketWidth::DEFAULT_SECS, global = true)]
    pub modulo: u32,

    /// Provision the store schema on startup
    #[arg(long, env = "INIT_STORE", global = true)]
    pub init_store: bool,

    /// Storage backend
    #[arg(long, env = "STORE_BACKEND", value_enum, default_value_t = BackendKind::Redis, global = true)]
    pub backend: BackendKind,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,
}

/// Options of the HTTP reporting server.
#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address the web server binds to
    #[arg(long, env = "SERVICE_ADDRESS", default_value = "0.0.0.0:3000")]
    pub address: SocketAddr,
}

impl Settings {
    /// Trimmed, validated, de-duplicated target list (first occurrence
    /// wins). Fails when nothing is configured.
    pub fn target_urls(&self) -> Result<Vec<String>, ConfigError> {
        if self.urls.is_empty() {
            return Err(ConfigError::MissingUrls);
        }

        let mut targets: Vec<String> = Vec::with_capacity(self.urls.len());
        for raw in &self.urls {
            let candidate = raw.trim();
            if candidate.is_empty() {
                return Err(ConfigError::EmptyUrl);
            }
            let parsed = url::Url::parse(candidate).map_err(|e| ConfigError::InvalidUrl {
                url: candidate.to_string(),
                reason: e.to_string(),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidUrl {
                    url: candidate.to_string(),
                    reason: format!("unsupported scheme `{}`", parsed.scheme()),
                });
            }
            if !targets.iter().any(|t| t == candidate) {
                targets.push(candidate.to_string());
            }
        }
        Ok(targets)
    }

    pub fn bucket_width(&self) -> Result<BucketWidth, ConfigError> {
        BucketWidth::from_secs(self.modulo).ok_or(ConfigError::ZeroBucketWidth)
    }

    /// Builds the configured store handle, provisioning it when asked.
    pub async fn open_store(&self) -> anyhow::Result<MetricStore> {
        let width = self.bucket_width()?;

        let backend: Arc<dyn MetricBackend> = match self.backend {
            BackendKind::Memory => {
                tracing::warn!("using the in-memory store; data is lost on exit");
                Arc::new(MemoryBackend::new(self.table.clone()))
            }
            BackendKind::Redis => {
                tracing::info!(redis_url = %self.redis_url, table = %self.table, "connecting to Redis");
                let conn = redis_client::connect(&self.redis_url).await?;
                Arc::new(RedisBackend::new(conn, self.table.clone()))
            }
        };

        let store = MetricStore::new(backend, width);
        if self.init_store {
            store.init().await?;
        }
        Ok(store)
    }
}
