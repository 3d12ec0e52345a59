//! Runtime configuration.
//!
//! Layered as: built-in defaults, then an optional config file (TOML, YAML or JSON by
//! extension), then `CATALOG__SECTION__KEY` environment variables, then CLI flags.

use crate::error::CatalogError;
use crate::ingestion::types::PipelineSettings;
use crate::processing::processor::ProcessorSettings;
use crate::processing::worker::WorkerSettings;
use crate::queue::DEFAULT_CHANNEL;
use crate::retrieval::service::RetrievalSettings;

use anyhow::Context;
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "CATALOG";

#[derive(Parser, Debug, Default)]
#[command(name = "product-catalog", version, about = "Product catalog service with background image processing")]
pub struct Cli {
    /// Path to a config file (toml, yaml or json)
    #[arg(long, env = "CATALOG_CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP listen address, e.g. 127.0.0.1:8080
    #[arg(long)]
    pub bind: Option<String>,

    /// Number of image workers
    #[arg(long)]
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: Backend,
    pub redis_url: Option<String>,
    /// Absent means entries never expire.
    pub ttl_secs: Option<u64>,
    pub timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            redis_url: None,
            ttl_secs: None,
            timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: Backend,
    pub redis_url: Option<String>,
    pub channel: String,
    pub key_prefix: String,
    /// Stable name of this process on the queue. A fresh unique name is used when unset.
    pub consumer_id: Option<String>,
    pub lease_secs: u64,
    pub timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            redis_url: None,
            channel: DEFAULT_CHANNEL.to_string(),
            key_prefix: "catalog:".to_string(),
            consumer_id: None,
            lease_secs: 30,
            timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { timeout_ms: 2000 }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessingConfig {
    pub workers: usize,
    pub max_width: u32,
    pub jpeg_quality: u8,
    pub output_dir: PathBuf,
    pub fetch_timeout_ms: u64,
    /// Larger originals are rejected without being buffered.
    pub max_image_bytes: u64,
    pub max_attempts: u32,
    pub link_derived: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_width: 800,
            jpeg_quality: 85,
            output_dir: PathBuf::from("derived"),
            fetch_timeout_ms: 10_000,
            max_image_bytes: 20 * 1024 * 1024,
            max_attempts: 3,
            link_derived: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub store: StoreConfig,
    pub processing: ProcessingConfig,
}

/// `CATALOG__CACHE__BACKEND=redis` sets `cache.backend`.
pub fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

impl Settings {
    /// Loads settings for the process: file from the CLI (if any), process environment,
    /// then CLI flags.
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut settings = Self::from_sources(cli.config.as_deref(), environment())?;
        settings.apply_cli(cli);
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_sources(file: Option<&Path>, env: Environment) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let raw = builder
            .add_source(env)
            .build()
            .with_context(|| match file {
                Some(path) => format!("failed to read configuration from {}", path.display()),
                None => "failed to read configuration from the environment".to_string(),
            })?;

        raw.try_deserialize::<Settings>()
            .context("configuration has invalid values")
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(bind) = &cli.bind {
            self.server.bind = bind.clone();
        }
        if let Some(workers) = cli.workers {
            self.processing.workers = workers;
        }
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |msg: String| Err(CatalogError::Configuration(msg));

        if self.server.bind.parse::<SocketAddr>().is_err() {
            return invalid(format!("server.bind is not a socket address: {}", self.server.bind));
        }
        if self.cache.backend == Backend::Redis && self.cache.redis_url.is_none() {
            return invalid("cache.redis_url is required for the redis cache backend".to_string());
        }
        if self.queue.backend == Backend::Redis && self.queue.redis_url.is_none() {
            return invalid("queue.redis_url is required for the redis queue backend".to_string());
        }
        if self.queue.channel.trim().is_empty() {
            return invalid("queue.channel must not be empty".to_string());
        }
        if self.queue.lease_secs == 0 {
            return invalid("queue.lease_secs must be positive".to_string());
        }
        if self.processing.max_width == 0 {
            return invalid("processing.max_width must be positive".to_string());
        }
        if !(1..=100).contains(&self.processing.jpeg_quality) {
            return invalid(format!(
                "processing.jpeg_quality must be within 1..=100, got {}",
                self.processing.jpeg_quality
            ));
        }
        if self.processing.max_image_bytes == 0 {
            return invalid("processing.max_image_bytes must be positive".to_string());
        }
        if let Some(id) = &self.queue.consumer_id
            && id.trim().is_empty()
        {
            return invalid("queue.consumer_id must not be blank".to_string());
        }
        if self.processing.max_attempts == 0 {
            return invalid("processing.max_attempts must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, CatalogError> {
        self.server
            .bind
            .parse()
            .map_err(|e| CatalogError::Configuration(format!("invalid server.bind {}: {}", self.server.bind, e)))
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache.ttl_secs.map(Duration::from_secs)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.queue.lease_secs)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            channel: self.queue.channel.clone(),
            store_timeout: Duration::from_millis(self.store.timeout_ms),
            cache_timeout: Duration::from_millis(self.cache.timeout_ms),
            queue_timeout: Duration::from_millis(self.queue.timeout_ms),
            cache_ttl: self.cache_ttl(),
        }
    }

    pub fn retrieval_settings(&self) -> RetrievalSettings {
        RetrievalSettings {
            store_timeout: Duration::from_millis(self.store.timeout_ms),
            cache_timeout: Duration::from_millis(self.cache.timeout_ms),
            cache_ttl: self.cache_ttl(),
        }
    }

    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            max_width: self.processing.max_width,
            jpeg_quality: self.processing.jpeg_quality,
            link_derived: self.processing.link_derived,
            store_timeout: Duration::from_millis(self.store.timeout_ms),
            cache_timeout: Duration::from_millis(self.cache.timeout_ms),
            cache_ttl: self.cache_ttl(),
        }
    }

    /// Lease renewal runs at a third of the lease so one missed beat does not lose it.
    pub fn worker_settings(&self, consumer_prefix: impl Into<String>) -> WorkerSettings {
        WorkerSettings {
            channel: self.queue.channel.clone(),
            consumer_prefix: consumer_prefix.into(),
            worker_count: self.processing.workers,
            max_attempts: self.processing.max_attempts,
            renew_interval: (self.lease() / 3).max(Duration::from_millis(100)),
            queue_timeout: Duration::from_millis(self.queue.timeout_ms),
        }
    }

    /// Configured consumer id, or `catalog-<uuid>` so two processes never share
    /// processing lists by accident.
    pub fn consumer_id(&self) -> String {
        self.queue
            .consumer_id
            .clone()
            .unwrap_or_else(|| format!("catalog-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.processing.fetch_timeout_ms)
    }
}
