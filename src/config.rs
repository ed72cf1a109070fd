//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/arxiv.sqlite"
//!
//! [feed]
//! set = "cs:cs"
//! initial_from = "2024-01-01"
//!
//! [sync]
//! concurrency = 8
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//! ```
//!
//! Every section except `[db]` may be omitted.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use arxiv_sync_core::models::{parse_date, CategoryFilter};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a writer waits on SQLite's lock before reporting a conflict.
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    5
}
fn default_busy_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_metadata_prefix")]
    pub metadata_prefix: String,
    /// OAI-PMH set to harvest. Empty harvests the whole repository.
    #[serde(default = "default_set")]
    pub set: String,
    #[serde(default = "default_overlap_days")]
    pub overlap_days: i64,
    /// Where the first harvest of an empty store starts (`YYYY-MM-DD`).
    #[serde(default)]
    pub initial_from: Option<String>,
    #[serde(default = "default_feed_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            metadata_prefix: default_metadata_prefix(),
            set: default_set(),
            overlap_days: default_overlap_days(),
            initial_from: None,
            timeout_secs: default_feed_timeout_secs(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
        }
    }
}

impl FeedConfig {
    /// `initial_from` as a date. Validated at load time.
    pub fn initial_from_date(&self) -> Option<NaiveDate> {
        self.initial_from.as_deref().and_then(parse_date)
    }

    pub fn overlap(&self) -> chrono::Duration {
        chrono::Duration::try_days(self.overlap_days).unwrap_or(chrono::Duration::MAX)
    }
}

fn default_base_url() -> String {
    "https://oaipmh.arxiv.org/oai".to_string()
}
fn default_metadata_prefix() -> String {
    "arXivRaw".to_string()
}
fn default_set() -> String {
    "cs:cs".to_string()
}
fn default_overlap_days() -> i64 {
    arxiv_sync_core::watermark::DEFAULT_OVERLAP_DAYS
}
fn default_feed_timeout_secs() -> u64 {
    60
}
fn default_user_agent() -> String {
    format!("arxiv-sync/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Records reconciled concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_conflict_retries: default_max_conflict_retries(),
        }
    }
}

fn default_concurrency() -> usize {
    8
}
fn default_max_conflict_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL of the provider API. Defaults per provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Only papers in at least one of these categories are embedded.
    /// Empty embeds everything.
    #[serde(default = "default_embedding_categories")]
    pub categories: Vec<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            categories: default_embedding_categories(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_embedding_categories() -> Vec<String> {
    ["cs:cs:AI", "cs:cs:CL", "cs:cs:LG", "cs:cs:MA"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn category_filter(&self) -> CategoryFilter {
        if self.categories.is_empty() {
            CategoryFilter::All
        } else {
            CategoryFilter::AnyOf(self.categories.iter().cloned().collect())
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Upper bound for `feed.overlap_days` (about a century).
const MAX_OVERLAP_DAYS: i64 = 36_500;

fn validate(config: &Config) -> Result<()> {
    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be >= 1");
    }

    // Validate feed
    if config.feed.base_url.trim().is_empty() {
        anyhow::bail!("feed.base_url must not be empty");
    }
    if !(0..=MAX_OVERLAP_DAYS).contains(&config.feed.overlap_days) {
        anyhow::bail!(
            "feed.overlap_days must be between 0 and {}, got {}",
            MAX_OVERLAP_DAYS,
            config.feed.overlap_days
        );
    }
    if let Some(from) = &config.feed.initial_from {
        if parse_date(from).is_none() {
            anyhow::bail!("feed.initial_from must be a YYYY-MM-DD date, got '{}'", from);
        }
    }

    // Validate sync
    if config.sync.concurrency == 0 {
        anyhow::bail!("sync.concurrency must be >= 1");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be >= 1");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    match config.logging.format.as_str() {
        "pretty" | "json" => {}
        other => anyhow::bail!("Unknown logging.format: '{}'. Must be pretty or json.", other),
    }

    Ok(())
}
