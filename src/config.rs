use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::Polarity;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub feeds: Vec<FeedConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            window_capacity: default_window_capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Binance,
    Replay,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,
    #[serde(default = "default_availability_ttl_secs")]
    pub availability_ttl_secs: u64,
    #[serde(default)]
    pub replay_path: Option<PathBuf>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            rest_base_url: default_rest_base_url(),
            availability_ttl_secs: default_availability_ttl_secs(),
            replay_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    File,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_backend")]
    pub backend: HistoryBackend,
    #[serde(default = "default_history_dir")]
    pub dir: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: default_history_backend(),
            dir: default_history_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_true")]
    pub color: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self { color: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// One tracked price series.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub persistence_key: String,
    pub threshold: u64,
    pub polarity: Polarity,
}

fn default_poll_interval_ms() -> u64 {
    800
}

fn default_window_capacity() -> usize {
    1000
}

fn default_source_kind() -> SourceKind {
    SourceKind::Binance
}

fn default_rest_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_availability_ttl_secs() -> u64 {
    60
}

fn default_history_backend() -> HistoryBackend {
    HistoryBackend::File
}

fn default_history_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Load from `TICK_RATIO_CONFIG` or `config/default.toml`.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config_path = std::env::var("TICK_RATIO_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::from_path(&config_path)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&config_str)
            .with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("failed to parse config toml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.feeds.is_empty() {
            bail!("at least one [[feeds]] entry is required");
        }
        if self.monitor.poll_interval_ms == 0 {
            bail!("monitor.poll_interval_ms must be > 0");
        }
        if self.monitor.window_capacity == 0 {
            bail!("monitor.window_capacity must be > 0");
        }
        if self.source.kind == SourceKind::Replay && self.source.replay_path.is_none() {
            bail!("source.replay_path is required when source.kind = \"replay\"");
        }

        let mut names = HashSet::new();
        let mut keys = HashSet::new();
        for feed in &self.feeds {
            if feed.name.trim().is_empty() {
                bail!("feed name must not be empty");
            }
            if !names.insert(feed.name.as_str()) {
                bail!("duplicate feed name '{}'", feed.name);
            }
            validate_persistence_key(&feed.persistence_key)
                .with_context(|| format!("feed '{}'", feed.name))?;
            if !keys.insert(feed.persistence_key.as_str()) {
                bail!(
                    "feed '{}': persistence_key '{}' is already used",
                    feed.name,
                    feed.persistence_key
                );
            }
            if feed.threshold == 0 {
                bail!("feed '{}': threshold must be a positive integer", feed.name);
            }
        }
        Ok(())
    }
}

fn validate_persistence_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        bail!("persistence_key must not be empty");
    }
    if key.contains('/') || key.contains('\\') || key == "." || key == ".." {
        bail!("persistence_key '{}' must be a plain file name", key);
    }
    Ok(())
}
