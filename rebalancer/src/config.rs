//! TOML configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::consumer::DEFAULT_GROUP;
use crate::error::{Error, Result};

/// Top-level configuration. Every section may be omitted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redb,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Redb,
    Memory,
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Redb
}
fn default_store_path() -> PathBuf {
    "./data/store.redb".into()
}
fn default_timeout() -> u64 {
    10
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_backend")]
    pub backend: QueueBackend,
    #[serde(default = "default_queue_path")]
    pub path: PathBuf,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_group")]
    pub consumer_group: String,
    #[serde(default = "default_timeout")]
    pub publish_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_queue_backend() -> QueueBackend {
    QueueBackend::Redb
}
fn default_queue_path() -> PathBuf {
    "./data/queue.redb".into()
}
fn default_topic() -> String {
    "rebalance-transactions".into()
}
fn default_group() -> String {
    DEFAULT_GROUP.into()
}
fn default_poll_interval() -> u64 {
    500
}
fn default_retry_delay() -> u64 {
    1000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_queue_backend(),
            path: default_queue_path(),
            topic: default_topic(),
            consumer_group: default_group(),
            publish_timeout_secs: default_timeout(),
            poll_interval_ms: default_poll_interval(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&contents)
    }

    /// Parse and validate TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config invariants.
    fn validate(&self) -> Result<()> {
        if self.store.timeout_secs == 0 {
            return Err(Error::Config("store.timeout_secs must be > 0".into()));
        }
        if self.store.backend == StoreBackend::Redb && self.store.path.as_os_str().is_empty() {
            return Err(Error::Config("store.path must not be empty".into()));
        }
        if self.queue.publish_timeout_secs == 0 {
            return Err(Error::Config(
                "queue.publish_timeout_secs must be > 0".into(),
            ));
        }
        if self.queue.poll_interval_ms == 0 {
            return Err(Error::Config("queue.poll_interval_ms must be > 0".into()));
        }
        if self.queue.topic.is_empty() {
            return Err(Error::Config("queue.topic must not be empty".into()));
        }
        if self.queue.consumer_group.is_empty() {
            return Err(Error::Config(
                "queue.consumer_group must not be empty".into(),
            ));
        }
        if self.queue.backend == QueueBackend::Redb && self.queue.path.as_os_str().is_empty() {
            return Err(Error::Config("queue.path must not be empty".into()));
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store.timeout_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.queue.publish_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.queue.retry_delay_ms)
    }
}
