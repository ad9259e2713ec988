//! Error types for the rebalancer.

use std::path::PathBuf;
use std::time::Duration;

use crate::store::StoreError;

/// All errors that can occur during rebalancer operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    InvalidAllocation(String),

    #[error("portfolio not found for user {0}")]
    PortfolioNotFound(String),

    #[error("failed to publish transactions: {0}")]
    Publish(String),

    #[error("failed to persist transaction {key}: {reason}")]
    Persistence { key: String, reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl Error {
    /// Errors caused by the request itself; resubmitting unchanged will fail again.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidRequest(_) | Error::InvalidAllocation(_) | Error::PortfolioNotFound(_)
        )
    }

    /// Infrastructure failures the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Publish(_) | Error::Store(_) | Error::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
