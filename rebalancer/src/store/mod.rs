//! Key-value document store seam.
//!
//! Records are opaque bytes (JSON documents) addressed by a collection and a
//! string key. Writes to one key are atomic and last-writer-wins.
//! Implementations:
//!
//! - [`DiskStore`]: durable, backed by a redb file
//! - [`MemoryStore`]: in-process, for tests and ephemeral runs

mod disk;
mod memory;

pub use disk::DiskStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

/// Logical collections kept by the rebalancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Keyed by user id.
    Portfolios,
    /// Keyed by `{user_id}_{asset}_{timestamp}`.
    RebalanceTransactions,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Collection::Portfolios => "portfolios",
            Collection::RebalanceTransactions => "rebalance_transactions",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors reported by a store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open store at {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("database error: {0}")]
    Database(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Minimal document store API needed by the rebalancer.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or overwrite the record at `key`.
    async fn put(&self, collection: Collection, key: &str, record: &[u8]) -> StoreResult<()>;

    /// Fetch the record at `key`, `None` when absent.
    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// All `(key, record)` pairs whose key starts with `prefix`, in key order.
    async fn scan(&self, collection: Collection, prefix: &str)
    -> StoreResult<Vec<(String, Vec<u8>)>>;
}
