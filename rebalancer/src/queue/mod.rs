//! Message queue seam for rebalance batches.
//!
//! One topic, pull-style readers scoped to a named consumer group, and
//! at-least-once delivery: a reader starts from its group's last committed
//! offset, so anything received but not committed is delivered again to the
//! next reader of that group.
//!
//! Implementations:
//!
//! - [`DiskQueue`]: durable log and committed offsets in a redb file
//! - [`MemoryQueue`]: in-process log, for tests and single-process runs
//! - [`NoopQueue`]: stands in when no backend is configured

mod disk;
mod memory;

pub use disk::DiskQueue;
pub use memory::MemoryQueue;

use async_trait::async_trait;

/// A message handed to a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub offset: u64,
    pub payload: Vec<u8>,
}

/// Errors reported by a queue backend.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue not configured")]
    NotConfigured,

    #[error("failed to open queue at {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("queue backend error: {0}")]
    Backend(String),
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Producer side and reader factory.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Whether a real backend stands behind this queue.
    fn is_configured(&self) -> bool {
        true
    }

    /// Append `payload` to the topic.
    async fn publish(&self, payload: &[u8]) -> QueueResult<()>;

    /// Open a reader positioned at `group`'s last committed offset.
    async fn subscribe(&self, group: &str) -> QueueResult<Box<dyn QueueReader>>;
}

/// Pull-style reader bound to one consumer group.
#[async_trait]
pub trait QueueReader: Send {
    /// Wait for the next message.
    ///
    /// Cancel-safe: dropping the future before it resolves does not skip a
    /// message.
    async fn receive(&mut self) -> QueueResult<Delivery>;

    /// Record `delivery` as processed for this reader's group.
    async fn commit(&mut self, delivery: &Delivery) -> QueueResult<()>;
}

/// Queue used when no backend could be initialized; publishing is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopQueue;

#[async_trait]
impl Queue for NoopQueue {
    fn is_configured(&self) -> bool {
        false
    }

    async fn publish(&self, _payload: &[u8]) -> QueueResult<()> {
        Ok(())
    }

    async fn subscribe(&self, _group: &str) -> QueueResult<Box<dyn QueueReader>> {
        Err(QueueError::NotConfigured)
    }
}
