//! Hands rebalance batches to the queue.

use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::diff::RebalanceTransaction;
use crate::error::{Error, Result};
use crate::queue::Queue;

#[derive(Clone)]
pub struct TransactionPublisher {
    queue: Arc<dyn Queue>,
    timeout: Duration,
}

impl TransactionPublisher {
    pub fn new(queue: Arc<dyn Queue>, timeout: Duration) -> Self {
        Self { queue, timeout }
    }

    /// Whether published batches reach a real queue.
    pub fn is_durable(&self) -> bool {
        self.queue.is_configured()
    }

    /// Serialize `batch` as a JSON array and enqueue it.
    ///
    /// An empty batch never reaches the queue. With no queue configured this
    /// succeeds without recording anything. Any other failure means the
    /// instructions were not queued.
    pub async fn publish(&self, batch: &[RebalanceTransaction]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let payload = serde_json::to_vec(batch)
            .map_err(|e| Error::Publish(format!("failed to marshal transactions: {e}")))?;

        if !self.queue.is_configured() {
            debug!(
                "No queue configured; {} transactions not recorded",
                batch.len()
            );
        }

        tokio::time::timeout(self.timeout, self.queue.publish(&payload))
            .await
            .map_err(|_| Error::Publish(format!("queue did not ack within {:?}", self.timeout)))?
            .map_err(|e| Error::Publish(e.to_string()))
    }
}
