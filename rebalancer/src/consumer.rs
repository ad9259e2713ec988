//! Queue consumer: persists every transaction of every batch it receives.
//!
//! One consumer per process, bound to one consumer group. Lifecycle:
//!
//! ```text
//! Starting ──► Running ──► Draining ──► Stopped
//!     └──────────(queue not configured)────┘
//! ```
//!
//! Payloads that are empty or not a JSON array of transactions are logged and
//! dropped. Each transaction is saved on its own; a failed save is logged and
//! the rest of the batch still goes through. Read errors are retried until the
//! shutdown signal fires.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::diff::RebalanceTransaction;
use crate::queue::{Delivery, Queue, QueueError, QueueReader};
use crate::repository::TransactionRepository;

pub const DEFAULT_GROUP: &str = "portfolio-rebalancer-group";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsumerState::Starting => write!(f, "STARTING"),
            ConsumerState::Running => write!(f, "RUNNING"),
            ConsumerState::Draining => write!(f, "DRAINING"),
            ConsumerState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// What happened to one queue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Empty, foreign, or malformed payload.
    Discarded,
    Processed { saved: usize, failed: usize },
}

pub struct TransactionConsumer {
    queue: Arc<dyn Queue>,
    transactions: TransactionRepository,
    group: String,
    retry_delay: Duration,
    state: watch::Sender<ConsumerState>,
}

impl TransactionConsumer {
    pub fn new(
        queue: Arc<dyn Queue>,
        transactions: TransactionRepository,
        group: impl Into<String>,
        retry_delay: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Starting);
        Self {
            queue,
            transactions,
            group: group.into(),
            retry_delay,
            state,
        }
    }

    /// Observe lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Run on a new task; the returned handle stops it.
    pub fn spawn(self) -> ConsumerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = self.state();
        let task = tokio::spawn(self.run(shutdown_rx));
        ConsumerHandle {
            shutdown: shutdown_tx,
            state,
            task,
        }
    }

    /// Consume until `shutdown` turns true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        self.set_state(ConsumerState::Starting);

        let Some(mut reader) = self.connect(&mut shutdown).await else {
            self.set_state(ConsumerState::Stopped);
            return;
        };

        self.set_state(ConsumerState::Running);
        info!("Transaction consumer started (group {})", self.group);

        while !*shutdown.borrow() {
            let received = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                received = reader.receive() => received,
            };

            match received {
                Ok(delivery) => {
                    let work = self.process(reader.as_mut(), delivery);
                    tokio::pin!(work);
                    tokio::select! {
                        () = &mut work => {}
                        _ = shutdown.changed() => {
                            self.set_state(ConsumerState::Draining);
                            info!("Shutdown requested; finishing in-flight message");
                            work.await;
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!("Queue read error: {e}");
                    if wait_or_shutdown(&mut shutdown, self.retry_delay).await {
                        break;
                    }
                }
            }
        }

        self.set_state(ConsumerState::Draining);
        info!("Transaction consumer shutting down");
        drop(reader);
        self.set_state(ConsumerState::Stopped);
    }

    /// Subscribe, retrying transport errors. `None` means stop.
    async fn connect(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Box<dyn QueueReader>> {
        loop {
            if *shutdown.borrow() {
                return None;
            }
            match self.queue.subscribe(&self.group).await {
                Ok(reader) => return Some(reader),
                Err(QueueError::NotConfigured) => {
                    warn!("Queue not configured; transactions will not be persisted");
                    return None;
                }
                Err(e) => {
                    error!("Failed to subscribe group {}: {e}", self.group);
                    if wait_or_shutdown(shutdown, self.retry_delay).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Handle one delivery and commit it for the group.
    async fn process(&self, reader: &mut dyn QueueReader, delivery: Delivery) {
        self.handle_message(&delivery.payload).await;
        if let Err(e) = reader.commit(&delivery).await {
            warn!(
                "Failed to commit offset {} for group {}: {e}",
                delivery.offset, self.group
            );
        }
    }

    /// Decode one payload and persist each transaction independently.
    pub async fn handle_message(&self, payload: &[u8]) -> MessageOutcome {
        if payload.is_empty() {
            return MessageOutcome::Discarded;
        }

        let batch: Vec<RebalanceTransaction> = match serde_json::from_slice(payload) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(
                    "Skipping message that is not a transaction batch ({e}): {}",
                    String::from_utf8_lossy(payload)
                );
                return MessageOutcome::Discarded;
            }
        };

        if batch.is_empty() {
            return MessageOutcome::Discarded;
        }

        info!("Processing {} rebalance transactions", batch.len());

        let mut saved = 0;
        let mut failed = 0;
        for tx in &batch {
            match self.transactions.save(tx).await {
                Ok(()) => saved += 1,
                Err(e) => {
                    error!(
                        "Failed to save transaction for user {}, asset {}: {e}",
                        tx.user_id, tx.asset
                    );
                    failed += 1;
                }
            }
        }

        debug!("Batch done: {saved} saved, {failed} failed");
        MessageOutcome::Processed { saved, failed }
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }
}

/// Sleep for `delay`; true if shutdown was requested meanwhile.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
    }
}

/// A consumer running on its own task.
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ConsumerState>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Wait until the consumer reaches `target`.
    pub async fn wait_for(&mut self, target: ConsumerState) {
        // Err means the consumer is gone, which only happens once it stopped
        let _ = self.state.wait_for(|s| *s == target).await;
    }

    /// Signal shutdown without waiting. The consumer drains the in-flight
    /// message, if any, before stopping.
    pub fn cancel(&self) {
        self.shutdown.send_replace(true);
    }

    /// Signal shutdown and wait for the in-flight message to finish.
    pub async fn shutdown(self) {
        self.cancel();
        if let Err(e) = self.task.await {
            error!("Consumer task failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::diff::Action;
    use crate::queue::{MemoryQueue, NoopQueue};
    use crate::store::{Collection, MemoryStore, Store, StoreError, StoreResult};

    /// Memory store refusing writes for one asset.
    struct FlakyStore {
        inner: MemoryStore,
        poisoned_asset: &'static str,
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn put(&self, c: Collection, key: &str, record: &[u8]) -> StoreResult<()> {
            if key.contains(self.poisoned_asset) {
                return Err(StoreError::Database("disk full".into()));
            }
            self.inner.put(c, key, record).await
        }
        async fn get(&self, c: Collection, key: &str) -> StoreResult<Option<Vec<u8>>> {
            self.inner.get(c, key).await
        }
        async fn scan(&self, c: Collection, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
            self.inner.scan(c, prefix).await
        }
    }

    /// Memory store whose writes take a while; signals when one starts.
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
        write_started: tokio::sync::Notify,
    }

    #[async_trait]
    impl Store for SlowStore {
        async fn put(&self, c: Collection, key: &str, record: &[u8]) -> StoreResult<()> {
            self.write_started.notify_one();
            tokio::time::sleep(self.delay).await;
            self.inner.put(c, key, record).await
        }
        async fn get(&self, c: Collection, key: &str) -> StoreResult<Option<Vec<u8>>> {
            self.inner.get(c, key).await
        }
        async fn scan(&self, c: Collection, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
            self.inner.scan(c, prefix).await
        }
    }

    fn tx(asset: &str, action: Action, pct: f64) -> RebalanceTransaction {
        RebalanceTransaction {
            user_id: "u1".into(),
            action,
            asset: asset.into(),
            rebalance_percent: pct,
            timestamp: "2026-10-15T09:30:00.000000Z".into(),
        }
    }

    fn consumer(queue: Arc<dyn Queue>, store: Arc<dyn Store>) -> TransactionConsumer {
        TransactionConsumer::new(
            queue,
            TransactionRepository::new(store, Duration::from_secs(1)),
            DEFAULT_GROUP,
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn discards_foreign_payloads() {
        let c = consumer(Arc::new(MemoryQueue::new()), Arc::new(MemoryStore::new()));
        assert_eq!(c.handle_message(b"").await, MessageOutcome::Discarded);
        assert_eq!(c.handle_message(b"ping").await, MessageOutcome::Discarded);
        assert_eq!(c.handle_message(b"[]").await, MessageOutcome::Discarded);
        assert_eq!(
            c.handle_message(br#"{"user_id":"u1"}"#).await,
            MessageOutcome::Discarded
        );
    }

    #[tokio::test]
    async fn one_bad_record_does_not_abort_batch() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            poisoned_asset: "bonds",
        });
        let c = consumer(Arc::new(MemoryQueue::new()), store.clone());

        let batch = vec![
            tx("bonds", Action::Buy, 10.0),
            tx("stocks", Action::Buy, 10.0),
            tx("gold", Action::Sell, 20.0),
        ];
        let payload = serde_json::to_vec(&batch).unwrap();

        assert_eq!(
            c.handle_message(&payload).await,
            MessageOutcome::Processed {
                saved: 2,
                failed: 1
            }
        );
        assert_eq!(store.inner.len(Collection::RebalanceTransactions), 2);
    }

    #[tokio::test]
    async fn noop_queue_stops_immediately() {
        let c = consumer(Arc::new(NoopQueue), Arc::new(MemoryStore::new()));
        let mut handle = c.spawn();
        handle.wait_for(ConsumerState::Stopped).await;
        assert_eq!(handle.state(), ConsumerState::Stopped);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn runs_until_shutdown() {
        let queue = MemoryQueue::new();
        let store = Arc::new(MemoryStore::new());
        let mut handle = consumer(Arc::new(queue.clone()), store.clone()).spawn();
        handle.wait_for(ConsumerState::Running).await;

        queue.publish(b"health-check").await.unwrap();
        let batch = vec![tx("stocks", Action::Buy, 5.0), tx("bonds", Action::Sell, 5.0)];
        queue
            .publish(&serde_json::to_vec(&batch).unwrap())
            .await
            .unwrap();

        // Both messages committed once processed
        tokio::time::timeout(Duration::from_secs(2), async {
            while queue.committed(DEFAULT_GROUP) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("consumer should drain the queue");

        assert_eq!(store.len(Collection::RebalanceTransactions), 2);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn cancellation_drains_in_flight_message() {
        let queue = MemoryQueue::new();
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(300),
            write_started: tokio::sync::Notify::new(),
        });
        let mut handle = consumer(Arc::new(queue.clone()), store.clone()).spawn();
        handle.wait_for(ConsumerState::Running).await;

        let batch = vec![tx("stocks", Action::Buy, 5.0)];
        queue
            .publish(&serde_json::to_vec(&batch).unwrap())
            .await
            .unwrap();
        store.write_started.notified().await;

        handle.cancel();
        tokio::time::timeout(
            Duration::from_millis(200),
            handle.wait_for(ConsumerState::Draining),
        )
        .await
        .expect("consumer should report draining while the save is in flight");
        assert_eq!(handle.state(), ConsumerState::Draining);
        assert_eq!(store.inner.len(Collection::RebalanceTransactions), 0);

        handle.shutdown().await;
        assert_eq!(store.inner.len(Collection::RebalanceTransactions), 1);
        assert_eq!(queue.committed(DEFAULT_GROUP), 1);
    }

    #[tokio::test]
    async fn shutdown_reaches_stopped() {
        let c = consumer(Arc::new(MemoryQueue::new()), Arc::new(MemoryStore::new()));
        let mut states = c.state();
        let handle = c.spawn();

        handle.shutdown().await;
        assert_eq!(*states.borrow_and_update(), ConsumerState::Stopped);
    }
}
