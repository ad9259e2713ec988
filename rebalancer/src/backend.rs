//! Wiring from [`Config`] to concrete store and queue backends.

use std::sync::Arc;

use log::{info, warn};

use crate::config::{Config, QueueBackend, StoreBackend};
use crate::consumer::TransactionConsumer;
use crate::error::Result;
use crate::orchestrator::RebalanceService;
use crate::publisher::TransactionPublisher;
use crate::queue::{DiskQueue, MemoryQueue, NoopQueue, Queue};
use crate::repository::{PortfolioRepository, TransactionRepository};
use crate::store::{DiskStore, MemoryStore, Store};

/// Open the configured store. Without a store nothing works, so failure is fatal.
pub fn open_store(config: &Config) -> Result<Arc<dyn Store>> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Redb => {
            let store = DiskStore::open(&config.store.path)?;
            info!("Store opened at {}", config.store.path.display());
            Ok(Arc::new(store))
        }
    }
}

/// Open the configured queue, falling back to [`NoopQueue`] when it cannot be
/// reached.
pub fn open_queue(config: &Config) -> Arc<dyn Queue> {
    match config.queue.backend {
        QueueBackend::None => {
            warn!("No queue configured; rebalance transactions will not be persisted");
            Arc::new(NoopQueue)
        }
        QueueBackend::Memory => Arc::new(MemoryQueue::new()),
        QueueBackend::Redb => {
            match DiskQueue::open(
                &config.queue.path,
                &config.queue.topic,
                config.poll_interval(),
            ) {
                Ok(queue) => {
                    info!(
                        "Queue opened at {} (topic {})",
                        config.queue.path.display(),
                        config.queue.topic
                    );
                    Arc::new(queue)
                }
                Err(e) => {
                    warn!("Queue unavailable ({e}); continuing without one");
                    Arc::new(NoopQueue)
                }
            }
        }
    }
}

pub fn service(config: &Config, store: Arc<dyn Store>, queue: Arc<dyn Queue>) -> RebalanceService {
    RebalanceService::new(
        PortfolioRepository::new(store.clone(), config.store_timeout()),
        TransactionRepository::new(store, config.store_timeout()),
        TransactionPublisher::new(queue, config.publish_timeout()),
    )
}

pub fn consumer(
    config: &Config,
    store: Arc<dyn Store>,
    queue: Arc<dyn Queue>,
) -> TransactionConsumer {
    TransactionConsumer::new(
        queue,
        TransactionRepository::new(store, config.store_timeout()),
        config.queue.consumer_group.clone(),
        config.retry_delay(),
    )
}
