//! In-process queue.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::Notify;

use super::{Delivery, Queue, QueueError, QueueReader, QueueResult};

#[derive(Default)]
struct Log {
    messages: Vec<Vec<u8>>,
    committed: FxHashMap<String, u64>,
}

/// A single-topic queue held in memory.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    log: Arc<Mutex<Log>>,
    notify: Arc<Notify>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages ever published.
    pub fn len(&self) -> usize {
        self.log.lock().map(|l| l.messages.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next offset `group` would start from.
    pub fn committed(&self, group: &str) -> u64 {
        self.log
            .lock()
            .map(|l| l.committed.get(group).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

fn poisoned<T>(_: T) -> QueueError {
    QueueError::Backend("memory queue lock poisoned".into())
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn publish(&self, payload: &[u8]) -> QueueResult<()> {
        self.log
            .lock()
            .map_err(poisoned)?
            .messages
            .push(payload.to_vec());
        self.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, group: &str) -> QueueResult<Box<dyn QueueReader>> {
        let cursor = self
            .log
            .lock()
            .map_err(poisoned)?
            .committed
            .get(group)
            .copied()
            .unwrap_or(0);
        Ok(Box::new(MemoryReader {
            queue: self.clone(),
            group: group.to_string(),
            cursor,
        }))
    }
}

struct MemoryReader {
    queue: MemoryQueue,
    group: String,
    cursor: u64,
}

impl MemoryReader {
    fn fetch(&self) -> QueueResult<Option<Delivery>> {
        let log = self.queue.log.lock().map_err(poisoned)?;
        Ok(log.messages.get(self.cursor as usize).map(|payload| Delivery {
            offset: self.cursor,
            payload: payload.clone(),
        }))
    }
}

#[async_trait]
impl QueueReader for MemoryReader {
    async fn receive(&mut self) -> QueueResult<Delivery> {
        let notify = Arc::clone(&self.queue.notify);
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.fetch()? {
                self.cursor = delivery.offset + 1;
                return Ok(delivery);
            }
            notified.await;
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> QueueResult<()> {
        let mut log = self.queue.log.lock().map_err(poisoned)?;
        let next = log.committed.entry(self.group.clone()).or_insert(0);
        *next = (*next).max(delivery.offset + 1);
        Ok(())
    }
}
