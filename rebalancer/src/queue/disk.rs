//! Durable queue backed by a redb file.
//!
//! Messages live in an append-only table keyed by `(topic, offset)`; each
//! consumer group's next offset lives in a second table. Readers in the same
//! process are woken on publish; publishes from other handles are picked up
//! on the next poll.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use tokio::sync::Notify;

use super::{Delivery, Queue, QueueError, QueueReader, QueueResult};

const MESSAGES: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("messages");
const OFFSETS: TableDefinition<(&str, &str), u64> = TableDefinition::new("committed_offsets");

fn backend(e: impl std::fmt::Display) -> QueueError {
    QueueError::Backend(e.to_string())
}

/// Redb-based single-topic queue.
#[derive(Clone)]
pub struct DiskQueue {
    db: Arc<Database>,
    topic: Arc<str>,
    poll_interval: Duration,
    notify: Arc<Notify>,
}

impl DiskQueue {
    /// Open (or create) the queue file for `topic`.
    pub fn open(path: &Path, topic: &str, poll_interval: Duration) -> QueueResult<Self> {
        let open_err = |reason: String| QueueError::Open {
            path: path.display().to_string(),
            reason,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| open_err(e.to_string()))?;
        }
        let db = Database::create(path).map_err(|e| open_err(e.to_string()))?;

        let write_txn = db.begin_write().map_err(backend)?;
        {
            write_txn.open_table(MESSAGES).map_err(backend)?;
            write_txn.open_table(OFFSETS).map_err(backend)?;
        }
        write_txn.commit().map_err(backend)?;

        Ok(Self {
            db: Arc::new(db),
            topic: Arc::from(topic),
            poll_interval,
            notify: Arc::new(Notify::new()),
        })
    }

    /// Offset the next published message will get.
    pub fn next_offset(&self) -> QueueResult<u64> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let t = read_txn.open_table(MESSAGES).map_err(backend)?;
        last_offset(&t, &self.topic).map(|last| last.map_or(0, |o| o + 1))
    }

    /// Next offset `group` would start from.
    pub fn committed(&self, group: &str) -> QueueResult<u64> {
        read_committed(&self.db, &self.topic, group)
    }

    /// Run a redb call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> QueueResult<T>
    where
        F: FnOnce(&Database, &str) -> QueueResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let topic = Arc::clone(&self.topic);
        tokio::task::spawn_blocking(move || f(&db, &topic))
            .await
            .map_err(|e| QueueError::Backend(format!("queue task failed: {e}")))?
    }
}

fn last_offset<T>(t: &T, topic: &str) -> QueueResult<Option<u64>>
where
    T: ReadableTable<(&'static str, u64), &'static [u8]>,
{
    let last = t
        .range::<(&str, u64)>((topic, 0)..=(topic, u64::MAX))
        .map_err(backend)?
        .next_back()
        .transpose()
        .map_err(backend)?;
    Ok(last.map(|(k, _)| k.value().1))
}

fn read_committed(db: &Database, topic: &str, group: &str) -> QueueResult<u64> {
    let read_txn = db.begin_read().map_err(backend)?;
    let t = read_txn.open_table(OFFSETS).map_err(backend)?;
    let offset = t
        .get((topic, group))
        .map_err(backend)?
        .map_or(0, |v| v.value());
    Ok(offset)
}

#[async_trait]
impl Queue for DiskQueue {
    async fn publish(&self, payload: &[u8]) -> QueueResult<()> {
        let payload = payload.to_vec();
        self.blocking(move |db, topic| {
            let write_txn = db.begin_write().map_err(backend)?;
            {
                let mut t = write_txn.open_table(MESSAGES).map_err(backend)?;
                let next = last_offset(&t, topic)?.map_or(0, |o| o + 1);
                t.insert((topic, next), payload.as_slice())
                    .map_err(backend)?;
            }
            write_txn.commit().map_err(backend)
        })
        .await?;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, group: &str) -> QueueResult<Box<dyn QueueReader>> {
        let owned = group.to_string();
        let cursor = self
            .blocking(move |db, topic| read_committed(db, topic, &owned))
            .await?;
        Ok(Box::new(DiskReader {
            queue: self.clone(),
            group: group.to_string(),
            cursor,
        }))
    }
}

struct DiskReader {
    queue: DiskQueue,
    group: String,
    cursor: u64,
}

impl DiskReader {
    async fn fetch(&self) -> QueueResult<Option<Delivery>> {
        let cursor = self.cursor;
        self.queue
            .blocking(move |db, topic| {
                let read_txn = db.begin_read().map_err(backend)?;
                let t = read_txn.open_table(MESSAGES).map_err(backend)?;
                let next = t
                    .range::<(&str, u64)>((topic, cursor)..=(topic, u64::MAX))
                    .map_err(backend)?
                    .next()
                    .transpose()
                    .map_err(backend)?;
                Ok(next.map(|(k, v)| Delivery {
                    offset: k.value().1,
                    payload: v.value().to_vec(),
                }))
            })
            .await
    }
}

#[async_trait]
impl QueueReader for DiskReader {
    async fn receive(&mut self) -> QueueResult<Delivery> {
        let notify = Arc::clone(&self.queue.notify);
        let poll_interval = self.queue.poll_interval;
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.fetch().await? {
                self.cursor = delivery.offset + 1;
                return Ok(delivery);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> QueueResult<()> {
        let group = self.group.clone();
        let processed = delivery.offset + 1;
        self.queue
            .blocking(move |db, topic| {
                let key = (topic, group.as_str());
                let write_txn = db.begin_write().map_err(backend)?;
                {
                    let mut t = write_txn.open_table(OFFSETS).map_err(backend)?;
                    let current = t.get(key).map_err(backend)?.map_or(0, |v| v.value());
                    t.insert(key, current.max(processed)).map_err(backend)?;
                }
                write_txn.commit().map_err(backend)
            })
            .await
    }
}
