//! Durable store backed by a single redb file.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};

use super::{Collection, Store, StoreError, StoreResult};

const PORTFOLIOS: TableDefinition<&str, &[u8]> = TableDefinition::new("portfolios");
const TRANSACTIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("rebalance_transactions");

fn table(collection: Collection) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match collection {
        Collection::Portfolios => PORTFOLIOS,
        Collection::RebalanceTransactions => TRANSACTIONS,
    }
}

fn db_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Database(e.to_string())
}

/// Redb-based document store.
pub struct DiskStore {
    db: Arc<Database>,
}

impl DiskStore {
    /// Open (or create) the store file, creating parent directories and tables.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let open_err = |reason: String| StoreError::Open {
            path: path.display().to_string(),
            reason,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| open_err(e.to_string()))?;
        }
        let db = Database::create(path).map_err(|e| open_err(e.to_string()))?;

        let write_txn = db.begin_write().map_err(db_err)?;
        {
            write_txn.open_table(PORTFOLIOS).map_err(db_err)?;
            write_txn.open_table(TRANSACTIONS).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;

        Ok(Self { db: Arc::new(db) })
    }
}

/// Run a redb call on the blocking pool; callers' deadlines stay live while
/// it waits on the write lock or fsync.
async fn blocking<T, F>(db: &Arc<Database>, f: F) -> StoreResult<T>
where
    F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| StoreError::Database(format!("store task failed: {e}")))?
}

#[async_trait]
impl Store for DiskStore {
    async fn put(&self, collection: Collection, key: &str, record: &[u8]) -> StoreResult<()> {
        let key = key.to_string();
        let record = record.to_vec();
        blocking(&self.db, move |db| {
            let write_txn = db.begin_write().map_err(db_err)?;
            {
                let mut t = write_txn.open_table(table(collection)).map_err(db_err)?;
                t.insert(key.as_str(), record.as_slice()).map_err(db_err)?;
            }
            write_txn.commit().map_err(db_err)
        })
        .await
    }

    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let key = key.to_string();
        blocking(&self.db, move |db| {
            let read_txn = db.begin_read().map_err(db_err)?;
            let t = match read_txn.open_table(table(collection)) {
                Ok(t) => t,
                Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
                Err(e) => return Err(db_err(e)),
            };
            Ok(t.get(key.as_str()).map_err(db_err)?.map(|v| v.value().to_vec()))
        })
        .await
    }

    async fn scan(
        &self,
        collection: Collection,
        prefix: &str,
    ) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let prefix = prefix.to_string();
        blocking(&self.db, move |db| {
            let read_txn = db.begin_read().map_err(db_err)?;
            let t = match read_txn.open_table(table(collection)) {
                Ok(t) => t,
                Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
                Err(e) => return Err(db_err(e)),
            };

            let mut hits = Vec::new();
            for entry in t.range::<&str>(prefix.as_str()..).map_err(db_err)? {
                let (k, v) = entry.map_err(db_err)?;
                if !k.value().starts_with(prefix.as_str()) {
                    break;
                }
                hits.push((k.value().to_string(), v.value().to_vec()));
            }
            Ok(hits)
        })
        .await
    }
}
