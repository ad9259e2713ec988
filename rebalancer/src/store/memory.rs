//! In-process store.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use super::{Collection, Store, StoreError, StoreResult};

/// A store held in memory; contents are lost when dropped.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<FxHashMap<Collection, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in `collection`.
    pub fn len(&self, collection: Collection) -> usize {
        self.collections
            .lock()
            .map(|c| c.get(&collection).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    fn lock(
        &self,
    ) -> StoreResult<std::sync::MutexGuard<'_, FxHashMap<Collection, BTreeMap<String, Vec<u8>>>>>
    {
        self.collections
            .lock()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, collection: Collection, key: &str, record: &[u8]) -> StoreResult<()> {
        self.lock()?
            .entry(collection)
            .or_default()
            .insert(key.to_string(), record.to_vec());
        Ok(())
    }

    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .lock()?
            .get(&collection)
            .and_then(|table| table.get(key).cloned()))
    }

    async fn scan(
        &self,
        collection: Collection,
        prefix: &str,
    ) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let guard = self.lock()?;
        let Some(table) = guard.get(&collection) else {
            return Ok(Vec::new());
        };
        Ok(table
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
