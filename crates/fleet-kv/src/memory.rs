//! An in-memory [`Stash`] backend, used in unit tests across the workspace
//! so they don't need a SQLite file on disk, mirroring `mz_stash::Memory`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Stash, StashCollection, StashError, Transaction};

#[derive(Default)]
struct Inner {
    next_collection_id: u64,
    names: HashMap<&'static str, u64>,
    // Collection id -> (serialized key, serialized value) rows. Storing
    // everything pre-serialized keeps this backend honest about the fact
    // that a real KV store only ever hands the core opaque bytes back.
    rows: HashMap<u64, BTreeMap<Vec<u8>, Vec<u8>>>,
}

/// An in-process stash with no persistence, for tests.
pub struct MemoryStash {
    inner: Mutex<Inner>,
}

impl fmt::Debug for MemoryStash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStash").finish()
    }
}

impl MemoryStash {
    pub fn new() -> MemoryStash {
        MemoryStash {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for MemoryStash {
    fn default() -> MemoryStash {
        MemoryStash::new()
    }
}

struct MemoryTransaction<'a> {
    inner: &'a mut Inner,
}

impl<'a> Transaction for MemoryTransaction<'a> {
    fn items<K, V>(&self, collection: StashCollection<K, V>) -> Result<BTreeMap<K, V>, StashError>
    where
        K: Ord + Serialize + DeserializeOwned,
        V: Serialize + DeserializeOwned,
    {
        let rows = self.inner.rows.get(&collection.name_id);
        let mut out = BTreeMap::new();
        if let Some(rows) = rows {
            for (k, v) in rows {
                let key: K = serde_json::from_slice(k)
                    .map_err(|e| StashError::Other(e.to_string()))?;
                let value: V = serde_json::from_slice(v)
                    .map_err(|e| StashError::Other(e.to_string()))?;
                out.insert(key, value);
            }
        }
        Ok(out)
    }

    fn put<K, V>(
        &mut self,
        collection: StashCollection<K, V>,
        key: K,
        value: V,
    ) -> Result<(), StashError>
    where
        K: Ord + Serialize + DeserializeOwned,
        V: Serialize + DeserializeOwned,
    {
        let key = serde_json::to_vec(&key).map_err(|e| StashError::Other(e.to_string()))?;
        let value = serde_json::to_vec(&value).map_err(|e| StashError::Other(e.to_string()))?;
        self.inner
            .rows
            .entry(collection.name_id)
            .or_default()
            .insert(key, value);
        Ok(())
    }

    fn delete<K, V>(&mut self, collection: StashCollection<K, V>, key: &K) -> Result<(), StashError>
    where
        K: Ord + Serialize + DeserializeOwned,
        V: Serialize + DeserializeOwned,
    {
        let key = serde_json::to_vec(key).map_err(|e| StashError::Other(e.to_string()))?;
        if let Some(rows) = self.inner.rows.get_mut(&collection.name_id) {
            rows.remove(&key);
        }
        Ok(())
    }
}

#[async_trait]
impl Stash for MemoryStash {
    async fn collection<K, V>(&self, name: &'static str) -> Result<StashCollection<K, V>, StashError>
    where
        K: Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = if let Some(&id) = inner.names.get(name) {
            id
        } else {
            let id = inner.next_collection_id;
            inner.next_collection_id += 1;
            inner.names.insert(name, id);
            id
        };
        Ok(StashCollection::new(id))
    }

    async fn with_txn<F, T>(&self, f: F) -> Result<T, StashError>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, StashError> + Send + 'static,
        T: Send + 'static,
    {
        let mut inner = self.inner.lock();
        let mut txn = MemoryTransaction { inner: &mut inner };
        f(&mut txn)
    }
}
