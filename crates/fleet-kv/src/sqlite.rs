//! A SQLite-backed [`Stash`], used for the per-member local database (spec
//! §6 "Persisted state"). A single table holds every collection, keyed by
//! `(collection, key)`, mirroring `mz_stash::Sqlite`'s single-file local
//! store.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Stash, StashCollection, StashError, Transaction};

/// A stash backed by a single SQLite file.
pub struct SqliteStash {
    conn: Mutex<Connection>,
    next_collection_id: AtomicU64,
    readonly: bool,
}

impl fmt::Debug for SqliteStash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStash")
            .field("readonly", &self.readonly)
            .finish()
    }
}

impl SqliteStash {
    /// Opens (creating if necessary) a SQLite-backed stash at `path`.
    pub fn open(path: &Path) -> Result<SqliteStash, StashError> {
        let conn = Connection::open(path).map_err(|e| StashError::Other(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS fleet_kv (
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (collection, key)
            );
            CREATE TABLE IF NOT EXISTS fleet_kv_collections (
                name TEXT PRIMARY KEY,
                id INTEGER NOT NULL
            );",
        )
        .map_err(|e| StashError::Other(e.to_string()))?;
        let next_id: u64 = conn
            .query_row(
                "SELECT COALESCE(MAX(id), -1) + 1 FROM fleet_kv_collections",
                [],
                |row| row.get(0),
            )
            .map_err(|e| StashError::Other(e.to_string()))?;
        Ok(SqliteStash {
            conn: Mutex::new(conn),
            next_collection_id: AtomicU64::new(next_id),
            readonly: false,
        })
    }

    fn collection_id(&self, conn: &Connection, name: &str) -> Result<u64, StashError> {
        if let Some(id) = conn
            .query_row(
                "SELECT id FROM fleet_kv_collections WHERE name = ?1",
                params![name],
                |row| row.get::<_, i64>(0),
            )
            .ok()
        {
            return Ok(id as u64);
        }
        let id = self.next_collection_id.fetch_add(1, Ordering::SeqCst);
        conn.execute(
            "INSERT INTO fleet_kv_collections (name, id) VALUES (?1, ?2)",
            params![name, id as i64],
        )
        .map_err(|e| StashError::Other(e.to_string()))?;
        Ok(id)
    }
}

struct SqliteTransaction<'a> {
    conn: &'a Connection,
    readonly: bool,
}

impl<'a> Transaction for SqliteTransaction<'a> {
    fn items<K, V>(&self, collection: StashCollection<K, V>) -> Result<BTreeMap<K, V>, StashError>
    where
        K: Ord + Serialize + DeserializeOwned,
        V: Serialize + DeserializeOwned,
    {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM fleet_kv WHERE collection = ?1")
            .map_err(|e| StashError::Other(e.to_string()))?;
        let rows = stmt
            .query_map(params![collection.name_id as i64], |row| {
                let key: String = row.get(0)?;
                let value: String = row.get(1)?;
                Ok((key, value))
            })
            .map_err(|e| StashError::Other(e.to_string()))?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (key, value) = row.map_err(|e| StashError::Other(e.to_string()))?;
            let key: K =
                serde_json::from_str(&key).map_err(|e| StashError::Other(e.to_string()))?;
            let value: V =
                serde_json::from_str(&value).map_err(|e| StashError::Other(e.to_string()))?;
            out.insert(key, value);
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
        if self.readonly {
            return Err(StashError::ReadOnly);
        }
        let key = serde_json::to_string(&key).map_err(|e| StashError::Other(e.to_string()))?;
        let value = serde_json::to_string(&value).map_err(|e| StashError::Other(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO fleet_kv (collection, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT (collection, key) DO UPDATE SET value = excluded.value",
                params![collection.name_id as i64, key, value],
            )
            .map_err(|e| StashError::Other(e.to_string()))?;
        Ok(())
    }

    fn delete<K, V>(&mut self, collection: StashCollection<K, V>, key: &K) -> Result<(), StashError>
    where
        K: Ord + Serialize + DeserializeOwned,
        V: Serialize + DeserializeOwned,
    {
        if self.readonly {
            return Err(StashError::ReadOnly);
        }
        let key = serde_json::to_string(key).map_err(|e| StashError::Other(e.to_string()))?;
        self.conn
            .execute(
                "DELETE FROM fleet_kv WHERE collection = ?1 AND key = ?2",
                params![collection.name_id as i64, key],
            )
            .map_err(|e| StashError::Other(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Stash for SqliteStash {
    async fn collection<K, V>(&self, name: &'static str) -> Result<StashCollection<K, V>, StashError>
    where
        K: Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let conn = self.conn.lock();
        let id = self.collection_id(&conn, name)?;
        Ok(StashCollection::new(id))
    }

    async fn with_txn<F, T>(&self, f: F) -> Result<T, StashError>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, StashError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.lock();
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StashError::Other(e.to_string()))?;
        let mut txn = SqliteTransaction {
            conn: &tx,
            readonly: self.readonly,
        };
        let result = f(&mut txn)?;
        tx.commit().map_err(|e| StashError::Other(e.to_string()))?;
        Ok(result)
    }

    fn is_readonly(&self) -> bool {
        self.readonly
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::NamedTempFile;

    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
    struct K(String);

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct V(u32);

    #[tokio::test]
    async fn put_then_read_back_in_a_later_transaction() {
        let file = NamedTempFile::new().unwrap();
        let stash = SqliteStash::open(file.path()).unwrap();
        let collection = stash.collection::<K, V>("c").await.unwrap();
        stash
            .with_txn(move |txn| txn.put(collection, K("a".into()), V(1)))
            .await
            .unwrap();
        let items = stash.with_txn(move |txn| txn.items(collection)).await.unwrap();
        assert_eq!(items.get(&K("a".into())), Some(&V(1)));
    }
}
