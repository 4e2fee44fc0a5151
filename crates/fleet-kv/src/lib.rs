//! The transactional interface onto the KV store (spec §2, §6, §9).
//!
//! Spec §2 treats the KV store as external — "a replicated SQL store
//! providing linearizable single-writer semantics and per-follower read
//! transactions" — and says the core must consume it only through a
//! transactional interface. This crate is that interface: a `Stash` trait
//! modeled on the teacher's `mz_stash::{Stash, Append, TypedCollection}`,
//! plus one concrete backend (`SqliteStash`) sufficient to run every other
//! crate's tests without a real replicated store.
//!
//! Spec §4.2 "Consistency rules" requires that all reads feeding an
//! authorization decision happen inside a single transactional block, and
//! that nothing holds a KV row reference outside of one — `Stash::with_txn`
//! is the only way to touch a collection, which makes that rule structural
//! rather than a convention callers have to remember.

mod memory;
mod sqlite;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use memory::MemoryStash;
pub use sqlite::SqliteStash;

/// An error from the KV store layer.
#[derive(Debug, Error)]
pub enum StashError {
    #[error("stash error: {0}")]
    Other(String),
    /// The stash has been fenced by a newer writer (lost leadership) and can
    /// no longer be used for writes. Per spec §4.2, recovery must check this
    /// before accepting writes in clustered mode.
    #[error("stash error: fenced by a newer epoch")]
    Fenced,
    /// A write was attempted against a read-only connection.
    #[error("stash error: cannot write to a read-only stash")]
    ReadOnly,
}

impl StashError {
    /// Whether this error means the stash connection itself is unusable and
    /// should be discarded rather than retried, mirroring
    /// `mz_stash::StashError::is_unrecoverable`.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, StashError::Fenced)
    }
}

/// A named collection (table) within the stash. Opaque handle returned by
/// [`Stash::collection`]; operations that touch the collection go through
/// [`Transaction`] methods parameterized by this handle so a stale handle
/// from a different stash instance cannot be used by mistake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StashCollection<K, V> {
    name_id: u64,
    _marker: std::marker::PhantomData<fn() -> (K, V)>,
}

impl<K, V> StashCollection<K, V> {
    fn new(name_id: u64) -> StashCollection<K, V> {
        StashCollection {
            name_id,
            _marker: std::marker::PhantomData,
        }
    }
}

/// A read-write view into the stash, valid for the lifetime of a single
/// [`Stash::with_txn`] call. Every read that feeds an authorization decision
/// must happen through a `Transaction`, never by caching a row outside one
/// (spec §4.2).
pub trait Transaction {
    /// Returns every row in the collection.
    fn items<K, V>(&self, collection: StashCollection<K, V>) -> Result<BTreeMap<K, V>, StashError>
    where
        K: Ord + Serialize + DeserializeOwned,
        V: Serialize + DeserializeOwned;

    /// Inserts or replaces a single row.
    fn put<K, V>(
        &mut self,
        collection: StashCollection<K, V>,
        key: K,
        value: V,
    ) -> Result<(), StashError>
    where
        K: Ord + Serialize + DeserializeOwned,
        V: Serialize + DeserializeOwned;

    /// Deletes a single row, if present.
    fn delete<K, V>(&mut self, collection: StashCollection<K, V>, key: &K) -> Result<(), StashError>
    where
        K: Ord + Serialize + DeserializeOwned,
        V: Serialize + DeserializeOwned;
}

/// The transactional interface the core consumes the (external) KV store
/// through. Implementations must guarantee that a single logical writer
/// lock is held for the duration of a write transaction and that readers
/// observe a consistent snapshot (spec §5 "Shared-resource policy").
#[async_trait]
pub trait Stash: Send + Sync + fmt::Debug {
    /// Declares (creating on first use) a named collection.
    async fn collection<K, V>(&self, name: &'static str) -> Result<StashCollection<K, V>, StashError>
    where
        K: Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Runs `f` against a transactional view of the stash. The closure runs
    /// synchronously (the backing store here is a local SQLite file; the
    /// replicated backend this interface abstracts over would run it against
    /// a single round-trip transaction instead) so callers cannot
    /// accidentally suspend mid-transaction and starve the writer lock.
    async fn with_txn<F, T>(&self, f: F) -> Result<T, StashError>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, StashError> + Send + 'static,
        T: Send + 'static;

    /// Whether this handle only permits reads. A read-only stash can still
    /// serve `with_txn` for `items`/lookups; `put`/`delete` inside the
    /// closure will return [`StashError::ReadOnly`].
    fn is_readonly(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
    pub(crate) struct TestKey(pub String);

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub(crate) struct TestValue(pub String);

    #[tokio::test]
    async fn memory_stash_round_trips_values() {
        let stash = MemoryStash::new();
        let collection = stash.collection::<TestKey, TestValue>("widgets").await.unwrap();
        stash
            .with_txn(move |txn| {
                txn.put(collection, TestKey("a".into()), TestValue("1".into()))?;
                Ok(())
            })
            .await
            .unwrap();
        let items = stash
            .with_txn(move |txn| txn.items(collection))
            .await
            .unwrap();
        assert_eq!(items.get(&TestKey("a".into())), Some(&TestValue("1".into())));
    }
}
