//! Typed buckets and secondary indexes over an embedded ACID key-value store.
//!
//! Buckets are redb tables holding JSON-encoded records; secondary indexes
//! are multimap tables mapping a term to a set of targets. All access goes
//! through [`Store::with_read`] / [`Store::with_write`] so the transaction
//! is acquired and released on every exit path; a write scope commits only
//! when the closure returns `Ok`. An uncommitted transaction (early return,
//! error, panic) is aborted with no partial effects.
//!
//! Records are serialized as JSON. New fields must carry `#[serde(default)]`
//! so readers of older records keep working.

pub mod buckets;

use std::borrow::Borrow;
use std::marker::PhantomData;
use std::path::Path;

use redb::{
    Database, Key as RedbKey, MultimapTableDefinition, ReadTransaction, ReadableMultimapTable,
    ReadableTable, TableDefinition, WriteTransaction,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{Error, Result};

/// A typed bucket: `K` is the record key, `V` the record type.
pub struct Bucket<K: RedbKey + 'static, V> {
    name: &'static str,
    def: TableDefinition<'static, K, &'static [u8]>,
    _v: PhantomData<fn() -> V>,
}

impl<K: RedbKey + 'static, V> Bucket<K, V> {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            def: TableDefinition::new(name),
            _v: PhantomData,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

/// A secondary index: one term maps to many targets.
pub struct Index<T: RedbKey + 'static, U: RedbKey + 'static> {
    def: MultimapTableDefinition<'static, T, U>,
}

impl<T: RedbKey + 'static, U: RedbKey + 'static> Index<T, U> {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            def: MultimapTableDefinition::new(name),
        }
    }
}

/// Handle to the embedded store. Cheap to share behind an `Arc`; redb
/// serializes writers internally and runs readers in parallel.
pub struct Store {
    db: Database,
}

impl Store {
    /// Open (or create) the store file and ensure every bucket and index
    /// exists, so later read transactions never observe a missing table.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("create data dir: {e}")))?;
        }
        let db = Database::create(path)?;
        let txn = db.begin_write()?;
        buckets::create_all(&txn)?;
        txn.commit()?;
        Ok(Self { db })
    }

    /// Run `f` inside a read transaction.
    pub fn with_read<T>(&self, f: impl FnOnce(&ReadCtx) -> Result<T>) -> Result<T> {
        let txn = self.db.begin_read()?;
        let ctx = ReadCtx { txn };
        f(&ctx)
    }

    /// Run `f` inside a write transaction. Commits when `f` returns `Ok`,
    /// aborts otherwise.
    pub fn with_write<T>(&self, f: impl FnOnce(&WriteCtx) -> Result<T>) -> Result<T> {
        let txn = self.db.begin_write()?;
        let ctx = WriteCtx { txn };
        match f(&ctx) {
            Ok(value) => {
                ctx.txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                // Abort failure is secondary to the original error.
                let _ = ctx.txn.abort();
                Err(e)
            }
        }
    }
}

/// Read operations available inside both transaction kinds.
macro_rules! read_ops {
    ($ctx:ident) => {
        impl $ctx {
            /// Fetch and decode one record. `None` when absent.
            pub fn get<'k, K, V>(
                &self,
                bucket: &Bucket<K, V>,
                key: impl Borrow<K::SelfType<'k>>,
            ) -> Result<Option<V>>
            where
                K: RedbKey + 'static,
                V: DeserializeOwned,
            {
                let table = self.txn.open_table(bucket.def)?;
                let result = match table.get(key)? {
                    Some(guard) => Some(serde_json::from_slice(guard.value())?),
                    None => None,
                };
                Ok(result)
            }

            /// Visit every record in key order. The visitor returns `false`
            /// to stop early.
            pub fn for_each<K, V, F>(&self, bucket: &Bucket<K, V>, mut f: F) -> Result<()>
            where
                K: RedbKey + 'static,
                V: DeserializeOwned,
                F: for<'a> FnMut(K::SelfType<'a>, V) -> bool,
            {
                let table = self.txn.open_table(bucket.def)?;
                for item in table.iter()? {
                    let (key, value) = item?;
                    let record: V = serde_json::from_slice(value.value())?;
                    if !f(key.value(), record) {
                        break;
                    }
                }
                Ok(())
            }

            /// Visit every target linked to `term`.
            pub fn for_each_target<'k, T, U, F>(
                &self,
                index: &Index<T, U>,
                term: impl Borrow<T::SelfType<'k>>,
                mut f: F,
            ) -> Result<()>
            where
                T: RedbKey + 'static,
                U: RedbKey + 'static,
                F: for<'a> FnMut(U::SelfType<'a>),
            {
                let table = self.txn.open_multimap_table(index.def)?;
                for item in table.get(term)? {
                    f(item?.value());
                }
                Ok(())
            }

            /// Targets of `term` for `u64`-valued indexes.
            pub fn targets<'k, T>(
                &self,
                index: &Index<T, u64>,
                term: impl Borrow<T::SelfType<'k>>,
            ) -> Result<Vec<u64>>
            where
                T: RedbKey + 'static,
            {
                let mut out = Vec::new();
                self.for_each_target(index, term, |t| out.push(t))?;
                Ok(out)
            }

            /// Targets of `term` for string-valued indexes.
            pub fn str_targets<'k, T>(
                &self,
                index: &Index<T, &'static str>,
                term: impl Borrow<T::SelfType<'k>>,
            ) -> Result<Vec<String>>
            where
                T: RedbKey + 'static,
            {
                let mut out = Vec::new();
                self.for_each_target(index, term, |t: &str| out.push(t.to_string()))?;
                Ok(out)
            }

            /// Look up the room owning a stream key.
            pub fn room_by_stream_key(&self, stream_key: &str) -> Result<Option<u64>> {
                let table = self.txn.open_table(buckets::STREAM_KEYS)?;
                let result = table.get(stream_key)?.map(|g| g.value());
                Ok(result)
            }
        }
    };
}

pub struct ReadCtx {
    txn: ReadTransaction,
}

pub struct WriteCtx {
    txn: WriteTransaction,
}

read_ops!(ReadCtx);
read_ops!(WriteCtx);

impl WriteCtx {
    /// Encode and write one record.
    pub fn put<'k, K, V>(
        &self,
        bucket: &Bucket<K, V>,
        key: impl Borrow<K::SelfType<'k>>,
        value: &V,
    ) -> Result<()>
    where
        K: RedbKey + 'static,
        V: Serialize,
    {
        let bytes = serde_json::to_vec(value)?;
        let mut table = self.txn.open_table(bucket.def)?;
        table.insert(key, bytes.as_slice())?;
        Ok(())
    }

    /// Delete one record. Returns whether it existed.
    pub fn delete<'k, K, V>(
        &self,
        bucket: &Bucket<K, V>,
        key: impl Borrow<K::SelfType<'k>>,
    ) -> Result<bool>
    where
        K: RedbKey + 'static,
    {
        let mut table = self.txn.open_table(bucket.def)?;
        let existed = table.remove(key)?.is_some();
        Ok(existed)
    }

    /// Allocate the next monotonically increasing id for `bucket`.
    pub fn next_id<K, V>(&self, bucket: &Bucket<K, V>) -> Result<u64>
    where
        K: RedbKey + 'static,
    {
        let mut table = self.txn.open_table(buckets::SEQUENCES)?;
        let next = table.get(bucket.name)?.map_or(0, |g| g.value()) + 1;
        table.insert(bucket.name, next)?;
        Ok(next)
    }

    /// Link `target` under `term`.
    pub fn link<'k, T, U>(
        &self,
        index: &Index<T, U>,
        term: impl Borrow<T::SelfType<'k>>,
        target: impl Borrow<U::SelfType<'k>>,
    ) -> Result<()>
    where
        T: RedbKey + 'static,
        U: RedbKey + 'static,
    {
        let mut table = self.txn.open_multimap_table(index.def)?;
        table.insert(term, target)?;
        Ok(())
    }

    /// Remove `target` from under `term`. Returns whether the pair existed.
    pub fn unlink<'k, T, U>(
        &self,
        index: &Index<T, U>,
        term: impl Borrow<T::SelfType<'k>>,
        target: impl Borrow<U::SelfType<'k>>,
    ) -> Result<bool>
    where
        T: RedbKey + 'static,
        U: RedbKey + 'static,
    {
        let mut table = self.txn.open_multimap_table(index.def)?;
        Ok(table.remove(term, target)?)
    }

    /// Drop every target under `term`.
    pub fn unlink_all<'k, T, U>(
        &self,
        index: &Index<T, U>,
        term: impl Borrow<T::SelfType<'k>>,
    ) -> Result<()>
    where
        T: RedbKey + 'static,
        U: RedbKey + 'static,
    {
        let mut table = self.txn.open_multimap_table(index.def)?;
        table.remove_all(term)?;
        Ok(())
    }

    /// Claim a stream key for a room. Fails with `Conflict` when the key is
    /// already owned by a different room.
    pub fn claim_stream_key(&self, stream_key: &str, room_id: u64) -> Result<()> {
        let mut table = self.txn.open_table(buckets::STREAM_KEYS)?;
        if let Some(existing) = table.get(stream_key)? {
            if existing.value() != room_id {
                return Err(Error::conflict("stream key already in use"));
            }
        }
        table.insert(stream_key, room_id)?;
        Ok(())
    }

    /// Release a stream key (room deletion or key rotation).
    pub fn release_stream_key(&self, stream_key: &str) -> Result<()> {
        let mut table = self.txn.open_table(buckets::STREAM_KEYS)?;
        table.remove(stream_key)?;
        Ok(())
    }
}
