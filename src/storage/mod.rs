//! Storage layer: the transactional keyed-store seam
//!
//! The connection loop and the expiration sweeper only ever talk to the
//! [`Backend`] trait. [`RocksBackend`] is the production engine;
//! [`MemBackend`] is an ordered in-memory engine used by the unit tests and
//! for embedding without a data directory.

mod mem;
mod rocks;
mod value;

pub use mem::MemBackend;
pub use rocks::RocksBackend;
pub use value::{StoredValue, calculate_expire_at, current_timestamp};

use crate::StorageError;

/// One entry yielded by a keyspace scan.
#[derive(Debug, Clone)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: StoredValue,
}

/// Transactional keyed store.
///
/// Point operations are individually atomic. Multi-key work (the sweeper's
/// delete batches) goes through [`Backend::begin`]; a transaction's writes
/// become visible only on commit.
pub trait Backend: Send + Sync {
    /// Point lookup. Decodes the stored value; expiry is the caller's concern.
    fn get(&self, key: &[u8]) -> Result<Option<StoredValue>, StorageError>;

    /// Store a value under a key, overwriting any previous entry.
    fn set(&self, key: &[u8], value: &StoredValue) -> Result<(), StorageError>;

    /// Delete a key. Returns whether the key existed.
    fn delete(&self, key: &[u8]) -> Result<bool, StorageError>;

    /// Begin a transaction scoped to this backend.
    fn begin(&self) -> Result<Box<dyn Txn + '_>, StorageError>;

    /// Open an ordered full-keyspace cursor. The cursor owns its position
    /// and stays valid across transactions until exhausted or dropped.
    fn cursor(&self) -> Result<Box<dyn Cursor + Send>, StorageError>;

    /// Keyspace cardinality (may be an estimate).
    fn entry_count(&self) -> Result<u64, StorageError>;
}

/// An open transaction. Dropping without commit discards all buffered writes.
pub trait Txn {
    /// Delete a key within the transaction.
    fn delete(&mut self, key: &[u8]) -> Result<(), StorageError>;

    /// Atomically apply everything buffered in the transaction.
    fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Discard the transaction.
    fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}

/// Ordered scan over the whole keyspace.
pub trait Cursor: Send {
    /// Next entry in key order, or `None` when the keyspace is exhausted.
    fn next_entry(&mut self) -> Result<Option<Entry>, StorageError>;
}
