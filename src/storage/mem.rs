//! In-memory storage backend
//!
//! An ordered map behind a lock. Matches the [`Backend`] contract closely
//! enough to stand in for RocksDB in tests and embedded use; scans see a
//! live view, not a snapshot, same as the seek-based RocksDB cursor.

use crate::StorageError;
use crate::storage::{Backend, Cursor, Entry, StoredValue, Txn};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// Ordered in-memory key/value store.
#[derive(Default)]
pub struct MemBackend {
    map: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemBackend {
    fn get(&self, key: &[u8]) -> Result<Option<StoredValue>, StorageError> {
        match self.map.read().get(key) {
            Some(bytes) => Ok(Some(StoredValue::decode(bytes)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &[u8], value: &StoredValue) -> Result<(), StorageError> {
        self.map.write().insert(key.to_vec(), value.encode());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.map.write().remove(key).is_some())
    }

    fn begin(&self) -> Result<Box<dyn Txn + '_>, StorageError> {
        Ok(Box::new(MemTxn {
            map: Arc::clone(&self.map),
            deletes: Vec::new(),
        }))
    }

    fn cursor(&self) -> Result<Box<dyn Cursor + Send>, StorageError> {
        Ok(Box::new(MemCursor {
            map: Arc::clone(&self.map),
            last_key: None,
        }))
    }

    fn entry_count(&self) -> Result<u64, StorageError> {
        Ok(self.map.read().len() as u64)
    }
}

/// Buffered deletes, applied under one write lock on commit.
struct MemTxn {
    map: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    deletes: Vec<Vec<u8>>,
}

impl Txn for MemTxn {
    fn delete(&mut self, key: &[u8]) -> Result<(), StorageError> {
        self.deletes.push(key.to_vec());
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let mut map = self.map.write();
        for key in &self.deletes {
            map.remove(key);
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Position-tracking cursor: each step seeks strictly past the last key seen,
/// so concurrent deletes never invalidate it.
struct MemCursor {
    map: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    last_key: Option<Vec<u8>>,
}

impl Cursor for MemCursor {
    fn next_entry(&mut self) -> Result<Option<Entry>, StorageError> {
        let map = self.map.read();
        let lower = match &self.last_key {
            Some(k) => Bound::Excluded(k.clone()),
            None => Bound::Unbounded,
        };
        let next = map
            .range((lower, Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()));
        drop(map);

        match next {
            Some((key, bytes)) => {
                let value = StoredValue::decode(&bytes)?;
                self.last_key = Some(key.clone());
                Ok(Some(Entry { key, value }))
            }
            None => Ok(None),
        }
    }
}
