//! RocksDB storage backend
//!
//! Point operations hit the DB directly; transactions buffer their writes in
//! a `WriteBatch` and apply them in one atomic write on commit. The keyspace
//! cursor tracks its own last key and re-seeks per chunk, so it survives the
//! deletions the sweeper performs underneath it.

use crate::StorageError;
use crate::config::StorageConfig;
use crate::storage::{Backend, Cursor, Entry, StoredValue, Txn};
use rust_rocksdb::{
    BlockBasedOptions, DB, DBCompactionStyle, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::info;

/// Entries fetched per cursor seek.
const SCAN_CHUNK: usize = 64;

/// RocksDB-backed storage
pub struct RocksBackend {
    db: Arc<DB>,
    write_opts: WriteOptions,
}

impl RocksBackend {
    /// Open or create a RocksDB database
    pub fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_background_jobs(config.max_background_jobs);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_compaction_style(DBCompactionStyle::Level);

        if config.enable_compression {
            opts.set_compression_type(rust_rocksdb::DBCompressionType::Lz4);
        } else {
            opts.set_compression_type(rust_rocksdb::DBCompressionType::None);
        }

        let mut block_opts = BlockBasedOptions::default();
        let cache = rust_rocksdb::Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_cache_index_and_filter_blocks(true);
        opts.set_block_based_table_factory(&block_opts);

        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Internal(format!("Failed to create directory: {e}")))?;
        }

        let db = DB::open(&opts, &config.db_path)?;

        info!(
            "RocksDB opened: path={:?}, block_cache={}MB",
            config.db_path,
            config.block_cache_size / (1024 * 1024),
        );

        // Crash loses unflushed memtable data, which is acceptable for a cache
        let mut write_opts = WriteOptions::default();
        write_opts.disable_wal(true);

        Ok(Self {
            db: Arc::new(db),
            write_opts,
        })
    }
}

impl Backend for RocksBackend {
    fn get(&self, key: &[u8]) -> Result<Option<StoredValue>, StorageError> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(StoredValue::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &[u8], value: &StoredValue) -> Result<(), StorageError> {
        self.db.put_opt(key, value.encode(), &self.write_opts)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool, StorageError> {
        let existed = self.db.get(key)?.is_some();
        // delete is idempotent, always issue it
        self.db.delete_opt(key, &self.write_opts)?;
        Ok(existed)
    }

    fn begin(&self) -> Result<Box<dyn Txn + '_>, StorageError> {
        Ok(Box::new(RocksTxn {
            backend: self,
            batch: WriteBatch::default(),
        }))
    }

    fn cursor(&self) -> Result<Box<dyn Cursor + Send>, StorageError> {
        Ok(Box::new(RocksCursor {
            db: Arc::clone(&self.db),
            last_key: None,
            buffered: VecDeque::new(),
            exhausted: false,
        }))
    }

    fn entry_count(&self) -> Result<u64, StorageError> {
        Ok(self
            .db
            .property_int_value("rocksdb.estimate-num-keys")?
            .unwrap_or(0))
    }
}

/// A batch of writes applied atomically on commit.
struct RocksTxn<'a> {
    backend: &'a RocksBackend,
    batch: WriteBatch,
}

impl Txn for RocksTxn<'_> {
    fn delete(&mut self, key: &[u8]) -> Result<(), StorageError> {
        self.batch.delete(key);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let this = *self;
        this.backend
            .db
            .write_opt(&this.batch, &this.backend.write_opts)?;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Chunked forward scan. Holds no RocksDB iterator across calls; each refill
/// seeks strictly past the last key handed out.
struct RocksCursor {
    db: Arc<DB>,
    last_key: Option<Vec<u8>>,
    buffered: VecDeque<Entry>,
    exhausted: bool,
}

impl RocksCursor {
    fn refill(&mut self) -> Result<(), StorageError> {
        let iter = match &self.last_key {
            None => self.db.iterator(IteratorMode::Start),
            Some(k) => self.db.iterator(IteratorMode::From(k, Direction::Forward)),
        };

        for item in iter {
            let (key, raw) = item?;
            // From(k) seeks inclusively; skip the key we already handed out
            if self.last_key.as_deref() == Some(key.as_ref()) {
                continue;
            }
            let value = StoredValue::decode(&raw)?;
            self.buffered.push_back(Entry {
                key: key.to_vec(),
                value,
            });
            if self.buffered.len() >= SCAN_CHUNK {
                break;
            }
        }

        match self.buffered.back() {
            Some(entry) => self.last_key = Some(entry.key.clone()),
            None => self.exhausted = true,
        }
        Ok(())
    }
}

impl Cursor for RocksCursor {
    fn next_entry(&mut self) -> Result<Option<Entry>, StorageError> {
        if self.buffered.is_empty() && !self.exhausted {
            self.refill()?;
        }
        Ok(self.buffered.pop_front())
    }
}
