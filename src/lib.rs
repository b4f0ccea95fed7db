//! # SlateCache
//!
//! Memcached-compatible cache service backed by a transactional RocksDB
//! keyspace, with background expiration.
//!
//! ## Features
//!
//! - Memcached ASCII protocol (get/gets, set/add/replace/cas, delete,
//!   incr/decr, touch, flush_all, stats, version)
//! - Pipelined request batching with bounded reply flushes
//! - RocksDB persistent storage, plus an in-memory backend for embedding
//! - TTL support with lazy expiration and a paced background sweeper
//! - Epoch-based `flush_all` that invalidates without bulk deletion
//!
//! ## Example
//!
//! ```ignore
//! use slatecache::config::Config;
//! use slatecache::service::Service;
//! use slatecache::storage::RocksBackend;
//! use std::sync::Arc;
//!
//! let config = Config::default();
//! let backend = Arc::new(RocksBackend::open(&config.storage)?);
//! let service = Service::with_config("mc", "default", backend, &config.cache);
//! service.start();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────────────────────────┐
//! │ memcache     │────▶│ SlateCache                           │
//! │ client       │     │  ├─ conn: batched request loop       │
//! └──────────────┘     │  ├─ protocol: ASCII parse/dispatch   │
//!                      │  ├─ expire: paced sweeper            │
//!                      │  └─ storage: transactional keyspace  │
//!                      └──────────────────────────────────────┘
//! ```

// Modules
pub mod config;
pub mod conn;
pub mod error;
pub mod expire;
pub mod prelude;
pub mod protocol;
pub mod server;
pub mod service;
pub mod stats;
pub mod storage;

// Re-exports for convenience
pub use error::{ProtocolError, Result, SlateError, StorageError};
