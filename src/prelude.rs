//! Prelude module for common imports.
//!
//! This module re-exports commonly used types and traits for convenience.
//!
//! # Usage
//!
//! ```ignore
//! use slatecache::prelude::*;
//! ```

// Error types
pub use crate::error::{ProtocolError, Result, SlateError, StorageError};

// Configuration
pub use crate::config::{CacheConfig, Config, ServerConfig, ServiceOption, StorageConfig};

// Storage
pub use crate::storage::{Backend, MemBackend, RocksBackend, StoredValue};

// Protocol
pub use crate::protocol::{Command, ParseResult, ResponseWriter, TextProtocol};

// Service and server
pub use crate::server::Server;
pub use crate::service::Service;
pub use crate::stats::ServiceStat;

// Common external crates
pub use std::sync::Arc;
pub use tracing::{debug, error, info, trace, warn};
