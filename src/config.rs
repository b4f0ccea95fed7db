//! Configuration for slatecache

use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen_addr: String,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Number of Tokio worker threads (0 = number of CPUs)
    pub worker_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:11211".to_string(),
            max_connections: 10000,
            worker_threads: 0,
        }
    }
}

/// Storage (RocksDB) configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to RocksDB data directory
    pub db_path: PathBuf,

    /// Block cache size in bytes
    pub block_cache_size: usize,

    /// Write buffer size in bytes
    pub write_buffer_size: usize,

    /// Maximum number of write buffers
    pub max_write_buffer_number: i32,

    /// Maximum number of background jobs
    pub max_background_jobs: i32,

    /// Enable compression
    pub enable_compression: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/rocksdb"),
            block_cache_size: 256 * 1024 * 1024,
            write_buffer_size: 64 * 1024 * 1024,
            max_write_buffer_number: 3,
            max_background_jobs: 4,
            enable_compression: false,
        }
    }
}

/// Cache service configuration: the tunables behind [`ServiceOption`] plus
/// the pipelining batch cap. These become the service's initial option values.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Requests processed back-to-back before a flush is forced
    pub batch_count: u32,

    /// Input buffer capacity pre-reserved for the next read (bytes)
    pub readahead: usize,

    /// Run the background expiration sweeper
    pub expire_enabled: bool,

    /// Entries examined per sweep pass
    pub expire_count: u32,

    /// Target duration of one full keyspace sweep (seconds)
    pub expire_time: u32,

    /// Honor the flush_all command
    pub flush_enabled: bool,

    /// Verbosity level, clamped to 0..=3
    pub verbosity: u8,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            batch_count: 20,
            readahead: 16 * 1024,
            expire_enabled: true,
            expire_count: 50,
            expire_time: 3600,
            flush_enabled: true,
            verbosity: 0,
        }
    }
}

/// A single named service option.
///
/// An enum rather than a stringly-typed setter: unknown options are
/// unrepresentable and each option carries its payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOption {
    /// Input buffer capacity pre-reserved for the next read (bytes)
    Readahead(usize),
    /// Start or stop the background expiration sweeper
    ExpireEnabled(bool),
    /// Entries examined per sweep pass
    ExpireCount(u32),
    /// Target duration of one full keyspace sweep (seconds)
    ExpireTime(u32),
    /// Honor the flush_all command
    FlushEnabled(bool),
    /// Verbosity level, clamped to 0..=3
    Verbosity(u8),
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| crate::SlateError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&contents)
            .map_err(|e| crate::SlateError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables or use defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("SLATECACHE_LISTEN_ADDR") {
            config.server.listen_addr = addr;
        }

        if let Ok(max_conn) = std::env::var("SLATECACHE_MAX_CONNECTIONS")
            && let Ok(n) = max_conn.parse()
        {
            config.server.max_connections = n;
        }

        if let Ok(path) = std::env::var("SLATECACHE_DB_PATH") {
            config.storage.db_path = PathBuf::from(path);
        }

        if let Ok(count) = std::env::var("SLATECACHE_EXPIRE_COUNT")
            && let Ok(n) = count.parse()
        {
            config.cache.expire_count = n;
        }

        if let Ok(time) = std::env::var("SLATECACHE_EXPIRE_TIME")
            && let Ok(n) = time.parse()
        {
            config.cache.expire_time = n;
        }

        if let Ok(enabled) = std::env::var("SLATECACHE_EXPIRE_ENABLED") {
            config.cache.expire_enabled = enabled.to_lowercase() == "true" || enabled == "1";
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_contract() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.batch_count, 20);
        assert_eq!(cfg.expire_count, 50);
        assert_eq!(cfg.expire_time, 3600);
        assert_eq!(cfg.readahead, 16 * 1024);
        assert!(cfg.expire_enabled);
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: Config = toml::from_str(
            r#"
            [cache]
            batch_count = 4
            expire_count = 10
            "#,
        )
        .unwrap();
        assert_eq!(cfg.cache.batch_count, 4);
        assert_eq!(cfg.cache.expire_count, 10);
        // untouched sections keep defaults
        assert_eq!(cfg.server.listen_addr, "127.0.0.1:11211");
    }
}
