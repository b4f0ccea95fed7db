//! Cache service: shared state behind every connection and the sweeper
//!
//! A `Service` owns one keyspace on one storage backend, the CAS sequence,
//! the flush epoch, the per-service statistics and the mutable runtime
//! options. Connections hold it behind an `Arc`; option writes go through
//! [`set_opt`](Service::set_opt) so tunables stay consistent while traffic
//! is flowing.

use crate::config::{CacheConfig, ServiceOption};
use crate::conn::Connection;
use crate::expire::Sweeper;
use crate::protocol::TextProtocol;
use crate::stats::ServiceStat;
use crate::storage::{Backend, StoredValue, current_timestamp};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

/// Verbosity ceiling; the protocol accepts any number, we store at most this.
const MAX_VERBOSITY: u8 = 3;

pub struct Service {
    name: String,
    keyspace: String,
    backend: Arc<dyn Backend>,
    stats: ServiceStat,

    // runtime tunables, see ServiceOption
    batch_count: AtomicU32,
    readahead: AtomicUsize,
    expire_enabled: AtomicBool,
    expire_count: AtomicU32,
    expire_time: AtomicU32,
    flush_enabled: AtomicBool,
    verbosity: AtomicU8,

    /// Next CAS value to hand out; strictly increasing per service.
    cas: AtomicU64,
    /// Flush epoch: entries stored at or before this timestamp are stale
    /// once it passes. Zero means no flush scheduled.
    flush_at: AtomicU64,

    sweeper: Mutex<Option<Sweeper>>,
}

impl Service {
    pub fn with_config(
        name: &str,
        keyspace: &str,
        backend: Arc<dyn Backend>,
        cfg: &CacheConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            keyspace: keyspace.to_string(),
            backend,
            stats: ServiceStat::new(),
            batch_count: AtomicU32::new(cfg.batch_count),
            readahead: AtomicUsize::new(cfg.readahead),
            expire_enabled: AtomicBool::new(cfg.expire_enabled),
            expire_count: AtomicU32::new(cfg.expire_count),
            expire_time: AtomicU32::new(cfg.expire_time),
            flush_enabled: AtomicBool::new(cfg.flush_enabled),
            verbosity: AtomicU8::new(cfg.verbosity.min(MAX_VERBOSITY)),
            cas: AtomicU64::new(1),
            flush_at: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn stats(&self) -> &ServiceStat {
        &self.stats
    }

    pub fn batch_count(&self) -> u32 {
        self.batch_count.load(Ordering::Relaxed)
    }

    pub fn readahead(&self) -> usize {
        self.readahead.load(Ordering::Relaxed)
    }

    pub fn expire_count(&self) -> u32 {
        self.expire_count.load(Ordering::Relaxed)
    }

    pub fn expire_time(&self) -> u32 {
        self.expire_time.load(Ordering::Relaxed)
    }

    pub fn flush_enabled(&self) -> bool {
        self.flush_enabled.load(Ordering::Relaxed)
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity.load(Ordering::Relaxed)
    }

    /// Hand out the next CAS value.
    pub fn next_cas(&self) -> u64 {
        self.cas.fetch_add(1, Ordering::Relaxed)
    }

    /// Whether an entry should be treated as gone: past its own expiry, or
    /// written at or before a flush epoch that has already passed.
    pub fn is_stale(&self, value: &StoredValue) -> bool {
        if value.is_expired() {
            return true;
        }
        let flush_at = self.flush_at.load(Ordering::Relaxed);
        flush_at != 0 && current_timestamp() >= flush_at && value.stored_at <= flush_at
    }

    /// Arrange for every currently stored entry to become stale `delay`
    /// seconds from now. Entries written after the epoch survive it.
    pub fn schedule_flush(&self, delay: u64) {
        let at = current_timestamp() + delay;
        self.flush_at.store(at, Ordering::Relaxed);
        info!(service = %self.name, flush_at = at, "flush scheduled");
    }

    /// Apply one runtime option. Unknown options do not exist at this
    /// layer; the enum is the full set.
    pub fn set_opt(self: &Arc<Self>, opt: ServiceOption) {
        debug!(service = %self.name, ?opt, "option updated");
        match opt {
            ServiceOption::Readahead(n) => {
                self.readahead.store(n, Ordering::Relaxed);
            }
            ServiceOption::ExpireEnabled(enabled) => {
                self.expire_enabled.store(enabled, Ordering::Relaxed);
                if enabled {
                    self.start();
                } else if let Some(sweeper) = self.sweeper.lock().take() {
                    // signal only; the task exits at its next sleep
                    sweeper.cancel();
                }
            }
            ServiceOption::ExpireCount(n) => {
                self.expire_count.store(n, Ordering::Relaxed);
            }
            ServiceOption::ExpireTime(n) => {
                self.expire_time.store(n, Ordering::Relaxed);
            }
            ServiceOption::FlushEnabled(enabled) => {
                self.flush_enabled.store(enabled, Ordering::Relaxed);
            }
            ServiceOption::Verbosity(level) => {
                self.verbosity.store(level.min(MAX_VERBOSITY), Ordering::Relaxed);
            }
        }
    }

    /// Start the expiration sweeper if enabled and not already running.
    pub fn start(self: &Arc<Self>) {
        if !self.expire_enabled.load(Ordering::Relaxed) {
            return;
        }
        let mut slot = self.sweeper.lock();
        if slot.is_none() {
            *slot = Some(Sweeper::start(Arc::clone(self)));
        }
    }

    /// Graceful shutdown: stop the sweeper, then wait for in-flight
    /// connections to drain.
    pub async fn stop(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
        while self.stats.curr_conns() > 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        info!(service = %self.name, "service stopped");
    }

    /// Drive one client connection to completion.
    pub async fn serve_connection<S>(self: Arc<Self>, stream: &mut S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.stats.conn_opened();
        let mut conn = Connection::new(Arc::clone(&self));
        let mut handler = TextProtocol::new();
        conn.run(stream, &mut handler).await;
        self.stats.conn_closed();
    }

    #[cfg(test)]
    pub(crate) fn sweeper_running(&self) -> bool {
        self.sweeper.lock().is_some()
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("keyspace", &self.keyspace)
            .finish_non_exhaustive()
    }
}
