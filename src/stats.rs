//! Service statistics counters
//!
//! Plain relaxed atomics shared between connections and the expiration
//! sweeper. The counts are advisory; a benign race on increment is fine.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-service counter aggregate, surfaced through the `stats` command.
#[derive(Debug, Default)]
pub struct ServiceStat {
    // connection counters
    pub curr_conns: AtomicU64,
    pub total_conns: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,

    // command counters
    pub cmd_get: AtomicU64,
    pub cmd_set: AtomicU64,
    pub cmd_delete: AtomicU64,
    pub cmd_touch: AtomicU64,
    pub cmd_flush: AtomicU64,
    pub cmd_incr: AtomicU64,
    pub cmd_decr: AtomicU64,

    // hit/miss counters
    pub get_hits: AtomicU64,
    pub get_misses: AtomicU64,

    // expiration counters
    pub evictions: AtomicU64,
    pub reclaimed: AtomicU64,
}

impl ServiceStat {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add_bytes_read(&self, n: u64) {
        self.bytes_read.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_bytes_written(&self, n: u64) {
        self.bytes_written.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn conn_opened(&self) {
        self.total_conns.fetch_add(1, Ordering::Relaxed);
        self.curr_conns.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn conn_closed(&self) {
        self.curr_conns.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn curr_conns(&self) -> u64 {
        self.curr_conns.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn evicted(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters as name/value pairs, in `stats` output order.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        vec![
            ("curr_connections", load(&self.curr_conns)),
            ("total_connections", load(&self.total_conns)),
            ("bytes_read", load(&self.bytes_read)),
            ("bytes_written", load(&self.bytes_written)),
            ("cmd_get", load(&self.cmd_get)),
            ("cmd_set", load(&self.cmd_set)),
            ("cmd_delete", load(&self.cmd_delete)),
            ("cmd_touch", load(&self.cmd_touch)),
            ("cmd_flush", load(&self.cmd_flush)),
            ("cmd_incr", load(&self.cmd_incr)),
            ("cmd_decr", load(&self.cmd_decr)),
            ("get_hits", load(&self.get_hits)),
            ("get_misses", load(&self.get_misses)),
            ("evictions", load(&self.evictions)),
            ("reclaimed", load(&self.reclaimed)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_counters() {
        let stat = ServiceStat::new();
        stat.conn_opened();
        stat.conn_opened();
        stat.conn_closed();

        assert_eq!(stat.curr_conns(), 1);
        assert_eq!(stat.total_conns.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn snapshot_contains_eviction_count() {
        let stat = ServiceStat::new();
        stat.evicted();
        stat.evicted();

        let snap = stat.snapshot();
        let (_, evictions) = snap.iter().find(|(k, _)| *k == "evictions").unwrap();
        assert_eq!(*evictions, 2);
    }
}
