// src/memcached/stats.rs

//! The exact counter set the `stats` command must print, tracked on
//! plain atomics rather than the Prometheus registry: the wire protocol
//! needs an exact field set, and Prometheus stays a separate
//! operational surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug)]
pub struct MemcachedStats {
    start: Instant,
    cmd_get: AtomicU64,
    cmd_set: AtomicU64,
    cmd_delete: AtomicU64,
    get_hits: AtomicU64,
    get_misses: AtomicU64,
    total_items: AtomicU64,
    bytes_stored: AtomicU64,
}

impl Default for MemcachedStats {
    fn default() -> Self {
        Self {
            start: Instant::now(),
            cmd_get: AtomicU64::new(0),
            cmd_set: AtomicU64::new(0),
            cmd_delete: AtomicU64::new(0),
            get_hits: AtomicU64::new(0),
            get_misses: AtomicU64::new(0),
            total_items: AtomicU64::new(0),
            bytes_stored: AtomicU64::new(0),
        }
    }
}

impl MemcachedStats {
    pub fn record_get(&self, hit: bool) {
        self.cmd_get.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.get_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.get_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_set(&self, value_len: usize) {
        self.cmd_set.fetch_add(1, Ordering::Relaxed);
        self.total_items.fetch_add(1, Ordering::Relaxed);
        self.bytes_stored
            .fetch_add(value_len as u64, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.cmd_delete.fetch_add(1, Ordering::Relaxed);
    }

    /// Formats the required `STAT <k> <v>\r\n` lines followed by `END\r\n`.
    pub fn render(&self, curr_items: u64) -> String {
        let uptime = self.start.elapsed().as_secs();
        let mut out = String::new();
        out.push_str(&format!("STAT uptime {uptime}\r\n"));
        out.push_str(&format!(
            "STAT cmd_get {}\r\n",
            self.cmd_get.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "STAT cmd_set {}\r\n",
            self.cmd_set.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "STAT cmd_delete {}\r\n",
            self.cmd_delete.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "STAT get_hits {}\r\n",
            self.get_hits.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "STAT get_misses {}\r\n",
            self.get_misses.load(Ordering::Relaxed)
        ));
        out.push_str(&format!("STAT curr_items {curr_items}\r\n"));
        out.push_str(&format!(
            "STAT total_items {}\r\n",
            self.total_items.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "STAT bytes {}\r\n",
            self.bytes_stored.load(Ordering::Relaxed)
        ));
        out.push_str("END\r\n");
        out
    }
}
