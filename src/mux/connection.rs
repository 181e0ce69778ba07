// src/mux/connection.rs

//! The shared shape of a per-connection record (C3), independent of
//! which personality (memcached, forwarder) is driving it.
//!
//! `closing_flag` is monotonic (once set, never cleared) and
//! `last_active_at` only moves forward. Both are realized as `Atomic*`
//! fields on an `Arc`-shared struct rather than a mutex-guarded
//! linked-list node.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::time::Duration;

/// Statistics emitted at teardown.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionStats {
    pub lifetime: Duration,
    pub idle_at_close: Duration,
    pub total_commands: u64,
    pub failed_commands: u64,
}

/// Per-connection lifecycle state shared by every personality. Exclusively
/// owned by the task handling the connection; the accept loop transfers
/// ownership at dispatch and never touches it again.
pub struct ConnectionHandle {
    pub peer_addr: SocketAddr,
    created_at: Instant,
    // Stored as milliseconds-since-`created_at` so it can live in an
    // AtomicU64 and only ever move forward.
    last_active_ms: AtomicU64,
    closing_flag: AtomicBool,
    total_commands: AtomicU64,
    failed_commands: AtomicU64,
}

impl ConnectionHandle {
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            peer_addr,
            created_at: Instant::now(),
            last_active_ms: AtomicU64::new(0),
            closing_flag: AtomicBool::new(false),
            total_commands: AtomicU64::new(0),
            failed_commands: AtomicU64::new(0),
        }
    }

    /// Records activity now. Monotonic by construction: elapsed time
    /// since `created_at` can only increase between calls.
    pub fn touch(&self) {
        let elapsed_ms = self.created_at.elapsed().as_millis() as u64;
        self.last_active_ms.store(elapsed_ms, Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let last_active = self.last_active_ms.load(Ordering::Relaxed);
        let elapsed = self.created_at.elapsed().as_millis() as u64;
        Duration::from_millis(elapsed.saturating_sub(last_active))
    }

    /// Sets `closing_flag`. Idempotent: once set, later calls are no-ops.
    pub fn mark_closing(&self) {
        self.closing_flag.store(true, Ordering::SeqCst);
    }

    pub fn is_closing(&self) -> bool {
        self.closing_flag.load(Ordering::SeqCst)
    }

    pub fn record_command(&self, failed: bool) {
        self.total_commands.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed_commands.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Snapshots final statistics for the teardown log line. Safe to call
    /// more than once; `destroy` being idempotent does not mean stats are
    /// only read once.
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            lifetime: self.created_at.elapsed(),
            idle_at_close: self.idle_for(),
            total_commands: self.total_commands.load(Ordering::Relaxed),
            failed_commands: self.failed_commands.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    #[test]
    fn closing_flag_is_monotonic() {
        let handle = ConnectionHandle::new(addr());
        assert!(!handle.is_closing());
        handle.mark_closing();
        assert!(handle.is_closing());
        handle.mark_closing();
        assert!(handle.is_closing());
    }

    #[test]
    fn stats_reflect_recorded_commands() {
        let handle = ConnectionHandle::new(addr());
        handle.record_command(false);
        handle.record_command(true);
        let stats = handle.stats();
        assert_eq!(stats.total_commands, 2);
        assert_eq!(stats.failed_commands, 1);
    }
}
