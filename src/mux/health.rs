// src/mux/health.rs

//! The health monitor (C4), mapped onto tokio's task model.
//!
//! A supervisor thread watching worker threads for stalled heartbeats
//! and replacing them in place keeps `worker_id` stable across
//! restarts. Tasks can't be restarted the same way a thread can, so
//! there is no separate worker to replace here — the unit of
//! stuck-ness is instead a connection whose `last_active_at` has
//! stopped advancing. This monitor enforces idle-eviction actively:
//! every registered connection is checked on every tick, not merely
//! configured and left alone.
//!
//! Registered connections live in a `slab`-backed arena behind a
//! `parking_lot::Mutex`, giving stable integer handles across removal.

use crate::mux::connection::ConnectionHandle;
use parking_lot::Mutex;
use slab::Slab;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{info, warn};

pub type ConnectionKey = usize;

#[derive(Default)]
pub struct ConnectionRegistry {
    entries: Mutex<Slab<Arc<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<ConnectionHandle>) -> ConnectionKey {
        self.entries.lock().insert(handle)
    }

    pub fn remove(&self, key: ConnectionKey) {
        let mut entries = self.entries.lock();
        if entries.contains(key) {
            entries.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks every connection idle past `idle_timeout` for closing.
    /// Returns how many connections were newly marked, for logging.
    fn evict_idle(&self, idle_timeout: Duration) -> usize {
        let entries = self.entries.lock();
        let mut evicted = 0;
        for (_, handle) in entries.iter() {
            if !handle.is_closing() && handle.idle_for() > idle_timeout {
                handle.mark_closing();
                evicted += 1;
            }
        }
        evicted
    }
}

/// Runs the idle-eviction sweep on a two-second interval, until the
/// shared shutdown signal fires.
pub async fn run_idle_evictor(
    name: &'static str,
    registry: Arc<ConnectionRegistry>,
    idle_timeout: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = interval(Duration::from_secs(2));
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                info!("{name}: health monitor shutting down");
                return;
            }
            _ = ticker.tick() => {
                let evicted = registry.evict_idle(idle_timeout);
                if evicted > 0 {
                    warn!("{name}: marked {evicted} idle connection(s) for closing");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    #[test]
    fn evicts_only_stale_connections() {
        let registry = ConnectionRegistry::new();
        let fresh = Arc::new(ConnectionHandle::new(addr()));
        fresh.touch();
        let key = registry.insert(fresh.clone());

        let evicted = registry.evict_idle(Duration::from_secs(3600));
        assert_eq!(evicted, 0);
        assert!(!fresh.is_closing());

        let evicted = registry.evict_idle(Duration::from_millis(0));
        assert_eq!(evicted, 1);
        assert!(fresh.is_closing());

        registry.remove(key);
        assert!(registry.is_empty());
    }
}
