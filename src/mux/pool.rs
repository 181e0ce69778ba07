// src/mux/pool.rs

//! The worker pool (C2), mapped onto `tokio`'s task model: each
//! accepted connection is one task, and a bounded
//! `tokio::sync::Semaphore` stands in for the bounded queue. Acquiring a
//! permit is the "dequeue"; failing to acquire one immediately surfaces
//! `Busy` so the accept loop can apply backpressure-by-drop.

use crate::core::PpdbError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, warn};

/// How long a stopping service waits for its workers to finish on their
/// own before giving up and leaving them running.
pub const DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Waits up to `grace` for every task in `tasks` to complete on its own.
/// Never aborts: whatever is still outstanding once the deadline passes
/// is logged and left running rather than forcibly killed.
pub async fn drain<T: Send + 'static>(tasks: &mut JoinSet<T>, label: &str, grace: Duration) {
    let deadline = Instant::now() + grace;
    while !tasks.is_empty() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!(
                "{label}: {} worker(s) still running after {grace:?} drain window; leaving them running",
                tasks.len()
            );
            return;
        }
        match tokio::time::timeout(remaining, tasks.join_next()).await {
            Ok(Some(Err(e))) => error!("{label}: worker task panicked during drain: {e:?}"),
            Ok(Some(Ok(_))) => {}
            Ok(None) => return,
            Err(_) => {
                warn!(
                    "{label}: {} worker(s) still running after {grace:?} drain window; leaving them running",
                    tasks.len()
                );
                return;
            }
        }
    }
}

/// Bounds the number of connections handled concurrently by one
/// personality. `min_workers`/`max_workers` in configuration both
/// collapse to this single capacity, since tokio tasks are far cheaper
/// than the OS threads the C thread pool managed — there is no separate
/// "spawn a new worker" step to throttle.
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
        }
    }

    /// Attempts to admit one more connection. Never blocks the caller:
    /// on exhaustion it returns `Busy` immediately rather than queuing.
    pub fn try_admit(&self) -> Result<OwnedSemaphorePermit, PpdbError> {
        self.permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| PpdbError::Busy)
    }
}
