// src/mux/registry.rs

//! The service registry and per-personality lifecycle state machine (C8).
//!
//! A process-wide, lazily-initialized registry mapping `service_name`
//! to its lifecycle record. `once_cell::sync::Lazy` plus
//! `dashmap::DashMap` give a process-wide shared table with an explicit
//! init-once guard, without a separate startup step to order against.

use crate::core::PpdbError;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::Arc;

/// `INIT → READY → RUNNING → STOPPING → STOPPED`, with `ERROR` as a sink
/// reachable from any state on fatal init failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Init,
    Ready,
    Running,
    Stopping,
    Stopped,
    Error,
}

/// Per-personality lifecycle record. The registry owns this; a service
/// owns its multiplexer (accept loop + worker pool), not the other way
/// around.
pub struct ServiceRecord {
    pub name: String,
    state: Mutex<ServiceState>,
}

impl ServiceRecord {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ServiceState::Init),
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    /// `init(config)` allowed only from `INIT`/`STOPPED`; on success → `READY`.
    pub fn transition_init(&self) -> Result<(), PpdbError> {
        let mut state = self.state.lock();
        match *state {
            ServiceState::Init | ServiceState::Stopped => {
                *state = ServiceState::Ready;
                Ok(())
            }
            _ => Err(PpdbError::InvalidState(format!(
                "{}: init() requires INIT or STOPPED",
                self.name
            ))),
        }
    }

    /// `start()` allowed only from `READY`/`STOPPED`; on success → `RUNNING`.
    pub fn transition_start(&self) -> Result<(), PpdbError> {
        let mut state = self.state.lock();
        match *state {
            ServiceState::Ready | ServiceState::Stopped => {
                *state = ServiceState::Running;
                Ok(())
            }
            _ => Err(PpdbError::InvalidState(format!(
                "{}: start() requires READY or STOPPED",
                self.name
            ))),
        }
    }

    /// `stop()` allowed only from `RUNNING`; → `STOPPING` then, once the
    /// caller finishes draining, `mark_stopped`.
    pub fn transition_stop(&self) -> Result<(), PpdbError> {
        let mut state = self.state.lock();
        if *state != ServiceState::Running {
            return Err(PpdbError::InvalidState(format!(
                "{}: stop() requires RUNNING",
                self.name
            )));
        }
        *state = ServiceState::Stopping;
        Ok(())
    }

    pub fn mark_stopped(&self) {
        *self.state.lock() = ServiceState::Stopped;
    }

    /// `cleanup()` allowed only from `STOPPED`/`INIT`.
    pub fn transition_cleanup(&self) -> Result<(), PpdbError> {
        let state = self.state.lock();
        match *state {
            ServiceState::Stopped | ServiceState::Init => Ok(()),
            _ => Err(PpdbError::Busy),
        }
    }

    /// Any failed `init`/`start` transitions to `ERROR` (unrecoverable)
    /// directly, bypassing `STOPPED`.
    pub fn mark_error(&self) {
        *self.state.lock() = ServiceState::Error;
    }
}

static REGISTRY: Lazy<DashMap<String, Arc<ServiceRecord>>> = Lazy::new(DashMap::new);

/// Registers a personality under `name`, returning its lifecycle record.
/// Re-registering an existing name returns the existing record rather
/// than erroring — personalities register themselves idempotently at
/// process start.
pub fn register(name: &str) -> Arc<ServiceRecord> {
    REGISTRY
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(ServiceRecord::new(name)))
        .clone()
}

pub fn get(name: &str) -> Option<Arc<ServiceRecord>> {
    REGISTRY.get(name).map(|entry| entry.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions_are_exclusive() {
        let record = ServiceRecord::new("test-lifecycle");
        assert_eq!(record.state(), ServiceState::Init);

        record.transition_init().unwrap();
        assert_eq!(record.state(), ServiceState::Ready);

        // start() from INIT (not READY/STOPPED) must fail.
        let other = ServiceRecord::new("test-lifecycle-2");
        assert!(other.transition_start().is_err());

        record.transition_start().unwrap();
        assert_eq!(record.state(), ServiceState::Running);

        record.transition_stop().unwrap();
        assert_eq!(record.state(), ServiceState::Stopping);
        record.mark_stopped();
        assert_eq!(record.state(), ServiceState::Stopped);

        record.transition_cleanup().unwrap();
    }

    #[test]
    fn cleanup_fails_while_running() {
        let record = ServiceRecord::new("test-lifecycle-running");
        record.transition_init().unwrap();
        record.transition_start().unwrap();
        assert_eq!(record.transition_cleanup(), Err(PpdbError::Busy));
    }

    #[test]
    fn register_is_idempotent() {
        let first = register("test-idempotent");
        let second = register("test-idempotent");
        assert!(Arc::ptr_eq(&first, &second));
    }
}
