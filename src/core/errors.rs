// src/core/errors.rs

//! Defines the primary error type for the entire application.
//!
//! `PpdbError` is a closed taxonomy translated to memcached wire responses
//! at exactly one boundary: `memcached::service`. No other module is
//! permitted to format a wire response from an error directly.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, covering every failure category named by the
/// service's error taxonomy.
#[derive(Error, Debug)]
pub enum PpdbError {
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("allocation refused: {0}")]
    NoMemory(String),

    #[error("operation timed out")]
    Timeout,

    #[error("operation would block")]
    WouldBlock,

    #[error("connection closed")]
    Closed,

    #[error("key not found")]
    NotFound,

    #[error("key already exists")]
    Exists,

    #[error("worker pool busy")]
    Busy,

    #[error("dependency failed: {0}")]
    DependencyFailed(String),

    #[error("service not ready")]
    NotReady,

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("invalid state for requested transition: {0}")]
    InvalidState(String),

    #[error("cas mismatch")]
    CasMismatch,

    #[error("value would overflow")]
    Overflow,

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("value too large for backend")]
    TooLarge,

    #[error("database error: {0}")]
    Database(String),
}

// Manual Clone because `std::io::Error` is not cloneable; wrap it in an
// Arc for cheap shared cloning instead.
impl Clone for PpdbError {
    fn clone(&self) -> Self {
        match self {
            PpdbError::Io(e) => PpdbError::Io(Arc::clone(e)),
            PpdbError::InvalidParam(s) => PpdbError::InvalidParam(s.clone()),
            PpdbError::NoMemory(s) => PpdbError::NoMemory(s.clone()),
            PpdbError::Timeout => PpdbError::Timeout,
            PpdbError::WouldBlock => PpdbError::WouldBlock,
            PpdbError::Closed => PpdbError::Closed,
            PpdbError::NotFound => PpdbError::NotFound,
            PpdbError::Exists => PpdbError::Exists,
            PpdbError::Busy => PpdbError::Busy,
            PpdbError::DependencyFailed(s) => PpdbError::DependencyFailed(s.clone()),
            PpdbError::NotReady => PpdbError::NotReady,
            PpdbError::NotSupported(s) => PpdbError::NotSupported(s.clone()),
            PpdbError::InvalidState(s) => PpdbError::InvalidState(s.clone()),
            PpdbError::CasMismatch => PpdbError::CasMismatch,
            PpdbError::Overflow => PpdbError::Overflow,
            PpdbError::InvalidData(s) => PpdbError::InvalidData(s.clone()),
            PpdbError::InvalidConfig(s) => PpdbError::InvalidConfig(s.clone()),
            PpdbError::TooLarge => PpdbError::TooLarge,
            PpdbError::Database(s) => PpdbError::Database(s.clone()),
        }
    }
}

impl PartialEq for PpdbError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PpdbError::Io(a), PpdbError::Io(b)) => a.to_string() == b.to_string(),
            (PpdbError::InvalidParam(a), PpdbError::InvalidParam(b)) => a == b,
            (PpdbError::NoMemory(a), PpdbError::NoMemory(b)) => a == b,
            (PpdbError::DependencyFailed(a), PpdbError::DependencyFailed(b)) => a == b,
            (PpdbError::NotSupported(a), PpdbError::NotSupported(b)) => a == b,
            (PpdbError::InvalidState(a), PpdbError::InvalidState(b)) => a == b,
            (PpdbError::InvalidData(a), PpdbError::InvalidData(b)) => a == b,
            (PpdbError::InvalidConfig(a), PpdbError::InvalidConfig(b)) => a == b,
            (PpdbError::Database(a), PpdbError::Database(b)) => a == b,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl From<std::io::Error> for PpdbError {
    fn from(e: std::io::Error) -> Self {
        PpdbError::Io(Arc::new(e))
    }
}

impl From<sqlx::Error> for PpdbError {
    fn from(e: sqlx::Error) -> Self {
        PpdbError::Database(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for PpdbError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        PpdbError::Database(e.to_string())
    }
}

impl From<libloading::Error> for PpdbError {
    fn from(e: libloading::Error) -> Self {
        PpdbError::DependencyFailed(e.to_string())
    }
}

impl From<std::num::ParseIntError> for PpdbError {
    fn from(_: std::num::ParseIntError) -> Self {
        PpdbError::InvalidData("not an integer".to_string())
    }
}
