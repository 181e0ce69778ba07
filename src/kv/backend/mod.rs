// src/kv/backend/mod.rs

//! One storage engine behind a single trait object: a vtable per
//! backend rather than a `db_open(url)`-style dispatch table.

pub mod duckdb;
pub mod sqlite;

use crate::core::PpdbError;
use crate::kv::item::Item;
use async_trait::async_trait;

/// Row-level storage operations. The memcached semantics (add/replace/
/// append/CAS bookkeeping/expiry interpretation) live one layer up in
/// [`crate::kv::facade`]; a backend only has to persist and retrieve
/// whole rows.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get_row(&self, key: &str) -> Result<Option<Item>, PpdbError>;
    async fn upsert_row(&self, key: &str, item: &Item) -> Result<(), PpdbError>;
    async fn delete_row(&self, key: &str) -> Result<bool, PpdbError>;
    async fn flush_all(&self) -> Result<(), PpdbError>;
    /// Number of live (non-lazily-deleted) rows, for the `curr_items` stat.
    async fn count_rows(&self) -> Result<u64, PpdbError>;
    /// Issues the backend's optimization hint before the service that
    /// owns it stops. A no-op for backends with nothing to hint.
    async fn close(&self) -> Result<(), PpdbError>;
}
