// src/kv/mod.rs

//! The KV storage facade and its pluggable backends (C5).

pub mod backend;
pub mod facade;
pub mod item;

pub use backend::KvBackend;
pub use facade::{CasOutcome, GetResult, KvFacade};
pub use item::Item;

use crate::config::{Engine, KvConfig};
use crate::core::PpdbError;
use std::sync::Arc;

/// Opens the backend named by `config.engine`, dispatching on the
/// already-parsed `Engine` enum rather than a raw `scheme://` string
/// since the scheme has already been validated by [`crate::config`].
pub async fn open_facade(config: &KvConfig) -> Result<KvFacade, PpdbError> {
    let backend: Arc<dyn KvBackend> = match config.engine {
        Engine::Sqlite => Arc::new(backend::sqlite::SqliteBackend::open(&config.db_path).await?),
        Engine::Duckdb => {
            match backend::duckdb::DuckdbBackend::open(config.plugin_path.as_deref(), &config.db_path)
                .await
            {
                Ok(duckdb) => Arc::new(duckdb),
                Err(e) if config.allow_fallback => {
                    tracing::warn!(
                        "duckdb backend unavailable ({e}); falling back to the embedded engine"
                    );
                    Arc::new(backend::sqlite::SqliteBackend::open(&config.db_path).await?)
                }
                Err(e) => return Err(e),
            }
        }
    };
    Ok(KvFacade::new(backend, config.max_value_size))
}
