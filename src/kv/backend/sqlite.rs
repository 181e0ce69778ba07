// src/kv/backend/sqlite.rs

//! The embedded engine: SQLite through `sqlx`.

use crate::core::PpdbError;
use crate::kv::backend::KvBackend;
use crate::kv::item::Item;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Opens (creating if absent) the database at `path`, applies
    /// connection tuning (WAL, busy timeout, normal synchronous,
    /// in-memory temp store), and ensures the `kv_store` table and its
    /// expiry index exist.
    pub async fn open(path: &str) -> Result<Self, PpdbError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(|e| PpdbError::InvalidConfig(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .pragma("cache_size", "-8000")
            .pragma("temp_store", "MEMORY");

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                flags INTEGER NOT NULL,
                expiry INTEGER NOT NULL,
                cas INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_expiry ON kv_store(expiry)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl KvBackend for SqliteBackend {
    async fn get_row(&self, key: &str) -> Result<Option<Item>, PpdbError> {
        let now = crate::kv::item::now_epoch_secs();
        let row = sqlx::query(
            "SELECT value, flags, expiry, cas FROM kv_store
             WHERE key = ? AND (expiry = 0 OR expiry > ?)",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Item {
            value: r.get::<Vec<u8>, _>("value"),
            flags: r.get::<i64, _>("flags") as u32,
            expiry_at: r.get::<i64, _>("expiry"),
            cas: r.get::<i64, _>("cas") as u64,
        }))
    }

    async fn upsert_row(&self, key: &str, item: &Item) -> Result<(), PpdbError> {
        sqlx::query(
            "INSERT INTO kv_store (key, value, flags, expiry, cas) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                flags = excluded.flags,
                expiry = excluded.expiry,
                cas = excluded.cas",
        )
        .bind(key)
        .bind(&item.value)
        .bind(item.flags as i64)
        .bind(item.expiry_at)
        .bind(item.cas as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_row(&self, key: &str) -> Result<bool, PpdbError> {
        let result = sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn flush_all(&self) -> Result<(), PpdbError> {
        let mut tx = self.pool.begin().await?;
        match sqlx::query("DELETE FROM kv_store").execute(&mut *tx).await {
            Ok(_) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e.into())
            }
        }
    }

    async fn count_rows(&self) -> Result<u64, PpdbError> {
        let now = crate::kv::item::now_epoch_secs();
        let row = sqlx::query("SELECT COUNT(*) AS n FROM kv_store WHERE expiry = 0 OR expiry > ?")
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    async fn close(&self) -> Result<(), PpdbError> {
        sqlx::query("PRAGMA optimize").execute(&self.pool).await?;
        Ok(())
    }
}
