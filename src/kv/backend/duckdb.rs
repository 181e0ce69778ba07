// src/kv/backend/duckdb.rs

//! The dynamically-loaded DuckDB backend, bound by name from the shared
//! library rather than linked at compile time, through a six-symbol
//! dlopen contract: `duckdb_open, duckdb_close, duckdb_connect,
//! duckdb_disconnect, duckdb_query, duckdb_destroy_result`.
//!
//! That contract predates DuckDB's typed per-column accessor functions,
//! so result rows are read back through the legacy `duckdb_result`
//! layout directly: `columns` is an array of per-column structs, each
//! holding a flat per-row data buffer (laid out per the column's type)
//! and a parallel nullmask, walked by hand against the fixed `kv_store`
//! schema rather than through a `duckdb_value_*` call — there is no
//! seventh symbol to bind. The contract also has no parameter-binding
//! entry point, so values are hex-encoded into the query text rather
//! than bound; fine-grained SQL semantics beyond this are out of scope.

use crate::core::PpdbError;
use crate::kv::backend::KvBackend;
use crate::kv::item::{now_epoch_secs, Item};
use async_trait::async_trait;
use libc::{c_char, c_void};
use libloading::{Library, Symbol};
use parking_lot::Mutex;
use std::ffi::CString;

type DuckdbDatabase = *mut c_void;
type DuckdbConnection = *mut c_void;
type DuckdbState = i32;
const DUCKDB_SUCCESS: DuckdbState = 0;

/// `duckdb_type` values for the two column types this backend's schema
/// reads back; only the numeric value matters since decoding never
/// calls a `duckdb_value_*` accessor.
const DUCKDB_TYPE_BIGINT: i32 = 5;
const DUCKDB_TYPE_BLOB: i32 = 18;

/// Layout of one entry in the legacy `duckdb_result.columns` array.
#[repr(C)]
struct DuckdbColumn {
    data: *mut c_void,
    nullmask: *mut bool,
    col_type: i32,
    name: *mut c_char,
}

/// Layout of one cell inside a BLOB column's data buffer.
#[repr(C)]
struct DuckdbBlobCell {
    data: *mut c_void,
    size: u64,
}

/// Reads row `row` of column `col` as a BIGINT, or `None` if the cell is null.
unsafe fn read_bigint(result: &DuckdbResult, col: usize, row: usize) -> Option<i64> {
    let columns = result.columns as *const DuckdbColumn;
    let column = &*columns.add(col);
    debug_assert_eq!(column.col_type, DUCKDB_TYPE_BIGINT);
    if !column.nullmask.is_null() && *column.nullmask.add(row) {
        return None;
    }
    Some(*(column.data as *const i64).add(row))
}

/// Reads row `row` of column `col` as a BLOB, or `None` if the cell is null.
unsafe fn read_blob(result: &DuckdbResult, col: usize, row: usize) -> Option<Vec<u8>> {
    let columns = result.columns as *const DuckdbColumn;
    let column = &*columns.add(col);
    debug_assert_eq!(column.col_type, DUCKDB_TYPE_BLOB);
    if !column.nullmask.is_null() && *column.nullmask.add(row) {
        return None;
    }
    let cell = &*(column.data as *const DuckdbBlobCell).add(row);
    if cell.data.is_null() || cell.size == 0 {
        return Some(Vec::new());
    }
    Some(std::slice::from_raw_parts(cell.data as *const u8, cell.size as usize).to_vec())
}

/// Layout of the deprecated (but still exported) `duckdb_result` struct,
/// stable since DuckDB's C API was introduced. Only the fields this
/// backend actually reads are given real names; the rest is padding.
#[repr(C)]
struct DuckdbResult {
    column_count: u64,
    row_count: u64,
    rows_changed: u64,
    columns: *mut c_void,
    error_message: *mut c_char,
    internal_data: *mut c_void,
}

type OpenFn = unsafe extern "C" fn(*const c_char, *mut DuckdbDatabase) -> DuckdbState;
type CloseFn = unsafe extern "C" fn(*mut DuckdbDatabase);
type ConnectFn = unsafe extern "C" fn(DuckdbDatabase, *mut DuckdbConnection) -> DuckdbState;
type DisconnectFn = unsafe extern "C" fn(*mut DuckdbConnection);
type QueryFn =
    unsafe extern "C" fn(DuckdbConnection, *const c_char, *mut DuckdbResult) -> DuckdbState;
type DestroyResultFn = unsafe extern "C" fn(*mut DuckdbResult);

/// The six bound entry points, held alongside the `Library` that owns
/// their code so the symbols never outlive it.
struct Symbols {
    open: OpenFn,
    close: CloseFn,
    connect: ConnectFn,
    disconnect: DisconnectFn,
    query: QueryFn,
    destroy_result: DestroyResultFn,
}

pub struct DuckdbBackend {
    _library: Library,
    symbols: Symbols,
    database: DuckdbDatabase,
    // A `duckdb_connection` is a raw handle, not a future; the lock is
    // held only around the synchronous FFI call itself, never across an
    // `.await` point.
    connection: Mutex<DuckdbConnection>,
}

// The raw pointers are only ever touched behind `connection`'s mutex or
// during single-threaded setup/teardown, so the backend itself is safe
// to share across tasks.
unsafe impl Send for DuckdbBackend {}
unsafe impl Sync for DuckdbBackend {}

impl DuckdbBackend {
    /// Loads `load_path` (falling back to the platform's bare-name
    /// search when unset) and opens `db_path`.
    pub async fn open(load_path: Option<&str>, db_path: &str) -> Result<Self, PpdbError> {
        let library_name = load_path.unwrap_or("libduckdb.so");
        if load_path.is_none() {
            tracing::info!(
                "kv.plugin_path unset; resolving '{library_name}' via the platform loader"
            );
        }

        let library = unsafe {
            Library::new(library_name)
                .map_err(|e| PpdbError::DependencyFailed(format!("{library_name}: {e}")))?
        };

        let symbols = unsafe {
            let open: Symbol<OpenFn> = library
                .get(b"duckdb_open\0")
                .map_err(|e| PpdbError::DependencyFailed(format!("duckdb_open: {e}")))?;
            let close: Symbol<CloseFn> = library
                .get(b"duckdb_close\0")
                .map_err(|e| PpdbError::DependencyFailed(format!("duckdb_close: {e}")))?;
            let connect: Symbol<ConnectFn> = library
                .get(b"duckdb_connect\0")
                .map_err(|e| PpdbError::DependencyFailed(format!("duckdb_connect: {e}")))?;
            let disconnect: Symbol<DisconnectFn> = library
                .get(b"duckdb_disconnect\0")
                .map_err(|e| PpdbError::DependencyFailed(format!("duckdb_disconnect: {e}")))?;
            let query: Symbol<QueryFn> = library
                .get(b"duckdb_query\0")
                .map_err(|e| PpdbError::DependencyFailed(format!("duckdb_query: {e}")))?;
            let destroy_result: Symbol<DestroyResultFn> = library
                .get(b"duckdb_destroy_result\0")
                .map_err(|e| PpdbError::DependencyFailed(format!("duckdb_destroy_result: {e}")))?;
            Symbols {
                open: *open,
                close: *close,
                connect: *connect,
                disconnect: *disconnect,
                query: *query,
                destroy_result: *destroy_result,
            }
        };

        let path_c = CString::new(db_path)
            .map_err(|_| PpdbError::InvalidParam("db_path contains a NUL byte".to_string()))?;
        let mut database: DuckdbDatabase = std::ptr::null_mut();
        if unsafe { (symbols.open)(path_c.as_ptr(), &mut database) } != DUCKDB_SUCCESS {
            return Err(PpdbError::DependencyFailed(format!(
                "duckdb_open failed for {db_path}"
            )));
        }

        let mut connection: DuckdbConnection = std::ptr::null_mut();
        if unsafe { (symbols.connect)(database, &mut connection) } != DUCKDB_SUCCESS {
            unsafe { (symbols.close)(&mut database) };
            return Err(PpdbError::DependencyFailed(
                "duckdb_connect failed".to_string(),
            ));
        }

        let backend = Self {
            _library: library,
            symbols,
            database,
            connection: Mutex::new(connection),
        };
        backend.exec("CREATE TABLE IF NOT EXISTS kv_store (key TEXT PRIMARY KEY, value BLOB, flags BIGINT, expiry BIGINT, cas BIGINT)").await?;
        backend
            .exec("CREATE INDEX IF NOT EXISTS idx_expiry ON kv_store(expiry)")
            .await?;
        Ok(backend)
    }

    async fn exec(&self, sql: &str) -> Result<u64, PpdbError> {
        let sql_c = CString::new(sql)
            .map_err(|_| PpdbError::InvalidParam("query contains a NUL byte".to_string()))?;
        let connection = self.connection.lock();
        let mut result = DuckdbResult {
            column_count: 0,
            row_count: 0,
            rows_changed: 0,
            columns: std::ptr::null_mut(),
            error_message: std::ptr::null_mut(),
            internal_data: std::ptr::null_mut(),
        };
        let state = unsafe { (self.symbols.query)(*connection, sql_c.as_ptr(), &mut result) };
        let rows_changed = result.rows_changed;
        unsafe { (self.symbols.destroy_result)(&mut result) };
        if state != DUCKDB_SUCCESS {
            return Err(PpdbError::Database(format!("query failed: {sql}")));
        }
        Ok(rows_changed)
    }

    /// Runs a read query and hands the raw result to `decode` before
    /// destroying it, so callers can walk `DuckdbResult.columns` without
    /// managing the result's lifetime themselves.
    async fn query<T>(
        &self,
        sql: &str,
        decode: impl FnOnce(&DuckdbResult) -> T,
    ) -> Result<T, PpdbError> {
        let sql_c = CString::new(sql)
            .map_err(|_| PpdbError::InvalidParam("query contains a NUL byte".to_string()))?;
        let connection = self.connection.lock();
        let mut result = DuckdbResult {
            column_count: 0,
            row_count: 0,
            rows_changed: 0,
            columns: std::ptr::null_mut(),
            error_message: std::ptr::null_mut(),
            internal_data: std::ptr::null_mut(),
        };
        let state = unsafe { (self.symbols.query)(*connection, sql_c.as_ptr(), &mut result) };
        if state != DUCKDB_SUCCESS {
            unsafe { (self.symbols.destroy_result)(&mut result) };
            return Err(PpdbError::Database(format!("query failed: {sql}")));
        }
        let decoded = decode(&result);
        unsafe { (self.symbols.destroy_result)(&mut result) };
        Ok(decoded)
    }
}

impl Drop for DuckdbBackend {
    fn drop(&mut self) {
        let mut connection = self.connection.lock();
        unsafe {
            (self.symbols.disconnect)(&mut *connection);
            (self.symbols.close)(&mut self.database);
        }
    }
}

fn escape_key(key: &str) -> String {
    key.replace('\'', "''")
}

#[async_trait]
impl KvBackend for DuckdbBackend {
    async fn get_row(&self, key: &str) -> Result<Option<Item>, PpdbError> {
        let now = now_epoch_secs();
        let sql = format!(
            "SELECT value, flags, expiry, cas FROM kv_store WHERE key = '{}' AND (expiry = 0 OR expiry > {now})",
            escape_key(key)
        );
        self.query(&sql, |result| {
            if result.row_count == 0 {
                return None;
            }
            unsafe {
                let value = read_blob(result, 0, 0).unwrap_or_default();
                let flags = read_bigint(result, 1, 0).unwrap_or(0) as u32;
                let expiry_at = read_bigint(result, 2, 0).unwrap_or(0);
                let cas = read_bigint(result, 3, 0).unwrap_or(0) as u64;
                Some(Item {
                    value,
                    flags,
                    expiry_at,
                    cas,
                })
            }
        })
        .await
    }

    async fn upsert_row(&self, key: &str, item: &Item) -> Result<(), PpdbError> {
        let sql = format!(
            "INSERT INTO kv_store (key, value, flags, expiry, cas) VALUES ('{}', x'{}', {}, {}, {})
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, flags = excluded.flags, expiry = excluded.expiry, cas = excluded.cas",
            escape_key(key),
            hex::encode(&item.value),
            item.flags,
            item.expiry_at,
            item.cas
        );
        self.exec(&sql).await?;
        Ok(())
    }

    async fn delete_row(&self, key: &str) -> Result<bool, PpdbError> {
        let sql = format!("DELETE FROM kv_store WHERE key = '{}'", escape_key(key));
        let rows_changed = self.exec(&sql).await?;
        Ok(rows_changed > 0)
    }

    async fn flush_all(&self) -> Result<(), PpdbError> {
        self.exec("DELETE FROM kv_store").await?;
        Ok(())
    }

    async fn count_rows(&self) -> Result<u64, PpdbError> {
        let now = now_epoch_secs();
        let sql = format!("SELECT COUNT(*) AS n FROM kv_store WHERE expiry = 0 OR expiry > {now}");
        self.query(&sql, |result| {
            if result.row_count == 0 {
                return 0;
            }
            unsafe { read_bigint(result, 0, 0).unwrap_or(0) as u64 }
        })
        .await
    }

    async fn close(&self) -> Result<(), PpdbError> {
        // No portable optimization hint is guaranteed across the DuckDB
        // builds reachable through this contract; disconnect/close in
        // `Drop` already handles teardown.
        Ok(())
    }
}
