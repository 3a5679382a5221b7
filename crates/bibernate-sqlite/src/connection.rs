//! SQLite connection implementation.
//!
//! Wraps a raw `sqlite3` handle and implements the [`Connection`] trait from
//! bibernate-core. Autocommit follows JDBC rules: while it is off, the first
//! statement opens a transaction (`BEGIN`) that stays open until `commit`,
//! `rollback`, or autocommit is switched back on, which commits.

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::borrow_as_ptr)] // FFI requires raw pointers

use crate::ffi;
use crate::types;
use bibernate_core::error::{QueryError, QueryErrorKind};
use bibernate_core::row::ColumnInfo;
use bibernate_core::{Connection, ConnectionProvider, Error, InsertResult, Result, Row, Value};
use parking_lot::Mutex;
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::Arc;

const LOG_TARGET: &str = "bibernate::sqlite";

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for in-memory database.
    pub path: String,
    /// Open flags (read-only, read-write, create, etc.)
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
    /// Open in serialized mode.
    pub full_mutex: bool,
}

impl OpenFlags {
    /// Create flags for read-only access.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access (database must exist).
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access with creation if needed.
    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;

        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        if self.full_mutex {
            flags |= ffi::SQLITE_OPEN_FULLMUTEX;
        }

        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }

        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set open flags.
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

/// Connection state guarded by the connection mutex. A null `db` means the
/// connection has been closed.
struct SqliteInner {
    db: *mut ffi::sqlite3,
    auto_commit: bool,
    in_transaction: bool,
}

// SAFETY: the handle is only touched while holding the connection mutex.
unsafe impl Send for SqliteInner {}

impl SqliteInner {
    fn handle(&self, sql: Option<&str>) -> Result<*mut ffi::sqlite3> {
        if self.db.is_null() {
            Err(query_error(
                QueryErrorKind::Closed,
                sql,
                "connection is closed",
            ))
        } else {
            Ok(self.db)
        }
    }

    /// Open the implicit transaction when autocommit is off.
    fn begin_if_needed(&mut self) -> Result<()> {
        if !self.auto_commit && !self.in_transaction {
            exec(self.db, "BEGIN")?;
            self.in_transaction = true;
            tracing::debug!(target: LOG_TARGET, "BEGIN");
        }
        Ok(())
    }

    fn finish(&mut self, sql: &'static str) -> Result<()> {
        if self.in_transaction {
            // A failed COMMIT leaves the transaction open for a rollback.
            let result = exec(self.db, sql);
            if result.is_ok() {
                self.in_transaction = false;
            }
            tracing::debug!(target: LOG_TARGET, ok = result.is_ok(), "{}", sql);
            result?;
        }
        Ok(())
    }
}

/// A connection to a SQLite database.
pub struct SqliteConnection {
    inner: Mutex<SqliteInner>,
    path: String,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            query_error(
                QueryErrorKind::Database,
                None,
                "Invalid path: contains null byte",
            )
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: db is valid until closed here
                unsafe {
                    let (_, msg) = ffi::last_error(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            return Err(query_error(
                error_code_to_kind(rc, &msg),
                None,
                format!("Failed to open database {}: {}", config.path, msg),
            ));
        }

        if config.busy_timeout_ms > 0 {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(
                    db,
                    c_int::try_from(config.busy_timeout_ms).unwrap_or(c_int::MAX),
                );
            }
        }

        tracing::debug!(target: LOG_TARGET, path = %config.path, "Opened SQLite database");
        Ok(Self {
            inner: Mutex::new(SqliteInner {
                db,
                auto_commit: true,
                in_transaction: false,
            }),
            path: config.path.clone(),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Execute one or more statements without parameters (DDL, scripts).
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let db = inner.handle(Some(sql))?;
        inner.begin_if_needed()?;
        exec(db, sql)
    }

    /// Get the last insert rowid.
    pub fn last_insert_rowid(&self) -> Result<i64> {
        let inner = self.inner.lock();
        let db = inner.handle(None)?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(db) })
    }

    /// Get the number of rows changed by the last statement.
    pub fn changes(&self) -> Result<u64> {
        let inner = self.inner.lock();
        let db = inner.handle(None)?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_changes(db) } as u64)
    }

    /// Whether a transaction is currently open on the handle.
    pub fn in_transaction(&self) -> bool {
        self.inner.lock().in_transaction
    }

    fn execute_locked(inner: &mut SqliteInner, sql: &str, params: &[Value]) -> Result<u64> {
        let db = inner.handle(Some(sql))?;
        inner.begin_if_needed()?;
        tracing::trace!(target: LOG_TARGET, sql, "execute");
        let stmt = Statement::prepare(db, sql, params)?;
        loop {
            // SAFETY: stmt is valid
            match unsafe { ffi::sqlite3_step(stmt.raw) } {
                ffi::SQLITE_ROW => {}
                ffi::SQLITE_DONE => break,
                _ => return Err(db_error(db, sql)),
            }
        }
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_changes(db) } as u64)
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if !inner.db.is_null() {
            // SAFETY: db is valid and never used again
            unsafe {
                ffi::sqlite3_close(inner.db);
            }
            inner.db = ptr::null_mut();
        }
    }
}

impl Connection for SqliteConnection {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut inner = self.inner.lock();
        let db = inner.handle(Some(sql))?;
        inner.begin_if_needed()?;
        tracing::trace!(target: LOG_TARGET, sql, "query");
        let stmt = Statement::prepare(db, sql, params)?;

        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt.raw) };
        let names = (0..col_count)
            .map(|i| {
                // SAFETY: stmt is valid, i is in range
                unsafe { types::column_name(stmt.raw, i) }.unwrap_or_else(|| format!("col{}", i))
            })
            .collect();
        let columns = Arc::new(ColumnInfo::new(names));

        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid
            match unsafe { ffi::sqlite3_step(stmt.raw) } {
                ffi::SQLITE_ROW => {
                    let values = (0..col_count)
                        // SAFETY: stmt is valid, we just got SQLITE_ROW
                        .map(|i| unsafe { types::read_column(stmt.raw, i) })
                        .collect();
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                ffi::SQLITE_DONE => break,
                _ => return Err(db_error(db, sql)),
            }
        }
        Ok(rows)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut inner = self.inner.lock();
        Self::execute_locked(&mut inner, sql, params)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<InsertResult> {
        let mut inner = self.inner.lock();
        let rows = Self::execute_locked(&mut inner, sql, params)?;
        if rows == 0 {
            return Ok(InsertResult::new(0, Vec::new()));
        }
        // SAFETY: execute_locked checked the handle
        let rowid = unsafe { ffi::sqlite3_last_insert_rowid(inner.db) };
        Ok(InsertResult::new(rows, vec![Value::BigInt(rowid)]))
    }

    fn auto_commit(&self) -> Result<bool> {
        let inner = self.inner.lock();
        inner.handle(None)?;
        Ok(inner.auto_commit)
    }

    fn set_auto_commit(&self, enabled: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.handle(None)?;
        if enabled {
            inner.finish("COMMIT")?;
        }
        inner.auto_commit = enabled;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.handle(Some("COMMIT"))?;
        if inner.auto_commit {
            return Err(query_error(
                QueryErrorKind::Database,
                Some("COMMIT"),
                "cannot commit while autocommit is enabled",
            ));
        }
        inner.finish("COMMIT")
    }

    fn rollback(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.handle(Some("ROLLBACK"))?;
        if inner.auto_commit {
            return Err(query_error(
                QueryErrorKind::Database,
                Some("ROLLBACK"),
                "cannot roll back while autocommit is enabled",
            ));
        }
        inner.finish("ROLLBACK")
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.db.is_null() {
            return Ok(());
        }
        if inner.in_transaction {
            tracing::warn!(target: LOG_TARGET, path = %self.path, "Closing connection with an open transaction, it is rolled back");
        }
        // SAFETY: db is valid; statements are finalized by their guards, so
        // a successful close leaves nothing dangling
        let rc = unsafe { ffi::sqlite3_close(inner.db) };
        if rc != ffi::SQLITE_OK {
            return Err(query_error(
                QueryErrorKind::Database,
                None,
                format!("failed to close database: {}", ffi::error_string(rc)),
            ));
        }
        inner.db = ptr::null_mut();
        inner.in_transaction = false;
        tracing::debug!(target: LOG_TARGET, path = %self.path, "Closed SQLite database");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.lock().db.is_null()
    }
}

/// Opens a new [`SqliteConnection`] per request.
///
/// Every `:memory:` connection is a separate, empty database; use a file
/// path to share data between sessions.
#[derive(Debug, Clone)]
pub struct SqliteConnectionProvider {
    config: SqliteConfig,
}

impl SqliteConnectionProvider {
    pub fn new(config: SqliteConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }
}

impl ConnectionProvider for SqliteConnectionProvider {
    fn connection(&self) -> Result<Arc<dyn Connection>> {
        Ok(Arc::new(SqliteConnection::open(&self.config)?))
    }
}

/// Prepared statement, finalized on drop.
struct Statement {
    raw: *mut ffi::sqlite3_stmt,
}

impl Statement {
    fn prepare(db: *mut ffi::sqlite3, sql: &str, params: &[Value]) -> Result<Self> {
        let c_sql = CString::new(sql).map_err(|_| {
            query_error(QueryErrorKind::Syntax, Some(sql), "SQL contains null byte")
        })?;

        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();
        // SAFETY: All pointers are valid
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                db,
                c_sql.as_ptr(),
                c_sql.as_bytes().len() as c_int,
                &mut raw,
                ptr::null_mut(),
            )
        };
        if rc != ffi::SQLITE_OK {
            return Err(db_error(db, sql));
        }
        if raw.is_null() {
            return Err(query_error(
                QueryErrorKind::Syntax,
                Some(sql),
                "SQL contains no statement",
            ));
        }
        let stmt = Self { raw };

        for (i, param) in params.iter().enumerate() {
            // SAFETY: stmt is valid, index is 1-based
            let rc = unsafe { types::bind_value(stmt.raw, (i + 1) as c_int, param) };
            if rc != ffi::SQLITE_OK {
                // SAFETY: db is valid
                let (_, msg) = unsafe { ffi::last_error(db) };
                return Err(query_error(
                    QueryErrorKind::Database,
                    Some(sql),
                    format!("Failed to bind parameter {}: {}", i + 1, msg),
                ));
            }
        }
        Ok(stmt)
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        // SAFETY: raw is a valid statement finalized exactly once
        unsafe {
            ffi::sqlite3_finalize(self.raw);
        }
    }
}

/// Run `sql` through `sqlite3_exec`.
fn exec(db: *mut ffi::sqlite3, sql: &str) -> Result<()> {
    let c_sql = CString::new(sql)
        .map_err(|_| query_error(QueryErrorKind::Syntax, Some(sql), "SQL contains null byte"))?;
    let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

    // SAFETY: All pointers are valid
    let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg) };
    if rc == ffi::SQLITE_OK {
        return Ok(());
    }

    let msg = if errmsg.is_null() {
        ffi::error_string(rc).to_string()
    } else {
        // SAFETY: errmsg was allocated by SQLite and is freed once
        unsafe {
            let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
            ffi::sqlite3_free(errmsg.cast());
            msg
        }
    };
    Err(query_error(error_code_to_kind(rc, &msg), Some(sql), msg))
}

fn db_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (code, msg) = unsafe { ffi::last_error(db) };
    query_error(error_code_to_kind(code, &msg), Some(sql), msg)
}

fn query_error(kind: QueryErrorKind, sql: Option<&str>, message: impl Into<String>) -> Error {
    Error::Query(QueryError {
        kind,
        sql: sql.map(str::to_string),
        message: message.into(),
        source: None,
    })
}

fn error_code_to_kind(code: c_int, message: &str) -> QueryErrorKind {
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH | ffi::SQLITE_READONLY => QueryErrorKind::Permission,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_TOOBIG => QueryErrorKind::DataTruncation,
        ffi::SQLITE_INTERRUPT => QueryErrorKind::Cancelled,
        // SQLITE_ERROR covers both of these; only the message tells them apart
        ffi::SQLITE_ERROR if message.contains("syntax error") => QueryErrorKind::Syntax,
        ffi::SQLITE_ERROR if message.starts_with("no such") => QueryErrorKind::NotFound,
        _ => QueryErrorKind::Database,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibernate_core::ErrorKind;

    fn memory_with_table() -> SqliteConnection {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT UNIQUE)")
            .unwrap();
        conn
    }

    fn count(conn: &SqliteConnection) -> i64 {
        conn.query("SELECT COUNT(*) AS n FROM test", &[]).unwrap()[0]
            .get_named::<i64>("n")
            .unwrap()
    }

    fn query_kind(err: &Error) -> Option<QueryErrorKind> {
        match err {
            Error::Query(q) => Some(q.kind),
            _ => None,
        }
    }

    #[test]
    fn test_open_memory() {
        let conn = SqliteConnection::open_memory().unwrap();
        assert_eq!(conn.path(), ":memory:");
        assert!(conn.auto_commit().unwrap());
        assert!(!conn.is_closed());
    }

    #[test]
    fn test_execute_raw() {
        let conn = memory_with_table();
        conn.execute_raw("INSERT INTO test (name) VALUES ('Alice')")
            .unwrap();
        assert_eq!(conn.changes().unwrap(), 1);
        assert_eq!(conn.last_insert_rowid().unwrap(), 1);
    }

    #[test]
    fn test_parameterized_query() {
        let conn = memory_with_table();
        conn.execute(
            "INSERT INTO test (name) VALUES (?), (?)",
            &[Value::from("Alice"), Value::from("Bob")],
        )
        .unwrap();

        let rows = conn
            .query("SELECT id, name FROM test WHERE name = ?", &[Value::from("Bob")])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_named::<i64>("id").unwrap(), 2);
        assert_eq!(rows[0].get_named::<String>("name").unwrap(), "Bob");
    }

    #[test]
    fn test_null_handling() {
        let conn = memory_with_table();
        conn.execute("INSERT INTO test (name) VALUES (?)", &[Value::Null])
            .unwrap();
        let rows = conn.query("SELECT name FROM test", &[]).unwrap();
        assert_eq!(rows[0].get_named::<Option<String>>("name").unwrap(), None);
    }

    #[test]
    #[allow(clippy::approx_constant)]
    fn test_type_conversions() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE types (b BOOLEAN, i INTEGER, f REAL, t TEXT, bl BLOB, d TEXT)")
            .unwrap();
        conn.execute(
            "INSERT INTO types VALUES (?, ?, ?, ?, ?, ?)",
            &[
                Value::Bool(true),
                Value::BigInt(5_000_000_000),
                Value::Double(3.14),
                Value::Text("hello".to_string()),
                Value::Bytes(vec![1, 2, 3]),
                Value::Decimal("12.50".to_string()),
            ],
        )
        .unwrap();

        let row = &conn.query("SELECT * FROM types", &[]).unwrap()[0];
        assert_eq!(row.get_by_name("b"), Some(&Value::Int(1)));
        assert_eq!(row.get_by_name("i"), Some(&Value::BigInt(5_000_000_000)));
        assert!((row.get_named::<f64>("f").unwrap() - 3.14).abs() < 0.001);
        assert_eq!(row.get_named::<String>("t").unwrap(), "hello");
        assert_eq!(row.get_named::<Vec<u8>>("bl").unwrap(), vec![1, 2, 3]);
        assert_eq!(row.get_named::<String>("d").unwrap(), "12.50");
    }

    #[test]
    fn test_insert_reports_rowid() {
        let conn = memory_with_table();
        let first = conn
            .insert("INSERT INTO test (name) VALUES (?)", &[Value::from("Alice")])
            .unwrap();
        let second = conn
            .insert("INSERT INTO test (name) VALUES (?)", &[Value::from("Bob")])
            .unwrap();
        assert_eq!(first, InsertResult::new(1, vec![Value::BigInt(1)]));
        assert_eq!(second.generated_key(), Some(&Value::BigInt(2)));
    }

    #[test]
    fn test_rollback_discards_work() {
        let conn = memory_with_table();
        conn.set_auto_commit(false).unwrap();
        assert!(!conn.in_transaction());
        conn.execute("INSERT INTO test (name) VALUES (?)", &[Value::from("Alice")])
            .unwrap();
        assert!(conn.in_transaction());
        conn.rollback().unwrap();
        assert!(!conn.in_transaction());
        assert_eq!(count(&conn), 0);
        conn.set_auto_commit(true).unwrap();
    }

    #[test]
    fn test_commit_keeps_work() {
        let conn = memory_with_table();
        conn.set_auto_commit(false).unwrap();
        conn.execute("INSERT INTO test (name) VALUES (?)", &[Value::from("Bob")])
            .unwrap();
        conn.commit().unwrap();
        conn.set_auto_commit(true).unwrap();
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_enabling_autocommit_commits() {
        let conn = memory_with_table();
        conn.set_auto_commit(false).unwrap();
        conn.execute("INSERT INTO test (name) VALUES (?)", &[Value::from("Carol")])
            .unwrap();
        conn.set_auto_commit(true).unwrap();
        assert!(!conn.in_transaction());
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_commit_requires_manual_mode() {
        let conn = memory_with_table();
        assert!(conn.commit().is_err());
        assert!(conn.rollback().is_err());
    }

    #[test]
    fn test_error_kinds() {
        let conn = memory_with_table();
        conn.execute("INSERT INTO test (name) VALUES (?)", &[Value::from("Dup")])
            .unwrap();
        let err = conn
            .execute("INSERT INTO test (name) VALUES (?)", &[Value::from("Dup")])
            .unwrap_err();
        assert_eq!(query_kind(&err), Some(QueryErrorKind::Constraint));
        assert_eq!(err.sql(), Some("INSERT INTO test (name) VALUES (?)"));

        let err = conn.query("SELEC * FROM test", &[]).unwrap_err();
        assert_eq!(query_kind(&err), Some(QueryErrorKind::Syntax));

        let err = conn.query("SELECT * FROM missing", &[]).unwrap_err();
        assert_eq!(query_kind(&err), Some(QueryErrorKind::NotFound));
        assert_eq!(err.kind(), ErrorKind::Query);
    }

    #[test]
    fn test_close_is_idempotent() {
        let conn = memory_with_table();
        conn.close().unwrap();
        assert!(conn.is_closed());
        conn.close().unwrap();
        let err = conn.query("SELECT 1", &[]).unwrap_err();
        assert_eq!(query_kind(&err), Some(QueryErrorKind::Closed));
        assert!(conn.set_auto_commit(false).is_err());
    }

    #[test]
    fn test_file_provider_shares_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let provider = SqliteConnectionProvider::new(SqliteConfig::file(
            path.to_string_lossy().into_owned(),
        ));

        let first = provider.connection().unwrap();
        first.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[]).unwrap();
        first.execute("INSERT INTO t (id) VALUES (7)", &[]).unwrap();
        first.close().unwrap();

        let second = provider.connection().unwrap();
        let rows = second.query("SELECT id FROM t", &[]).unwrap();
        assert_eq!(rows[0].get_named::<i64>("id").unwrap(), 7);
    }

    #[test]
    fn test_open_read_only_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = SqliteConfig::file(dir.path().join("absent.db").to_string_lossy().into_owned())
            .flags(OpenFlags::read_only());
        let err = SqliteConnection::open(&config).unwrap_err();
        assert!(err.to_string().contains("Failed to open database"));
    }
}
