//! SQLite driver for Bibernate.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! Implements the synchronous [`Connection`](bibernate_core::Connection)
//! trait over libsqlite3 (bundled through `libsqlite3-sys`), plus a
//! [`ConnectionProvider`](bibernate_core::ConnectionProvider) that opens one
//! connection per session.
//!
//! # Example
//!
//! ```rust,ignore
//! use bibernate_core::{Connection, Value};
//! use bibernate_sqlite::SqliteConnection;
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//! let result = conn.insert("INSERT INTO users (name) VALUES (?)", &[Value::from("Alice")])?;
//! assert_eq!(result.generated_key(), Some(&Value::BigInt(1)));
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite Type |
//! |-------|-------------|
//! | `Bool` | INTEGER (0/1) |
//! | `SmallInt`, `Int`, `BigInt` | INTEGER |
//! | `Double` | REAL |
//! | `Decimal`, `Text` | TEXT |
//! | `Bytes` | BLOB |
//! | `Null` | NULL |

pub mod connection;
pub mod ffi;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection, SqliteConnectionProvider};

/// Re-export the SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

/// Re-export the SQLite library version number.
pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}
