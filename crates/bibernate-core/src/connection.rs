//! Database connection traits.
//!
//! Connections are synchronous: every call blocks the calling thread until the
//! database answers. Implementations use interior mutability so a connection
//! can be shared between a session, its transaction handle and the lazy
//! association suppliers the session hands out.

use crate::Result;
use crate::row::Row;
use crate::value::Value;
use std::sync::Arc;

/// Outcome of an INSERT that requested generated keys.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertResult {
    /// Number of rows the statement affected.
    pub rows_affected: u64,
    /// Keys generated by the database, in row order.
    pub generated_keys: Vec<Value>,
}

impl InsertResult {
    /// Create a result for a statement that affected `rows_affected` rows.
    pub fn new(rows_affected: u64, generated_keys: Vec<Value>) -> Self {
        Self {
            rows_affected,
            generated_keys,
        }
    }

    /// The first generated key, if the driver reported one.
    pub fn generated_key(&self) -> Option<&Value> {
        self.generated_keys.first()
    }
}

/// A database connection with JDBC-style transaction control.
///
/// With autocommit enabled (the initial state) every statement is its own
/// transaction. Disabling autocommit opens a transaction that stays open
/// until [`commit`](Connection::commit) or [`rollback`](Connection::rollback).
/// Re-enabling autocommit inside an open transaction commits it.
pub trait Connection: Send + Sync {
    /// Execute a query and return all rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement and return the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute an INSERT and return affected rows plus generated keys.
    fn insert(&self, sql: &str, params: &[Value]) -> Result<InsertResult>;

    /// Whether autocommit is currently enabled.
    fn auto_commit(&self) -> Result<bool>;

    /// Enable or disable autocommit.
    fn set_auto_commit(&self, enabled: bool) -> Result<()>;

    /// Commit the open transaction.
    fn commit(&self) -> Result<()>;

    /// Roll back the open transaction.
    fn rollback(&self) -> Result<()>;

    /// Release the underlying handle. Further calls fail.
    fn close(&self) -> Result<()>;

    /// Whether [`close`](Connection::close) has been called.
    fn is_closed(&self) -> bool;
}

/// Supplies connections to sessions, one per session.
pub trait ConnectionProvider: Send + Sync {
    /// Obtain a connection for a new session.
    fn connection(&self) -> Result<Arc<dyn Connection>>;
}

impl<F> ConnectionProvider for F
where
    F: Fn() -> Result<Arc<dyn Connection>> + Send + Sync,
{
    fn connection(&self) -> Result<Arc<dyn Connection>> {
        self()
    }
}
