//! Session transactions.
//!
//! A transaction drives the session connection's autocommit flag:
//! `begin` disables it, `commit` and `rollback` finish the unit of work and
//! enable it again. Status transitions:
//!
//! ```text
//! NotActive -> Active -> Committed | FailedCommit
//! Active | FailedCommit -> RolledBack | FailedRollback
//! ```

use bibernate_core::{Connection, Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    NotActive,
    Active,
    Committed,
    FailedCommit,
    RolledBack,
    FailedRollback,
}

impl TransactionStatus {
    /// Whether the transaction is finished and cannot be reused.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Committed | TransactionStatus::RolledBack
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::NotActive => "NOT_ACTIVE",
            TransactionStatus::Active => "ACTIVE",
            TransactionStatus::Committed => "COMMITTED",
            TransactionStatus::FailedCommit => "FAILED_COMMIT",
            TransactionStatus::RolledBack => "ROLLED_BACK",
            TransactionStatus::FailedRollback => "FAILED_ROLLBACK",
        };
        f.write_str(name)
    }
}

struct TransactionInner {
    status: Mutex<TransactionStatus>,
    connection: Arc<dyn Connection>,
    session_open: Arc<AtomicBool>,
}

/// Handle to a session's transaction. Clones share state.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("status", &self.status())
            .finish()
    }
}

impl Transaction {
    pub(crate) fn new(connection: Arc<dyn Connection>, session_open: Arc<AtomicBool>) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                status: Mutex::new(TransactionStatus::NotActive),
                connection,
                session_open,
            }),
        }
    }

    pub fn status(&self) -> TransactionStatus {
        *self.inner.status.lock()
    }

    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    /// Whether both handles refer to the same transaction.
    pub fn same_as(&self, other: &Transaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn ensure_session_open(&self) -> Result<()> {
        if self.inner.session_open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::illegal_state("Session is closed"))
        }
    }

    fn set_status(status: &mut TransactionStatus, next: TransactionStatus) {
        tracing::debug!(from = %status, to = %next, "Transaction status changed");
        *status = next;
    }

    /// Start the transaction by disabling autocommit.
    ///
    /// On failure autocommit is switched back on and the status is left
    /// unchanged.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn begin(&self) -> Result<()> {
        let mut status = self.inner.status.lock();
        self.ensure_session_open()?;
        if *status == TransactionStatus::Active {
            return Err(Error::illegal_state("Transaction is already active"));
        }
        if let Err(e) = self.inner.connection.set_auto_commit(false) {
            if let Err(reset) = self.inner.connection.set_auto_commit(true) {
                tracing::warn!(error = %reset, "Could not restore autocommit after failed begin");
            }
            return Err(Error::wrap("Could not begin transaction", e));
        }
        Self::set_status(&mut status, TransactionStatus::Active);
        Ok(())
    }

    /// Commit and re-enable autocommit.
    ///
    /// A failed commit moves to `FailedCommit` and leaves autocommit as it
    /// is; call [`rollback`](Transaction::rollback) to clean up.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit(&self) -> Result<()> {
        let mut status = self.inner.status.lock();
        self.ensure_session_open()?;
        if *status != TransactionStatus::Active {
            return Err(Error::illegal_state(format!(
                "Cannot commit transaction in status {}",
                status
            )));
        }
        let result = self
            .inner
            .connection
            .commit()
            .and_then(|()| self.inner.connection.set_auto_commit(true));
        match result {
            Ok(()) => {
                Self::set_status(&mut status, TransactionStatus::Committed);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Commit failed");
                Self::set_status(&mut status, TransactionStatus::FailedCommit);
                Err(Error::wrap("Could not commit transaction", e))
            }
        }
    }

    /// Roll back and re-enable autocommit, whether or not the rollback
    /// itself succeeds.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rollback(&self) -> Result<()> {
        let mut status = self.inner.status.lock();
        if !matches!(
            *status,
            TransactionStatus::Active | TransactionStatus::FailedCommit
        ) {
            return Err(Error::illegal_state(format!(
                "Cannot roll back transaction in status {}",
                status
            )));
        }
        let rolled_back = self.inner.connection.rollback();
        let restored = self.inner.connection.set_auto_commit(true);
        match rolled_back.and(restored) {
            Ok(()) => {
                Self::set_status(&mut status, TransactionStatus::RolledBack);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rollback failed");
                Self::set_status(&mut status, TransactionStatus::FailedRollback);
                Err(Error::wrap("Could not roll back transaction", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockConnection;
    use bibernate_core::ErrorKind;

    fn transaction(open: bool) -> (MockConnection, Transaction) {
        let conn = MockConnection::new();
        let tx = Transaction::new(Arc::new(conn.clone()), Arc::new(AtomicBool::new(open)));
        (conn, tx)
    }

    #[test]
    fn begin_commit_cycle() {
        let (conn, tx) = transaction(true);
        assert_eq!(tx.status(), TransactionStatus::NotActive);
        tx.begin().unwrap();
        assert!(tx.is_active());
        assert!(!conn.state.lock().auto_commit);
        tx.commit().unwrap();
        assert_eq!(tx.status(), TransactionStatus::Committed);

        let state = conn.state.lock();
        assert!(state.auto_commit);
        assert_eq!(state.commits, 1);
        assert_eq!(state.auto_commit_calls, vec![false, true]);
    }

    #[test]
    fn begin_on_closed_session_never_touches_connection() {
        let (conn, tx) = transaction(false);
        let err = tx.begin().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalState);
        assert!(conn.state.lock().auto_commit_calls.is_empty());
        assert_eq!(tx.status(), TransactionStatus::NotActive);
    }

    #[test]
    fn begin_twice_is_illegal() {
        let (_conn, tx) = transaction(true);
        tx.begin().unwrap();
        assert_eq!(tx.begin().unwrap_err().kind(), ErrorKind::IllegalState);
    }

    #[test]
    fn failed_begin_restores_autocommit() {
        let (conn, tx) = transaction(true);
        conn.state.lock().fail_disable_auto_commit = true;
        let err = tx.begin().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bibernate);
        assert_eq!(tx.status(), TransactionStatus::NotActive);
        let state = conn.state.lock();
        assert_eq!(state.auto_commit_calls, vec![false, true]);
        assert!(state.auto_commit);
    }

    #[test]
    fn failed_commit_keeps_autocommit_off() {
        let (conn, tx) = transaction(true);
        tx.begin().unwrap();
        conn.state.lock().fail_commit = true;
        let err = tx.commit().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bibernate);
        assert!(err.to_string().contains("Could not commit transaction"));
        assert_eq!(tx.status(), TransactionStatus::FailedCommit);
        assert!(!conn.state.lock().auto_commit);

        tx.rollback().unwrap();
        assert_eq!(tx.status(), TransactionStatus::RolledBack);
        assert!(conn.state.lock().auto_commit);
    }

    #[test]
    fn failed_rollback_still_restores_autocommit() {
        let (conn, tx) = transaction(true);
        tx.begin().unwrap();
        conn.state.lock().fail_rollback = true;
        assert!(tx.rollback().is_err());
        assert_eq!(tx.status(), TransactionStatus::FailedRollback);
        assert!(conn.state.lock().auto_commit);
    }

    #[test]
    fn rollback_requires_active_or_failed_commit() {
        let (_conn, tx) = transaction(true);
        assert_eq!(tx.rollback().unwrap_err().kind(), ErrorKind::IllegalState);
        tx.begin().unwrap();
        tx.commit().unwrap();
        assert_eq!(tx.rollback().unwrap_err().kind(), ErrorKind::IllegalState);
    }

    #[test]
    fn commit_requires_active() {
        let (_conn, tx) = transaction(true);
        assert_eq!(tx.commit().unwrap_err().kind(), ErrorKind::IllegalState);
    }

    #[test]
    fn clones_share_status() {
        let (_conn, tx) = transaction(true);
        let other = tx.clone();
        tx.begin().unwrap();
        assert!(other.is_active());
        assert!(other.same_as(&tx));
    }
}
