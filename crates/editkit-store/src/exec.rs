//! SQLite execution context
//!
//! Emulates JDBC auto-commit on top of SQLite's implicit transactions:
//! - manual mode keeps an explicit transaction open (`BEGIN`)
//! - `commit` / `rollback` end it and immediately open the next one
//! - switching back to auto-commit commits whatever is still open

use std::path::Path;

use editkit_core::{ExecutionContext, ExecutionPurpose, Session, TransactionManager};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use tracing::debug;

use crate::db;
use crate::errors::{from_rusqlite, not_connected, transaction_error, Result};

struct Inner {
    conn: Option<Connection>,
    auto_commit: bool,
}

impl Inner {
    fn conn(&self, context: &str) -> Result<&Connection> {
        self.conn.as_ref().ok_or_else(|| not_connected(context))
    }
}

/// Execution context and transaction manager over one SQLite connection
pub struct SqliteExecutionContext {
    name: String,
    inner: Mutex<Inner>,
}

impl SqliteExecutionContext {
    /// Wrap an open connection; the context starts in auto-commit mode
    pub fn new(name: impl Into<String>, conn: Connection) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                conn: Some(conn),
                auto_commit: true,
            }),
        }
    }

    /// Open and configure a database file
    ///
    /// # Errors
    ///
    /// Returns `Persistence` when the file cannot be opened or configured.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = db::open(path.as_ref())?;
        db::configure(&conn)?;
        Ok(Self::new(path.as_ref().display().to_string(), conn))
    }

    /// # Errors
    ///
    /// Returns `Persistence` when SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = db::open_in_memory()?;
        db::configure(&conn)?;
        Ok(Self::new("memory", conn))
    }

    /// Close the connection; the context reports disconnected afterwards
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        if let Some(conn) = inner.conn.take() {
            if let Err((_, err)) = conn.close() {
                tracing::warn!(error = %err, context = self.name.as_str(), "Error closing connection");
            }
        }
    }

    /// Run `f` against the live connection
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` after `disconnect`, or whatever `f` returns.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let inner = self.inner.lock();
        f(inner.conn(&self.name)?)
    }

    fn control(&self, operation: &str, sql: &str, conn: &Connection) -> Result<()> {
        debug!(context = self.name.as_str(), sql, "Transaction control");
        conn.execute_batch(sql)
            .map_err(|e| transaction_error(operation, e))
    }
}

struct SqliteSession<'a> {
    guard: MutexGuard<'a, Inner>,
    context: &'a str,
    title: String,
    purpose: ExecutionPurpose,
}

impl Session for SqliteSession<'_> {
    fn title(&self) -> &str {
        &self.title
    }

    fn purpose(&self) -> ExecutionPurpose {
        self.purpose
    }

    fn execute_script(&mut self, script: &str) -> Result<()> {
        debug!(session = self.title.as_str(), script, "Executing script");
        self.guard
            .conn(self.context)?
            .execute_batch(script)
            .map_err(from_rusqlite)
    }
}

impl ExecutionContext for SqliteExecutionContext {
    fn context_name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().conn.is_some()
    }

    fn open_session(&self, purpose: ExecutionPurpose, title: &str) -> Result<Box<dyn Session + '_>> {
        let guard = self.inner.lock();
        guard.conn(&self.name)?;
        Ok(Box::new(SqliteSession {
            guard,
            context: &self.name,
            title: title.to_string(),
            purpose,
        }))
    }

    fn transaction_manager(&self) -> Option<&dyn TransactionManager> {
        Some(self)
    }
}

impl TransactionManager for SqliteExecutionContext {
    fn is_auto_commit(&self) -> Result<bool> {
        let inner = self.inner.lock();
        inner.conn(&self.name)?;
        Ok(inner.auto_commit)
    }

    fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.auto_commit == auto_commit {
            return Ok(());
        }
        {
            let conn = inner.conn(&self.name)?;
            if auto_commit {
                if !conn.is_autocommit() {
                    self.control("set_auto_commit", "COMMIT", conn)?;
                }
            } else {
                self.control("set_auto_commit", "BEGIN", conn)?;
            }
        }
        inner.auto_commit = auto_commit;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let inner = self.inner.lock();
        let conn = inner.conn(&self.name)?;
        if inner.auto_commit {
            return Ok(());
        }
        if !conn.is_autocommit() {
            self.control("commit", "COMMIT", conn)?;
        }
        self.control("commit", "BEGIN", conn)
    }

    fn rollback(&self) -> Result<()> {
        let inner = self.inner.lock();
        let conn = inner.conn(&self.name)?;
        if inner.auto_commit {
            return Ok(());
        }
        if !conn.is_autocommit() {
            self.control("rollback", "ROLLBACK", conn)?;
        }
        self.control("rollback", "BEGIN", conn)
    }
}
