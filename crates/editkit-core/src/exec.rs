//! Execution-side collaborator contracts
//!
//! The engine never talks to a database directly. It opens sessions and
//! drives the transaction through these traits, implemented by the storage
//! layer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::Result;

/// Why a session is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPurpose {
    User,
    UserScript,
    Meta,
    /// Metadata modification (DDL issued by a save)
    MetaDdl,
    Util,
}

/// A live connection capable of running persist actions
pub trait ExecutionContext: Send + Sync {
    fn context_name(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Open a session for the duration of one command
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` when the underlying connection is gone.
    fn open_session(&self, purpose: ExecutionPurpose, title: &str) -> Result<Box<dyn Session + '_>>;

    /// Transaction control, if the backend supports it
    fn transaction_manager(&self) -> Option<&dyn TransactionManager>;
}

/// A scoped execution session
pub trait Session {
    fn title(&self) -> &str;

    fn purpose(&self) -> ExecutionPurpose;

    /// Execute a literal script
    ///
    /// # Errors
    ///
    /// Returns `Persistence` when the backend rejects the script.
    fn execute_script(&mut self, script: &str) -> Result<()>;
}

/// Transaction control with JDBC-like auto-commit semantics
pub trait TransactionManager: Send + Sync {
    /// # Errors
    ///
    /// Returns `TransactionControl` when the mode cannot be queried.
    fn is_auto_commit(&self) -> Result<bool>;

    /// # Errors
    ///
    /// Returns `TransactionControl` when the mode cannot be switched.
    fn set_auto_commit(&self, auto_commit: bool) -> Result<()>;

    /// # Errors
    ///
    /// Returns `TransactionControl` when the commit fails.
    fn commit(&self) -> Result<()>;

    /// # Errors
    ///
    /// Returns `TransactionControl` when the rollback fails.
    fn rollback(&self) -> Result<()>;
}

/// Cooperative cancellation and progress reporting
pub trait ProgressMonitor: Send + Sync {
    fn is_canceled(&self) -> bool;

    fn sub_task(&self, _name: &str) {}
}

/// Monitor that never cancels
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgressMonitor;

impl ProgressMonitor for NullProgressMonitor {
    fn is_canceled(&self) -> bool {
        false
    }
}

/// Cloneable cancellation flag
///
/// # Example
/// ```
/// use editkit_core::exec::{CancelToken, ProgressMonitor};
///
/// let token = CancelToken::new();
/// let handle = token.clone();
/// handle.cancel();
/// assert!(token.is_canceled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl ProgressMonitor for CancelToken {
    fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_monitor_never_cancels() {
        assert!(!NullProgressMonitor.is_canceled());
    }

    #[test]
    fn test_cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_canceled());
        clone.cancel();
        assert!(token.is_canceled());
    }
}
