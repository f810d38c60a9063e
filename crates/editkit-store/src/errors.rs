//! Error handling for editkit-store
//!
//! Wraps editkit-core ExError with store-specific helpers

use editkit_core::errors::{ExError, ExErrorKind};

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

/// Create a database error from rusqlite::Error
pub fn from_rusqlite(err: rusqlite::Error) -> ExError {
    ExError::new(ExErrorKind::Persistence)
        .with_op("sqlite")
        .with_message(err.to_string())
}

/// Create an error for a closed connection
pub fn not_connected(context: &str) -> ExError {
    ExError::new(ExErrorKind::NotConnected)
        .with_op("open_session")
        .with_message(format!("Context [{}] isn't connected to the database", context))
}

/// Create a transaction control error (BEGIN / COMMIT / ROLLBACK)
pub fn transaction_error(operation: &str, err: rusqlite::Error) -> ExError {
    ExError::new(ExErrorKind::TransactionControl)
        .with_op(operation.to_string())
        .with_message(err.to_string())
}
