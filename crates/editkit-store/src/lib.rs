//! editkit Store - SQLite execution backend
//!
//! Provides:
//! - Connection helpers (`db::open`, `db::open_in_memory`, `db::configure`)
//! - `SqliteExecutionContext`, an execution context and transaction manager
//!   with JDBC-like auto-commit emulation
//! - Store-specific `ExError` constructors

pub mod db;
pub mod errors;
pub mod exec;

// Re-export key types
pub use errors::Result;
pub use exec::SqliteExecutionContext;
