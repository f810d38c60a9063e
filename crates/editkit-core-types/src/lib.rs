//! Core types shared across editkit crates
//!
//! This crate provides foundational types used by the command engine, its
//! collaborators and the logging facility:
//!
//! - **Handles**: ObjectHandle, CommandId
//! - **Correlation types**: RequestId for tying one save run together
//! - **Schema constants**: Canonical field keys and event names

pub mod correlation;
pub mod handle;
pub mod schema;

pub use correlation::RequestId;
pub use handle::{CommandId, ObjectHandle};
