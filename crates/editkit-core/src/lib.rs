//! editkit Core - command coordination kernel
//!
//! This crate accumulates edit commands against remote objects, merges them
//! per object, persists them transactionally and supports undo/redo of
//! unsaved edits:
//! - `Command` model with a closed `CommandKind` and explicit `MergeOutcome`
//! - `CommandContext` owning history, derived queues and the redo buffer
//! - Collaborator traits for object managers, execution contexts,
//!   reflectors and listeners
//! - Structured errors (`ExError`) and the logging facility

pub mod command;
pub mod context;
pub mod errors;
pub mod exec;
pub mod logging_facility;
pub mod manager;
pub mod merge;
pub mod options;
pub mod persist;
pub mod reflect;

// Re-export commonly used types
pub use command::{Command, CommandKind, PropertyDelta};
pub use context::CommandContext;
pub use errors::{EditError, ExError, ExErrorKind, Result};
pub use exec::{
    CancelToken, ExecutionContext, ExecutionPurpose, NullProgressMonitor, ProgressMonitor,
    Session, TransactionManager,
};
pub use manager::{ManagerResolver, ObjectManager, QueueFilter};
pub use merge::{MergeOutcome, UserParams};
pub use options::{ContextConfig, SaveOptions};
pub use persist::{ActionType, PersistAction, PersistInfo};
pub use reflect::{CommandListener, CommandReflector};

pub use editkit_core_types::{CommandId, ObjectHandle, RequestId};
