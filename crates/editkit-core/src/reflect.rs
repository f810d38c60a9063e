//! UI-side callbacks
//!
//! Reflectors mirror a single command into an in-memory model; listeners
//! observe the context as a whole. Both are always invoked outside the
//! context lock, so they may call back into the context.

use crate::command::Command;

/// Per-command redo/undo pair supplied by the UI layer
pub trait CommandReflector: Send + Sync {
    /// Apply the command to the in-memory model
    fn redo(&self, command: &Command);

    /// Revert the command in the in-memory model
    fn undo(&self, command: &Command);
}

/// Observer of context-wide changes
pub trait CommandListener: Send + Sync {
    fn on_command_change(&self, _command: &Command) {}

    fn on_save(&self) {}

    fn on_reset(&self) {}
}
