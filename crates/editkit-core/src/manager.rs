//! Object manager contract
//!
//! An object manager turns commands on one kind of object into persist
//! actions and keeps the object model in sync once they are saved.

use std::sync::Arc;

use editkit_core_types::ObjectHandle;

use crate::command::Command;
use crate::errors::{EditError, Result};
use crate::exec::Session;
use crate::options::SaveOptions;
use crate::persist::PersistAction;

/// Statement-rendering strategy for one object kind
pub trait ObjectManager: Send + Sync {
    /// Render the persist actions of a command
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` for command kinds the manager cannot persist.
    fn persist_actions(&self, command: &Command, options: &SaveOptions) -> Result<Vec<PersistAction>>;

    /// Run one persist action
    ///
    /// The default runs the literal script and rejects every hook.
    ///
    /// # Errors
    ///
    /// Returns `UnknownHook` for hooks and propagates session failures.
    fn execute_persist_action(
        &self,
        session: &mut dyn Session,
        _command: &Command,
        action: &PersistAction,
    ) -> Result<()> {
        if let Some(hook) = &action.hook {
            return Err(EditError::UnknownHook { hook: hook.clone() }.into());
        }
        match &action.script {
            Some(script) => session.execute_script(script),
            None => Ok(()),
        }
    }

    /// Manager-specific checks run before anything is executed
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` when the command cannot be saved.
    fn validate(&self, _command: &Command) -> Result<()> {
        Ok(())
    }

    /// Apply a persisted command to the object model
    ///
    /// # Errors
    ///
    /// Failures are logged by the caller and never undo the save.
    fn update_model(&self, _command: &Command) -> Result<()> {
        Ok(())
    }

    /// Drop commands from a merged queue before it is persisted
    fn filter_commands(&self, _queue: &mut QueueFilter<'_>) {}
}

/// Resolves the object manager for a target
pub trait ManagerResolver: Send + Sync {
    fn resolve(&self, target: &ObjectHandle) -> Option<Arc<dyn ObjectManager>>;
}

impl<F> ManagerResolver for F
where
    F: Fn(&ObjectHandle) -> Option<Arc<dyn ObjectManager>> + Send + Sync,
{
    fn resolve(&self, target: &ObjectHandle) -> Option<Arc<dyn ObjectManager>> {
        self(target)
    }
}

/// Mutable view of one merged queue handed to `filter_commands`
pub struct QueueFilter<'a> {
    target: &'a ObjectHandle,
    entries: Vec<(usize, &'a Command)>,
}

impl<'a> QueueFilter<'a> {
    pub(crate) fn new(target: &'a ObjectHandle, entries: Vec<(usize, &'a Command)>) -> Self {
        Self { target, entries }
    }

    pub fn target(&self) -> &ObjectHandle {
        self.target
    }

    /// Surviving commands in queue order
    pub fn commands(&self) -> impl Iterator<Item = &Command> + '_ {
        self.entries.iter().map(|(_, command)| *command)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only the commands matching the predicate
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Command) -> bool,
    {
        self.entries.retain(|(_, command)| keep(*command));
    }

    pub(crate) fn into_indices(self) -> Vec<usize> {
        self.entries.into_iter().map(|(index, _)| index).collect()
    }
}
