//! Command context
//!
//! Owns the command history and the redo buffer, derives merged queues on
//! demand and persists them through the execution context.
//!
//! All state sits behind one non-reentrant lock. Reflectors, listeners,
//! object managers and every I/O call run with the lock released.

mod queue;
mod save;

use std::sync::Arc;

use editkit_core_types::{CommandId, ObjectHandle};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use crate::command::Command;
use crate::errors::{EditError, ExError, Result};
use crate::exec::ExecutionContext;
use crate::manager::ManagerResolver;
use crate::merge::UserParams;
use crate::options::ContextConfig;
use crate::reflect::{CommandListener, CommandReflector};
use crate::{log_op_end, log_op_error, log_op_start};

use queue::Derivation;

#[derive(Clone)]
pub(crate) struct HistoryEntry {
    pub command: Command,
    pub reflector: Option<Arc<dyn CommandReflector>>,
    pub prev_in_batch: Option<CommandId>,
}

impl HistoryEntry {
    fn new(command: Command, reflector: Option<Arc<dyn CommandReflector>>) -> Self {
        Self {
            command,
            reflector,
            prev_in_batch: None,
        }
    }
}

#[derive(Default)]
struct ContextState {
    history: Vec<HistoryEntry>,
    undone: Vec<HistoryEntry>,
    derived: Option<Arc<Derivation>>,
    /// Bumped on every history mutation; a derivation built from an older
    /// generation is never cached
    generation: u64,
    user_params: UserParams,
}

impl ContextState {
    fn invalidate(&mut self) {
        self.derived = None;
        self.generation += 1;
    }

    /// Index of the first entry of the batch on top of history
    fn top_batch_start(&self) -> Option<usize> {
        let mut index = self.history.len().checked_sub(1)?;
        while index > 0 {
            match self.history[index].prev_in_batch {
                Some(prev) if self.history[index - 1].command.id() == prev => index -= 1,
                _ => break,
            }
        }
        Some(index)
    }

    fn undo_candidate(&self) -> Option<usize> {
        let start = self.top_batch_start()?;
        if self.history.iter().all(|e| e.command.is_undoable()) {
            Some(start)
        } else {
            None
        }
    }

    fn push_new(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
        self.undone.clear();
        self.invalidate();
    }
}

/// Accumulates, merges and persists edit commands
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use editkit_core::{
///     Command, CommandContext, ContextConfig, ExecutionContext, ExecutionPurpose,
///     ManagerResolver, ObjectHandle, ObjectManager, Result, Session, TransactionManager,
/// };
///
/// struct Offline;
///
/// impl ExecutionContext for Offline {
///     fn context_name(&self) -> &str { "offline" }
///     fn is_connected(&self) -> bool { false }
///     fn open_session(&self, _: ExecutionPurpose, _: &str) -> Result<Box<dyn Session + '_>> {
///         unreachable!()
///     }
///     fn transaction_manager(&self) -> Option<&dyn TransactionManager> { None }
/// }
///
/// let resolver: Arc<dyn ManagerResolver> =
///     Arc::new(|_: &ObjectHandle| -> Option<Arc<dyn ObjectManager>> { None });
/// let context = CommandContext::new(Arc::new(Offline), resolver, ContextConfig::default());
///
/// let table = ObjectHandle::new("table", 1);
/// context.add_command(Command::rename(table.clone(), "a", "b"), None, false);
/// context.add_command(Command::rename(table, "b", "c"), None, false);
///
/// assert_eq!(context.get_final_commands().len(), 1);
/// ```
pub struct CommandContext {
    execution_context: Arc<dyn ExecutionContext>,
    resolver: Arc<dyn ManagerResolver>,
    config: ContextConfig,
    state: Mutex<ContextState>,
    listeners: Mutex<Vec<Arc<dyn CommandListener>>>,
}

impl CommandContext {
    pub fn new(
        execution_context: Arc<dyn ExecutionContext>,
        resolver: Arc<dyn ManagerResolver>,
        config: ContextConfig,
    ) -> Self {
        Self {
            execution_context,
            resolver,
            config,
            state: Mutex::new(ContextState::default()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn is_atomic(&self) -> bool {
        self.config.atomic
    }

    pub fn execution_context(&self) -> &Arc<dyn ExecutionContext> {
        &self.execution_context
    }

    // ===== History mutation =====

    /// Append a command to history
    ///
    /// Clears the redo buffer. With `execute` set, a non-atomic context
    /// applies the command through its reflector right away.
    pub fn add_command(
        &self,
        command: Command,
        reflector: Option<Arc<dyn CommandReflector>>,
        execute: bool,
    ) {
        self.state
            .lock()
            .push_new(HistoryEntry::new(command.clone(), reflector.clone()));
        self.fire_command_change(&command);
        if execute && !self.config.atomic {
            if let Some(reflector) = &reflector {
                reflector.redo(&command);
            }
        }
    }

    /// Append several commands that undo and redo as one unit
    pub fn add_command_batch(
        &self,
        commands: Vec<Command>,
        reflector: Option<Arc<dyn CommandReflector>>,
        execute: bool,
    ) {
        let Some(first) = commands.first().cloned() else {
            return;
        };
        {
            let mut state = self.state.lock();
            let mut prev = None;
            for command in &commands {
                let mut entry = HistoryEntry::new(command.clone(), reflector.clone());
                entry.prev_in_batch = prev;
                prev = Some(command.id());
                state.history.push(entry);
            }
            state.undone.clear();
            state.invalidate();
        }
        self.fire_command_change(&first);
        if execute && !self.config.atomic {
            if let Some(reflector) = &reflector {
                for command in &commands {
                    reflector.redo(command);
                }
            }
        }
    }

    /// Add a command issued while `parent` was being applied
    ///
    /// Returns `false` when the parent ignores nested commands and the
    /// command was dropped. Otherwise the command joins the parent's batch
    /// if that batch is still on top of history.
    pub fn add_nested_command(
        &self,
        parent: CommandId,
        command: Command,
        reflector: Option<Arc<dyn CommandReflector>>,
        execute: bool,
    ) -> bool {
        {
            let mut state = self.state.lock();
            let ignores = state
                .history
                .iter()
                .find(|e| e.command.id() == parent)
                .map(|e| e.command.ignores_nested_commands());
            if ignores == Some(true) {
                return false;
            }
            let mut entry = HistoryEntry::new(command.clone(), reflector.clone());
            if ignores.is_some() {
                let parent_on_top = state
                    .top_batch_start()
                    .map(|start| state.history[start..].iter().any(|e| e.command.id() == parent))
                    .unwrap_or(false);
                if parent_on_top {
                    entry.prev_in_batch = state.history.last().map(|e| e.command.id());
                }
            }
            state.push_new(entry);
        }
        self.fire_command_change(&command);
        if execute && !self.config.atomic {
            if let Some(reflector) = &reflector {
                reflector.redo(&command);
            }
        }
        true
    }

    /// Drop a command from history; unknown ids are ignored
    pub fn remove_command(&self, id: CommandId) {
        let removed = {
            let mut state = self.state.lock();
            let Some(position) = state.history.iter().position(|e| e.command.id() == id) else {
                return;
            };
            let entry = state.history.remove(position);
            if let Some(next) = state.history.get_mut(position) {
                if next.prev_in_batch == Some(id) {
                    next.prev_in_batch = entry.prev_in_batch;
                }
            }
            state.invalidate();
            entry.command
        };
        self.fire_command_change(&removed);
    }

    /// Replace a tracked command by id, or add it when untracked
    pub fn update_command(&self, command: Command, reflector: Option<Arc<dyn CommandReflector>>) {
        let tracked = {
            let mut state = self.state.lock();
            let found = match state
                .history
                .iter_mut()
                .find(|e| e.command.id() == command.id())
            {
                Some(entry) => {
                    entry.command = command.clone();
                    if reflector.is_some() {
                        entry.reflector = reflector.clone();
                    }
                    true
                }
                None => false,
            };
            if found {
                state.invalidate();
            }
            found
        };
        if tracked {
            self.fire_command_change(&command);
        } else {
            self.add_command(command, reflector, false);
        }
    }

    // ===== Derived views =====

    /// True iff at least one merged queue still holds a command
    pub fn is_dirty(&self) -> bool {
        self.derive().is_dirty()
    }

    /// Effective commands after merging, de-duplicated, in queue order
    pub fn get_final_commands(&self) -> Vec<Command> {
        let derivation = self.derive();
        derivation
            .final_entries()
            .into_iter()
            .map(|i| derivation.entries[i].command.clone())
            .collect()
    }

    /// Targets of every non-empty merged queue
    pub fn get_edited_objects(&self) -> Vec<ObjectHandle> {
        self.derive().edited_objects()
    }

    /// Commands in history, oldest first
    pub fn history(&self) -> Vec<Command> {
        self.state
            .lock()
            .history
            .iter()
            .map(|e| e.command.clone())
            .collect()
    }

    /// Head of the batch `undo_command` would revert
    ///
    /// `None` when history is empty or holds any non-undoable command.
    pub fn get_undo_command(&self) -> Option<Command> {
        let state = self.state.lock();
        state
            .undo_candidate()
            .map(|start| state.history[start].command.clone())
    }

    /// Head of the batch `redo_command` would restore
    pub fn get_redo_command(&self) -> Option<Command> {
        self.state.lock().undone.last().map(|e| e.command.clone())
    }

    pub fn user_param(&self, key: &str) -> Option<Value> {
        self.state.lock().user_params.get(key).cloned()
    }

    /// Set a parameter visible to every merge until the next save or reset
    pub fn set_user_param(&self, key: impl Into<String>, value: Value) {
        let mut state = self.state.lock();
        state.user_params.insert(key.into(), value);
        state.invalidate();
    }

    // ===== Undo / redo / reset =====

    /// Revert the top batch of history into the redo buffer
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` when `get_undo_command` is `None`.
    pub fn undo_command(&self) -> Result<()> {
        log_op_start!("undo_command");
        let start = std::time::Instant::now();

        let batch = {
            let mut state = self.state.lock();
            match state.undo_candidate() {
                Some(batch_start) => {
                    let batch: Vec<HistoryEntry> =
                        state.history.drain(batch_start..).rev().collect();
                    state.undone.extend(batch.iter().cloned());
                    state.invalidate();
                    Some(batch)
                }
                None => None,
            }
        };
        let Some(batch) = batch else {
            let err: ExError = EditError::IllegalState {
                reason: "Can't undo command".to_string(),
            }
            .into();
            log_op_error!(
                "undo_command",
                err.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
            return Err(err.with_op("undo_command"));
        };

        if !self.config.atomic {
            for entry in &batch {
                if let Some(reflector) = &entry.reflector {
                    reflector.undo(&entry.command);
                }
            }
        }
        if let Some(head) = batch.last() {
            self.fire_command_change(&head.command);
        }

        log_op_end!(
            "undo_command",
            duration_ms = start.elapsed().as_millis() as u64,
            batch_len = batch.len()
        );
        Ok(())
    }

    /// Restore the most recently undone batch
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` when the redo buffer is empty.
    pub fn redo_command(&self) -> Result<()> {
        log_op_start!("redo_command");
        let start = std::time::Instant::now();

        let batch = {
            let mut state = self.state.lock();
            match state.undone.pop() {
                Some(head) => {
                    let mut batch = vec![head];
                    loop {
                        let last_id = batch.last().map(|e| e.command.id());
                        let continues = state
                            .undone
                            .last()
                            .map(|e| e.prev_in_batch.is_some() && e.prev_in_batch == last_id)
                            .unwrap_or(false);
                        if !continues {
                            break;
                        }
                        match state.undone.pop() {
                            Some(entry) => batch.push(entry),
                            None => break,
                        }
                    }
                    state.history.extend(batch.iter().cloned());
                    state.invalidate();
                    Some(batch)
                }
                None => None,
            }
        };
        let Some(batch) = batch else {
            let err: ExError = EditError::IllegalState {
                reason: "Can't redo command".to_string(),
            }
            .into();
            log_op_error!(
                "redo_command",
                err.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
            return Err(err.with_op("redo_command"));
        };

        for entry in &batch {
            if let Some(reflector) = &entry.reflector {
                reflector.redo(&entry.command);
            }
        }
        if let Some(head) = batch.first() {
            self.fire_command_change(&head.command);
        }

        log_op_end!(
            "redo_command",
            duration_ms = start.elapsed().as_millis() as u64,
            batch_len = batch.len()
        );
        Ok(())
    }

    /// Discard every unsaved command
    ///
    /// Undoable commands are reverted through their reflectors (non-atomic
    /// contexts only), newest first.
    pub fn reset_changes(&self) {
        log_op_start!("reset_changes");
        let start = std::time::Instant::now();

        let history = {
            let mut state = self.state.lock();
            let history = std::mem::take(&mut state.history);
            state.undone.clear();
            state.user_params.clear();
            state.invalidate();
            history
        };

        if !self.config.atomic {
            for entry in history.iter().rev() {
                if !entry.command.is_undoable() {
                    warn!(
                        command_title = entry.command.title(),
                        handle = %entry.command.target(),
                        "Command is not undoable; model left as is"
                    );
                    continue;
                }
                if let Some(reflector) = &entry.reflector {
                    reflector.undo(&entry.command);
                }
            }
        }
        for listener in self.listeners_snapshot() {
            listener.on_reset();
        }

        log_op_end!(
            "reset_changes",
            duration_ms = start.elapsed().as_millis() as u64,
            history_len = history.len()
        );
    }

    // ===== Listeners =====

    pub fn add_command_listener(&self, listener: Arc<dyn CommandListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn remove_command_listener(&self, listener: &Arc<dyn CommandListener>) {
        self.listeners.lock().retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn listeners_snapshot(&self) -> Vec<Arc<dyn CommandListener>> {
        self.listeners.lock().clone()
    }

    fn fire_command_change(&self, command: &Command) {
        for listener in self.listeners_snapshot() {
            listener.on_command_change(command);
        }
    }

    // ===== Derivation =====

    /// Cached derivation, rebuilt outside the lock when stale
    fn derive(&self) -> Arc<Derivation> {
        let (generation, history, mut params) = {
            let state = self.state.lock();
            if let Some(derived) = &state.derived {
                return derived.clone();
            }
            (
                state.generation,
                state.history.clone(),
                state.user_params.clone(),
            )
        };

        let derivation = Arc::new(Derivation::build(
            &history,
            self.resolver.as_ref(),
            &mut params,
        ));

        let mut state = self.state.lock();
        if state.generation == generation {
            state.user_params = params;
            state.derived = Some(derivation.clone());
        }
        derivation
    }
}
