//! Transactional save of the merged queues

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use editkit_core_types::{CommandId, RequestId};
use tracing::{debug, warn};

use crate::command::Command;
use crate::errors::{EditError, ExError, Result};
use crate::exec::{ExecutionPurpose, ProgressMonitor, TransactionManager};
use crate::manager::ObjectManager;
use crate::options::SaveOptions;
use crate::persist::{ActionType, PersistInfo};
use crate::reflect::CommandReflector;
use crate::{log_op_end, log_op_error, log_op_start};

use super::queue::Derivation;
use super::CommandContext;

/// What a save run has persisted so far
#[derive(Default)]
struct SaveRun {
    /// Effective commands processed, with their managers, in order
    saved: Vec<(Command, Arc<dyn ObjectManager>)>,
    /// History commands whose merge chain ends at a processed command
    covered: Vec<(Command, Option<Arc<dyn CommandReflector>>)>,
}

impl CommandContext {
    /// Persist every pending command in one transaction
    ///
    /// Each call is tagged with a fresh `RequestId`, logged on its
    /// `save_changes` events and attached to the returned error.
    ///
    /// On success history is cleared. On failure the transaction is rolled
    /// back and history keeps every command that did not run its persist
    /// actions. Once execution has started, the redo buffer is cleared and
    /// listeners are notified either way.
    ///
    /// # Errors
    ///
    /// - `NotConnected` when the execution context is offline
    /// - `NoObjectManager` / `ValidationFailed` before the transaction is
    ///   touched; history, redo buffer and listeners are left alone
    /// - `PersistFailure` with command and action titles
    /// - `Canceled` when the monitor requests cancellation
    pub fn save_changes(&self, monitor: &dyn ProgressMonitor, options: &SaveOptions) -> Result<()> {
        let request_id = RequestId::new();
        log_op_start!(
            "save_changes",
            context = self.config.context_name.as_str(),
            request_id = %request_id
        );
        let start = Instant::now();

        if !self.execution_context.is_connected() {
            let err = EditError::NotConnected {
                context: self.execution_context.context_name().to_string(),
            };
            return Err(save_failed(err.into(), request_id, start, 0));
        }

        let derivation = match self.prepare_save() {
            Ok(derivation) => derivation,
            Err(err) => return Err(save_failed(err, request_id, start, 0)),
        };

        let txn = self.execution_context.transaction_manager();
        let restore_auto_commit = txn.map(switch_to_manual_commit).unwrap_or(false);

        let mut run = SaveRun::default();
        let result = self.persist_queues(derivation, monitor, options, &mut run);

        match &result {
            Ok(()) => {
                if let Some(txn) = txn {
                    if let Err(err) = txn.commit() {
                        warn!(err_code = err.code(), error = %err, "Transaction commit failed");
                    }
                }
                {
                    let mut state = self.state.lock();
                    state.history.clear();
                    state.user_params.clear();
                }
                self.reflect_saved(&run);
            }
            Err(_) => {
                if let Some(txn) = txn {
                    if let Err(err) = txn.rollback() {
                        warn!(err_code = err.code(), error = %err, "Transaction rollback failed");
                    }
                }
            }
        }

        if restore_auto_commit {
            if let Some(txn) = txn {
                if let Err(err) = txn.set_auto_commit(true) {
                    warn!(err_code = err.code(), error = %err, "Can't restore auto-commit mode");
                }
            }
        }
        {
            let mut state = self.state.lock();
            state.undone.clear();
            state.invalidate();
        }
        for listener in self.listeners_snapshot() {
            listener.on_save();
        }

        match result {
            Ok(()) => {
                log_op_end!(
                    "save_changes",
                    duration_ms = start.elapsed().as_millis() as u64,
                    request_id = %request_id,
                    saved = run.saved.len()
                );
                Ok(())
            }
            Err(err) => Err(save_failed(err, request_id, start, run.saved.len())),
        }
    }

    /// Snapshot the merged queues and check them before anything runs
    fn prepare_save(&self) -> Result<Derivation> {
        let derivation: Derivation = (*self.derive()).clone();

        for queue in &derivation.queues {
            if !queue.entries.is_empty() && queue.manager.is_none() {
                return Err(EditError::NoObjectManager {
                    target: queue.target.clone(),
                }
                .into());
            }
        }
        for index in derivation.final_entries() {
            let info = &derivation.entries[index];
            let manager = info.manager.as_ref().ok_or_else(|| EditError::NoObjectManager {
                target: info.command.target().clone(),
            })?;
            info.command.validate(manager.as_ref())?;
        }
        Ok(derivation)
    }

    fn persist_queues(
        &self,
        mut derivation: Derivation,
        monitor: &dyn ProgressMonitor,
        options: &SaveOptions,
        run: &mut SaveRun,
    ) -> Result<()> {
        let mut processed = HashSet::new();

        for queue in 0..derivation.queues.len() {
            if monitor.is_canceled() {
                return Err(EditError::Canceled.into());
            }
            monitor.sub_task(&format!("Save {}", derivation.queues[queue].target));

            let entries = derivation.queues[queue].entries.clone();
            for index in entries {
                let effective = derivation.resolve(index);
                if derivation.entries[effective].executed || !processed.insert(effective) {
                    continue;
                }
                let ran = self.execute_command(&mut derivation, effective, monitor, options)?;

                let info = &derivation.entries[effective];
                if let Some(manager) = &info.manager {
                    run.saved.push((info.command.clone(), manager.clone()));
                }
                self.cover(&derivation, effective, ran, run);
            }
        }
        Ok(())
    }

    /// Run the persist actions of one effective command
    ///
    /// Returns `false` without opening a session when the command has no
    /// actions; such a command is not marked executed.
    fn execute_command(
        &self,
        derivation: &mut Derivation,
        index: usize,
        monitor: &dyn ProgressMonitor,
        options: &SaveOptions,
    ) -> Result<bool> {
        let info = &mut derivation.entries[index];
        let manager = info
            .manager
            .clone()
            .ok_or_else(|| EditError::NoObjectManager {
                target: info.command.target().clone(),
            })?;
        let mut actions = match info.persist_actions.take() {
            Some(actions) => actions,
            None => info
                .command
                .persist_actions(manager.as_ref(), options)?
                .into_iter()
                .map(PersistInfo::new)
                .collect(),
        };
        if actions.is_empty() {
            info.persist_actions = Some(actions);
            return Ok(false);
        }

        let result = self.run_actions(&info.command, manager.as_ref(), &mut actions, monitor);
        info.persist_actions = Some(actions);
        result?;
        info.executed = true;
        Ok(true)
    }

    fn run_actions(
        &self,
        command: &Command,
        manager: &dyn ObjectManager,
        actions: &mut [PersistInfo],
        monitor: &dyn ProgressMonitor,
    ) -> Result<()> {
        let title = format!("Execute {}", command.title());
        let mut session = self
            .execution_context
            .open_session(ExecutionPurpose::MetaDdl, &title)?;

        let mut first_error: Option<ExError> = None;
        for persist in actions.iter_mut() {
            if first_error.is_none() && monitor.is_canceled() {
                first_error = Some(EditError::Canceled.into());
            }
            if first_error.is_some() && persist.action.action_type != ActionType::Finalizer {
                continue;
            }
            if persist.executed {
                continue;
            }

            debug!(
                command_title = command.title(),
                action_title = persist.action.title.as_str(),
                "Executing persist action"
            );
            match manager.execute_persist_action(session.as_mut(), command, &persist.action) {
                Ok(()) => persist.executed = true,
                Err(err) => {
                    warn!(
                        command_title = command.title(),
                        action_title = persist.action.title.as_str(),
                        action_type = ?persist.action.action_type,
                        err_code = err.code(),
                        error = %err,
                        "Persist action failed"
                    );
                    persist.error = Some(err.clone());
                    if persist.action.is_optional() {
                        continue;
                    }
                    if first_error.is_none() {
                        first_error = Some(
                            EditError::PersistFailure {
                                command: command.title().to_string(),
                                action: persist.action.title.clone(),
                                source: err,
                            }
                            .into(),
                        );
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Record the history entries whose merge chain ends at `effective`
    ///
    /// They leave history only when the command ran persist actions.
    fn cover(&self, derivation: &Derivation, effective: usize, ran: bool, run: &mut SaveRun) {
        let covered = derivation.history_resolving_to(effective);
        if ran {
            let ids: HashSet<CommandId> = covered
                .iter()
                .map(|&i| derivation.entries[i].command.id())
                .collect();
            if !ids.is_empty() {
                let mut state = self.state.lock();
                state.history.retain(|e| !ids.contains(&e.command.id()));
                state.invalidate();
            }
        }
        for i in covered {
            let info = &derivation.entries[i];
            run.covered
                .push((info.command.clone(), info.reflector.clone()));
        }
    }

    /// Post-commit model updates, outside the lock
    fn reflect_saved(&self, run: &SaveRun) {
        if self.config.atomic {
            for (command, reflector) in &run.covered {
                if let Some(reflector) = reflector {
                    reflector.redo(command);
                }
            }
        }
        for (command, manager) in &run.saved {
            if let Err(err) = manager.update_model(command) {
                warn!(
                    command_title = command.title(),
                    err_code = err.code(),
                    error = %err,
                    "Can't update object model"
                );
            }
        }
    }
}

/// Leave auto-commit mode for the duration of a save
///
/// Returns whether auto-commit has to be restored afterwards.
fn switch_to_manual_commit(txn: &dyn TransactionManager) -> bool {
    match txn.is_auto_commit() {
        Ok(true) => match txn.set_auto_commit(false) {
            Ok(()) => true,
            Err(err) => {
                warn!(err_code = err.code(), error = %err, "Can't switch to manual commit mode");
                false
            }
        },
        Ok(false) => false,
        Err(err) => {
            warn!(err_code = err.code(), error = %err, "Can't read auto-commit mode");
            false
        }
    }
}

/// Tag a save error with its run and log it
fn save_failed(err: ExError, request_id: RequestId, start: Instant, saved: usize) -> ExError {
    let err = err.with_request_id(request_id);
    log_op_error!(
        "save_changes",
        err.clone(),
        duration_ms = start.elapsed().as_millis() as u64,
        request_id = %request_id,
        saved = saved
    );
    err
}
