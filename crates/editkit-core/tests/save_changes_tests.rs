//! Save Changes Tests
//!
//! Transactional persistence of merged queues: preconditions, action
//! classification, partial failure, retry and post-commit reflection.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{column, table, Harness, RecordingListener};
use editkit_core::{
    CancelToken, Command, CommandListener, ExErrorKind, NullProgressMonitor, ObjectHandle,
    PersistAction, SaveOptions,
};

fn save(h: &Harness) -> editkit_core::Result<()> {
    h.context
        .save_changes(&NullProgressMonitor, &SaveOptions::default())
}

#[test]
fn test_save_requires_connection() {
    // GIVEN a pending edit on a disconnected context
    let h = Harness::new();
    h.add(Command::rename(table(1), "a", "b"));
    h.db.disconnect();

    // WHEN saving
    let err = save(&h).unwrap_err();

    // THEN nothing happened
    assert_eq!(err.kind(), ExErrorKind::NotConnected);
    assert!(h.db.events().is_empty());
    assert_eq!(h.context.history().len(), 1);
    assert!(h.context.is_dirty());
}

#[test]
fn test_successful_save_persists_in_queue_order() {
    // GIVEN edits on two tables, the second table touched first
    let h = Harness::new();
    let listener = Arc::new(RecordingListener::default());
    h.context
        .add_command_listener(listener.clone() as Arc<dyn CommandListener>);
    h.add(Command::rename(table(2), "b", "bb"));
    h.add(Command::rename(table(1), "a", "aa"));
    h.add(Command::rename(table(2), "bb", "bbb"));

    // WHEN saving
    save(&h).unwrap();

    // THEN the merged commands ran in queue order inside one transaction
    assert_eq!(
        h.db.scripts(),
        vec![
            "RENAME table#2 b TO bbb".to_string(),
            "RENAME table#1 a TO aa".to_string()
        ]
    );
    let events = h.db.events();
    assert_eq!(events.first().map(String::as_str), Some("auto_commit:false"));
    assert!(events.contains(&"commit".to_string()));
    assert_eq!(events.last().map(String::as_str), Some("auto_commit:true"));
    assert!(h.db.auto_commit());

    // AND history is empty, models are updated, listeners notified
    assert!(h.context.history().is_empty());
    assert!(!h.context.is_dirty());
    assert_eq!(h.manager.updated().len(), 2);
    assert_eq!(listener.saves.load(Ordering::SeqCst), 1);
}

#[test]
fn test_one_meta_ddl_session_per_command() {
    let h = Harness::new();
    h.add(Command::delete(table(1)));

    save(&h).unwrap();

    assert!(h
        .db
        .events()
        .contains(&"session:MetaDdl:Execute Delete table".to_string()));
}

#[test]
fn test_validation_failure_aborts_before_execution() {
    // GIVEN two edits, one rejected by its manager
    let h = Harness::new();
    h.add(Command::rename(table(1), "a", "b"));
    h.add(Command::rename(table(2), "c", "d"));
    h.manager.reject(&table(2));

    // WHEN saving
    let err = save(&h).unwrap_err();

    // THEN the transaction was never touched and nothing was forgotten
    assert_eq!(err.kind(), ExErrorKind::ValidationFailed);
    assert!(err.message().starts_with("Cannot save:"));
    assert!(h.db.events().is_empty());
    assert!(h.db.auto_commit());
    assert_eq!(h.context.history().len(), 2);
}

#[test]
fn test_validation_failure_keeps_redo_buffer() {
    // GIVEN an undone edit waiting in the redo buffer and a rejected edit
    let h = Harness::new();
    let listener = Arc::new(RecordingListener::default());
    h.context
        .add_command_listener(listener.clone() as Arc<dyn CommandListener>);
    h.add(Command::rename(table(2), "c", "d"));
    h.add(Command::rename(table(1), "a", "b"));
    h.context.undo_command().unwrap();
    h.manager.reject(&table(2));

    // WHEN saving
    let err = save(&h).unwrap_err();

    // THEN the redo buffer survives and listeners heard nothing
    assert_eq!(err.kind(), ExErrorKind::ValidationFailed);
    assert!(h.db.events().is_empty());
    assert_eq!(
        h.context.get_redo_command().map(|c| c.target().clone()),
        Some(table(1))
    );
    assert_eq!(listener.saves.load(Ordering::SeqCst), 0);

    // AND the undone edit can still be restored
    h.context.redo_command().unwrap();
    assert_eq!(h.context.history().len(), 2);
}

#[test]
fn test_missing_manager_leaves_transaction_alone() {
    let h = Harness::new();
    h.add(Command::rename(table(1), "a", "b"));
    h.add(Command::delete(ObjectHandle::new("view", 3)));

    let err = save(&h).unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::NoObjectManager);
    assert!(h.db.events().is_empty());
    assert_eq!(h.context.history().len(), 2);
}

#[test]
fn test_builtin_validation_rejects_empty_names() {
    let h = Harness::new();
    h.add(Command::rename(table(1), "a", " "));

    let err = save(&h).unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::ValidationFailed);
    assert!(h.db.scripts().is_empty());
}

#[test]
fn test_missing_manager_is_reported() {
    let h = Harness::new();
    h.add(Command::delete(ObjectHandle::new("view", 3)));

    let err = save(&h).unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::NoObjectManager);
    assert_eq!(err.target(), Some(&ObjectHandle::new("view", 3)));
}

#[test]
fn test_partial_failure_runs_finalizers_and_keeps_failed_queue() {
    // GIVEN a succeeding queue followed by one whose plan fails midway
    let h = Harness::new();
    h.add(Command::rename(table(1), "a", "b"));
    h.add(Command::delete(table(2)));
    h.manager.override_actions(
        &table(2),
        vec![
            PersistAction::script("PRAGMA defer_foreign_keys = ON"),
            PersistAction::script("DROP TABLE t2"),
            PersistAction::script("DROP INDEX t2_idx"),
            PersistAction::script("ANALYZE").optional(),
            PersistAction::script("PRAGMA defer_foreign_keys = OFF").finalizer(),
        ],
    );
    h.db.fail_script("DROP TABLE t2");

    // WHEN saving
    let err = save(&h).unwrap_err();

    // THEN the failure names the command and the action
    assert_eq!(err.kind(), ExErrorKind::PersistFailure);
    assert_eq!(err.command_title(), Some("Delete table"));
    assert_eq!(err.action_title(), Some("DROP TABLE t2"));
    assert_eq!(err.root_cause().kind(), ExErrorKind::Persistence);

    // AND only the finalizer ran after the failure
    assert_eq!(
        h.db.scripts(),
        vec![
            "RENAME table#1 a TO b".to_string(),
            "PRAGMA defer_foreign_keys = ON".to_string(),
            "PRAGMA defer_foreign_keys = OFF".to_string(),
        ]
    );
    let events = h.db.events();
    assert!(events.contains(&"rollback".to_string()));
    assert!(!events.contains(&"commit".to_string()));
    assert!(h.db.auto_commit());

    // AND the succeeded sibling queue was removed from history
    let history = h.context.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].target(), &table(2));
    assert!(h.manager.updated().is_empty());
}

#[test]
fn test_command_without_actions_stays_in_history() {
    // GIVEN a command rendering no actions and a failing sibling queue
    let h = Harness::new();
    h.add(Command::rename(table(1), "a", "b"));
    h.add(Command::rename(table(2), "c", "d"));
    h.manager.override_actions(&table(1), Vec::new());
    h.db.fail_script("RENAME table#2 c TO d");

    // WHEN saving
    save(&h).unwrap_err();

    // THEN no session was opened for the empty command
    let sessions: Vec<String> = h
        .db
        .events()
        .into_iter()
        .filter(|e| e.starts_with("session:"))
        .collect();
    assert_eq!(sessions, vec!["session:MetaDdl:Execute Rename table".to_string()]);

    // AND it is still in history next to the failed command
    let targets: Vec<ObjectHandle> = h
        .context
        .history()
        .iter()
        .map(|c| c.target().clone())
        .collect();
    assert_eq!(targets, vec![table(1), table(2)]);
}

#[test]
fn test_command_without_actions_is_cleared_on_success() {
    let h = Harness::new();
    h.add(Command::rename(table(1), "a", "b"));
    h.manager.override_actions(&table(1), Vec::new());

    save(&h).unwrap();

    assert!(h.db.events().iter().all(|e| !e.starts_with("session:")));
    assert!(h.context.history().is_empty());
    assert_eq!(h.manager.updated().len(), 1);
}

#[test]
fn test_failed_save_error_carries_run_id() {
    // GIVEN a save that fails twice in a row
    let h = Harness::new();
    h.add(Command::rename(table(1), "a", "b"));
    h.db.fail_script("RENAME table#1 a TO b");

    // WHEN both errors are compared
    let first = save(&h).unwrap_err();
    let second = save(&h).unwrap_err();

    // THEN each names its own run
    let first_id = first.request_id().copied().unwrap();
    let second_id = second.request_id().copied().unwrap();
    assert_ne!(first_id, second_id);
    assert!(first.to_string().contains(&first_id.to_string()));
}

#[test]
fn test_retry_does_not_rerun_succeeded_queue() {
    // GIVEN a save that failed on the second queue
    let h = Harness::new();
    h.add(Command::rename(table(1), "a", "b"));
    h.add(Command::rename(table(2), "c", "d"));
    h.db.fail_script("RENAME table#2 c TO d");
    save(&h).unwrap_err();

    // WHEN the cause is fixed and the save retried
    h.db.heal();
    h.db.clear_log();
    save(&h).unwrap();

    // THEN only the failed queue ran again
    assert_eq!(h.db.scripts(), vec!["RENAME table#2 c TO d".to_string()]);
    assert!(h.context.history().is_empty());
}

#[test]
fn test_optional_failure_does_not_abort() {
    let h = Harness::new();
    h.add(Command::delete(table(1)));
    h.manager.override_actions(
        &table(1),
        vec![
            PersistAction::script("DROP TRIGGER t1_audit").optional(),
            PersistAction::script("DROP TABLE t1"),
        ],
    );
    h.db.fail_script("DROP TRIGGER t1_audit");

    save(&h).unwrap();

    assert_eq!(h.db.scripts(), vec!["DROP TABLE t1".to_string()]);
    assert!(h.db.events().contains(&"commit".to_string()));
    assert!(h.context.history().is_empty());
}

#[test]
fn test_unknown_hook_fails_the_command() {
    let h = Harness::new();
    h.add(Command::delete(table(1)));
    h.manager.override_actions(
        &table(1),
        vec![PersistAction::hook("Refresh dependents", "refresh_dependents")],
    );

    let err = save(&h).unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::PersistFailure);
    assert_eq!(err.root_cause().kind(), ExErrorKind::UnknownHook);
}

#[test]
fn test_cancellation_rolls_back() {
    let h = Harness::new();
    h.add(Command::rename(table(1), "a", "b"));
    let token = CancelToken::new();
    token.cancel();

    let err = h
        .context
        .save_changes(&token, &SaveOptions::default())
        .unwrap_err();

    assert_eq!(err.kind(), ExErrorKind::Canceled);
    assert!(h.db.scripts().is_empty());
    assert!(h.db.events().contains(&"rollback".to_string()));
    assert_eq!(h.context.history().len(), 1);
}

#[test]
fn test_commit_failure_is_logged_not_returned() {
    let h = Harness::new();
    h.add(Command::rename(table(1), "a", "b"));
    h.db.fail_commits();

    save(&h).unwrap();

    assert!(h.context.history().is_empty());
}

#[test]
fn test_save_clears_redo_buffer() {
    let h = Harness::new();
    h.add(Command::rename(table(1), "a", "b"));
    h.add(Command::rename(table(2), "c", "d"));
    h.context.undo_command().unwrap();
    assert!(h.context.get_redo_command().is_some());

    save(&h).unwrap();

    assert!(h.context.get_redo_command().is_none());
}

#[test]
fn test_atomic_save_reflects_after_commit() {
    // GIVEN an atomic context with two edits, merged into one
    let h = Harness::atomic();
    let first = h.add(Command::rename(table(1), "a", "b"));
    let second = h.add(Command::rename(table(1), "b", "c"));
    assert!(h.reflector.calls().is_empty());

    // WHEN saved
    save(&h).unwrap();

    // THEN every executed history command is reflected
    assert_eq!(h.reflector.redone(), vec![first, second]);
}

#[test]
fn test_non_atomic_save_does_not_reflect_again() {
    let h = Harness::new();
    h.add(Command::rename(table(1), "a", "b"));
    h.reflector.clear();

    save(&h).unwrap();

    assert!(h.reflector.calls().is_empty());
    assert_eq!(h.manager.updated().len(), 1);
}

#[test]
fn test_aggregated_scope_executes_once() {
    // GIVEN a table create batch aggregated into one command
    let h = Harness::new();
    h.context.add_command_batch(
        vec![
            Command::create(table(1), "orders", BTreeMap::new()),
            Command::create(column(1), "id", BTreeMap::new()),
            Command::aggregate(table(1), vec![table(1), column(1)]),
        ],
        None,
        false,
    );

    save(&h).unwrap();

    assert_eq!(h.db.scripts(), vec!["CREATE table#1 WITH 2".to_string()]);
    assert!(h.context.history().is_empty());
}

#[test]
fn test_cancelled_commands_issue_nothing() {
    let h = Harness::new();
    h.add(Command::create(table(1), "t", BTreeMap::new()));
    h.add(Command::delete(table(1)));

    save(&h).unwrap();

    assert!(h.db.scripts().is_empty());
    assert!(h.context.history().is_empty());
}
