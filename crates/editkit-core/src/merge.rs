//! Per-kind merge rules
//!
//! A new command is merged against the surviving commands of its queue,
//! newest first. The outcome tells the derivation pass what to do with both
//! the new command and the candidate predecessor.

use std::collections::{BTreeMap, HashMap};

use editkit_core_types::ObjectHandle;
use serde_json::Value;

use crate::command::{Command, CommandKind, PropertyDelta};

/// Parameters shared by every merge of a context
///
/// Values set through `CommandContext::set_user_param` persist until the
/// next save or reset. Keys under `created:` belong to the merge pass.
pub type UserParams = HashMap<String, Value>;

/// Result of merging a command with a predecessor
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Both commands stay as they are
    Unchanged,
    /// The new command is absorbed; the returned command takes the place of
    /// the entry with the same id
    Replaced(Command),
    /// The predecessor is removed and the new command is dropped
    Cancelled,
}

const CREATED_PREFIX: &str = "created:";

fn created_key(target: &ObjectHandle) -> String {
    format!("{}{}", CREATED_PREFIX, target)
}

/// Drop the markers a previous pass left, keeping caller-set params
pub(crate) fn clear_pass_markers(params: &mut UserParams) {
    params.retain(|key, _| !key.starts_with(CREATED_PREFIX));
}

/// Whether a `Create` for this target was merged earlier in the current pass
pub fn is_created_in_pass(params: &UserParams, target: &ObjectHandle) -> bool {
    params
        .get(&created_key(target))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

impl Command {
    /// Merge this command with `prev`, the most recent surviving command on
    /// the same target, or `None` when the queue has no survivors yet
    pub fn merge(&self, prev: Option<&Command>, params: &mut UserParams) -> MergeOutcome {
        match self.kind() {
            CommandKind::Create { .. } => {
                if prev.is_none() {
                    params.insert(created_key(self.target()), Value::Bool(true));
                }
                MergeOutcome::Unchanged
            }
            CommandKind::Delete => self.merge_delete(prev, params),
            CommandKind::Rename { new_name, .. } => match prev {
                Some(prev) => merge_rename(prev, new_name),
                None => MergeOutcome::Unchanged,
            },
            CommandKind::PropertyChange { changes } => match prev {
                Some(prev) => merge_properties(prev, changes),
                None => MergeOutcome::Unchanged,
            },
            CommandKind::Reorder { new_position, .. } => match prev {
                Some(prev) => merge_reorder(prev, *new_position),
                None => MergeOutcome::Unchanged,
            },
            CommandKind::Script { .. } | CommandKind::Aggregate { .. } => MergeOutcome::Unchanged,
        }
    }

    fn merge_delete(&self, prev: Option<&Command>, params: &UserParams) -> MergeOutcome {
        let Some(prev) = prev else {
            return MergeOutcome::Unchanged;
        };
        // Object never reached the database: drop it and everything done to it
        if is_created_in_pass(params, self.target()) {
            return MergeOutcome::Cancelled;
        }
        match prev.kind() {
            CommandKind::Delete => MergeOutcome::Replaced(prev.clone()),
            _ => MergeOutcome::Unchanged,
        }
    }
}

fn merge_rename(prev: &Command, new_name: &str) -> MergeOutcome {
    match prev.kind() {
        CommandKind::Rename { old_name, .. } => {
            if old_name == new_name {
                return MergeOutcome::Cancelled;
            }
            let mut merged = prev.clone();
            if let CommandKind::Rename { new_name: name, .. } = merged.kind_mut() {
                *name = new_name.to_string();
            }
            MergeOutcome::Replaced(merged)
        }
        CommandKind::Create { .. } => {
            let mut merged = prev.clone();
            if let CommandKind::Create { name, .. } = merged.kind_mut() {
                *name = new_name.to_string();
            }
            merged.set_object_name(new_name);
            MergeOutcome::Replaced(merged)
        }
        _ => MergeOutcome::Unchanged,
    }
}

fn merge_properties(prev: &Command, changes: &BTreeMap<String, PropertyDelta>) -> MergeOutcome {
    match prev.kind() {
        CommandKind::PropertyChange { .. } => {
            let mut merged = prev.clone();
            let mut empty = false;
            if let CommandKind::PropertyChange { changes: existing } = merged.kind_mut() {
                for (property, delta) in changes {
                    match existing.get_mut(property) {
                        Some(current) => current.new = delta.new.clone(),
                        None => {
                            existing.insert(property.clone(), delta.clone());
                        }
                    }
                }
                existing.retain(|_, delta| !delta.is_noop());
                empty = existing.is_empty();
            }
            if empty {
                MergeOutcome::Cancelled
            } else {
                MergeOutcome::Replaced(merged)
            }
        }
        CommandKind::Create { .. } => {
            let mut merged = prev.clone();
            if let CommandKind::Create { properties, .. } = merged.kind_mut() {
                for (property, delta) in changes {
                    properties.insert(property.clone(), delta.new.clone());
                }
            }
            MergeOutcome::Replaced(merged)
        }
        _ => MergeOutcome::Unchanged,
    }
}

fn merge_reorder(prev: &Command, new_position: usize) -> MergeOutcome {
    match prev.kind() {
        CommandKind::Reorder { old_position, .. } => {
            if *old_position == new_position {
                return MergeOutcome::Cancelled;
            }
            let mut merged = prev.clone();
            if let CommandKind::Reorder {
                new_position: position,
                ..
            } = merged.kind_mut()
            {
                *position = new_position;
            }
            MergeOutcome::Replaced(merged)
        }
        _ => MergeOutcome::Unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column() -> ObjectHandle {
        ObjectHandle::new("column", 1)
    }

    #[test]
    fn test_create_without_predecessor_marks_target_created() {
        let mut params = UserParams::new();
        let create = Command::create(column(), "c", BTreeMap::new());

        assert_eq!(create.merge(None, &mut params), MergeOutcome::Unchanged);
        assert!(is_created_in_pass(&params, &column()));
    }

    #[test]
    fn test_delete_after_create_cancels() {
        let mut params = UserParams::new();
        let create = Command::create(column(), "c", BTreeMap::new());
        create.merge(None, &mut params);

        let delete = Command::delete(column());
        assert_eq!(delete.merge(Some(&create), &mut params), MergeOutcome::Cancelled);
    }

    #[test]
    fn test_delete_absorbed_into_previous_delete() {
        let mut params = UserParams::new();
        let first = Command::delete(column());
        let second = Command::delete(column());

        match second.merge(Some(&first), &mut params) {
            MergeOutcome::Replaced(cmd) => assert_eq!(cmd.id(), first.id()),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_rename_collapses_into_previous_rename() {
        let mut params = UserParams::new();
        let first = Command::rename(column(), "a", "b");
        let second = Command::rename(column(), "b", "c");

        match second.merge(Some(&first), &mut params) {
            MergeOutcome::Replaced(cmd) => {
                assert_eq!(cmd.id(), first.id());
                assert_eq!(
                    cmd.kind(),
                    &CommandKind::Rename {
                        old_name: "a".to_string(),
                        new_name: "c".to_string()
                    }
                );
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_rename_back_to_original_cancels() {
        let mut params = UserParams::new();
        let first = Command::rename(column(), "a", "b");
        let second = Command::rename(column(), "b", "a");
        assert_eq!(second.merge(Some(&first), &mut params), MergeOutcome::Cancelled);
    }

    #[test]
    fn test_rename_folds_into_create() {
        let mut params = UserParams::new();
        let create = Command::create(column(), "a", BTreeMap::new())
            .with_qualified_name(vec!["t".to_string(), "a".to_string()]);
        let rename = Command::rename(column(), "a", "b");

        match rename.merge(Some(&create), &mut params) {
            MergeOutcome::Replaced(cmd) => {
                assert_eq!(cmd.id(), create.id());
                assert_eq!(cmd.object_name(), Some("b"));
                assert!(matches!(cmd.kind(), CommandKind::Create { name, .. } if name == "b"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_reverted_property_is_dropped() {
        let mut params = UserParams::new();
        let mut first = BTreeMap::new();
        first.insert("type".to_string(), PropertyDelta::new("INT", "TEXT"));
        first.insert("not_null".to_string(), PropertyDelta::new(false, true));
        let mut second = BTreeMap::new();
        second.insert("type".to_string(), PropertyDelta::new("TEXT", "INT"));

        let prev = Command::property_change(column(), first);
        let next = Command::property_change(column(), second);
        match next.merge(Some(&prev), &mut params) {
            MergeOutcome::Replaced(cmd) => match cmd.kind() {
                CommandKind::PropertyChange { changes } => {
                    assert_eq!(changes.len(), 1);
                    assert!(changes.contains_key("not_null"));
                }
                other => panic!("unexpected kind {:?}", other),
            },
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_fully_reverted_properties_cancel() {
        let mut params = UserParams::new();
        let mut first = BTreeMap::new();
        first.insert("type".to_string(), PropertyDelta::new("INT", "TEXT"));
        let mut second = BTreeMap::new();
        second.insert("type".to_string(), PropertyDelta::new("TEXT", "INT"));

        let prev = Command::property_change(column(), first);
        let next = Command::property_change(column(), second);
        assert_eq!(next.merge(Some(&prev), &mut params), MergeOutcome::Cancelled);
    }

    #[test]
    fn test_reorder_round_trip_cancels() {
        let mut params = UserParams::new();
        let prev = Command::reorder(column(), 2, 5);
        assert_eq!(
            Command::reorder(column(), 5, 2).merge(Some(&prev), &mut params),
            MergeOutcome::Cancelled
        );
        assert!(matches!(
            Command::reorder(column(), 5, 1).merge(Some(&prev), &mut params),
            MergeOutcome::Replaced(_)
        ));
    }

    #[test]
    fn test_unrelated_kinds_are_unchanged() {
        let mut params = UserParams::new();
        let prev = Command::rename(column(), "a", "b");
        let reorder = Command::reorder(column(), 0, 1);
        assert_eq!(reorder.merge(Some(&prev), &mut params), MergeOutcome::Unchanged);
    }
}
