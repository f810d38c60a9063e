use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use editkit_core_types::{CommandId, ObjectHandle};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{EditError, Result};
use crate::manager::ObjectManager;
use crate::options::SaveOptions;
use crate::persist::PersistAction;

/// Old and new value of one changed property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDelta {
    pub old: Value,
    pub new: Value,
}

impl PropertyDelta {
    pub fn new(old: impl Into<Value>, new: impl Into<Value>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.old == self.new
    }
}

/// Closed set of edit kinds
///
/// The payload of each variant is everything the merge rules and the object
/// managers need; see `Command::merge` for how kinds collapse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandKind {
    Create {
        name: String,
        #[serde(default)]
        properties: BTreeMap<String, Value>,
    },
    Delete,
    Rename {
        old_name: String,
        new_name: String,
    },
    PropertyChange {
        changes: BTreeMap<String, PropertyDelta>,
    },
    Reorder {
        old_position: usize,
        new_position: usize,
    },
    Script {
        actions: Vec<PersistAction>,
    },
    /// Groups the commands of every object in `scope` into one persist unit
    Aggregate {
        scope: Vec<ObjectHandle>,
        #[serde(default)]
        claimed: Vec<Command>,
    },
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Create { .. } => "create",
            CommandKind::Delete => "delete",
            CommandKind::Rename { .. } => "rename",
            CommandKind::PropertyChange { .. } => "property_change",
            CommandKind::Reorder { .. } => "reorder",
            CommandKind::Script { .. } => "script",
            CommandKind::Aggregate { .. } => "aggregate",
        }
    }
}

/// One logical edit against one target object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    id: CommandId,
    target: ObjectHandle,
    title: String,
    undoable: bool,
    ignore_nested_commands: bool,
    /// Path of the target at issue time, container first, own name last
    qualified_name: Vec<String>,
    issued_at: DateTime<Utc>,
    kind: CommandKind,
}

impl Command {
    /// Create a new undoable command with a fresh id
    pub fn new(target: ObjectHandle, title: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            id: CommandId::new(),
            target,
            title: title.into(),
            undoable: true,
            ignore_nested_commands: false,
            qualified_name: Vec::new(),
            issued_at: Utc::now(),
            kind,
        }
    }

    pub fn create(
        target: ObjectHandle,
        name: impl Into<String>,
        properties: BTreeMap<String, Value>,
    ) -> Self {
        let title = format!("Create {}", target.kind());
        let name = name.into();
        Self::new(target, title, CommandKind::Create { name, properties })
    }

    pub fn delete(target: ObjectHandle) -> Self {
        let title = format!("Delete {}", target.kind());
        Self::new(target, title, CommandKind::Delete)
    }

    pub fn rename(
        target: ObjectHandle,
        old_name: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Self {
        let title = format!("Rename {}", target.kind());
        Self::new(
            target,
            title,
            CommandKind::Rename {
                old_name: old_name.into(),
                new_name: new_name.into(),
            },
        )
    }

    pub fn property_change(target: ObjectHandle, changes: BTreeMap<String, PropertyDelta>) -> Self {
        let title = format!("Change {} properties", target.kind());
        Self::new(target, title, CommandKind::PropertyChange { changes })
    }

    pub fn reorder(target: ObjectHandle, old_position: usize, new_position: usize) -> Self {
        let title = format!("Reorder {}", target.kind());
        Self::new(
            target,
            title,
            CommandKind::Reorder {
                old_position,
                new_position,
            },
        )
    }

    /// Literal script command; not undoable since nothing can mirror it back
    pub fn script(
        target: ObjectHandle,
        title: impl Into<String>,
        actions: Vec<PersistAction>,
    ) -> Self {
        Self::new(target, title, CommandKind::Script { actions }).with_undoable(false)
    }

    pub fn aggregate(target: ObjectHandle, scope: Vec<ObjectHandle>) -> Self {
        let title = format!("Save {}", target.kind());
        Self::new(
            target,
            title,
            CommandKind::Aggregate {
                scope,
                claimed: Vec::new(),
            },
        )
    }

    pub fn with_undoable(mut self, undoable: bool) -> Self {
        self.undoable = undoable;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_qualified_name(mut self, qualified_name: Vec<String>) -> Self {
        self.qualified_name = qualified_name;
        self
    }

    /// Nested commands issued while this one is tracked are dropped
    pub fn ignoring_nested_commands(mut self) -> Self {
        self.ignore_nested_commands = true;
        self
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn target(&self) -> &ObjectHandle {
        &self.target
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_undoable(&self) -> bool {
        self.undoable
    }

    pub fn ignores_nested_commands(&self) -> bool {
        self.ignore_nested_commands
    }

    pub fn qualified_name(&self) -> &[String] {
        &self.qualified_name
    }

    /// Own name of the target at issue time
    pub fn object_name(&self) -> Option<&str> {
        self.qualified_name.last().map(String::as_str)
    }

    /// Name of the containing object at issue time
    pub fn container_name(&self) -> Option<&str> {
        let len = self.qualified_name.len();
        if len < 2 {
            return None;
        }
        self.qualified_name.get(len - 2).map(String::as_str)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut CommandKind {
        &mut self.kind
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self.kind, CommandKind::Aggregate { .. })
    }

    /// Replace the own-name segment of the qualified name
    pub(crate) fn set_object_name(&mut self, name: &str) {
        match self.qualified_name.last_mut() {
            Some(last) => *last = name.to_string(),
            None => self.qualified_name.push(name.to_string()),
        }
    }

    /// Produce the persist actions of this command
    ///
    /// Script commands carry their own actions; every other kind asks the
    /// object manager to render them.
    ///
    /// # Errors
    ///
    /// Propagates errors from the object manager.
    pub fn persist_actions(
        &self,
        manager: &dyn ObjectManager,
        options: &SaveOptions,
    ) -> Result<Vec<PersistAction>> {
        match &self.kind {
            CommandKind::Script { actions } => Ok(actions.clone()),
            _ => manager.persist_actions(self, options),
        }
    }

    /// Run built-in checks, then the manager's checks
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` when the command cannot be saved.
    pub fn validate(&self, manager: &dyn ObjectManager) -> Result<()> {
        let reason = match &self.kind {
            CommandKind::Create { name, .. } if name.trim().is_empty() => {
                Some(format!("Empty {} name", self.target.kind()))
            }
            CommandKind::Rename { new_name, .. } if new_name.trim().is_empty() => {
                Some(format!("Empty {} name", self.target.kind()))
            }
            CommandKind::Script { actions } => actions
                .iter()
                .find(|a| a.script.is_none() && a.hook.is_none())
                .map(|a| format!("Action '{}' has neither script nor hook", a.title)),
            _ => None,
        };
        if let Some(reason) = reason {
            return Err(EditError::Validation {
                command: self.title.clone(),
                reason,
            }
            .into());
        }
        manager.validate(self)
    }
}
