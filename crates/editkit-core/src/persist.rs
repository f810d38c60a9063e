use serde::{Deserialize, Serialize};

use crate::errors::ExError;

/// Classification of a persist action
///
/// - `Normal`: a failure stops the command; only finalizers run afterwards
/// - `Optional`: a failure is recorded and logged, execution continues
/// - `Finalizer`: runs even after an earlier failure in the same command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    #[default]
    Normal,
    Optional,
    Finalizer,
}

/// A single unit of remote work produced by a command
///
/// Either carries a literal `script` executed through the session, or names
/// a `hook` that the object manager knows how to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistAction {
    pub title: String,
    #[serde(default)]
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<String>,
}

impl PersistAction {
    /// Normal action running a literal script; the script doubles as title
    pub fn script(script: impl Into<String>) -> Self {
        let script = script.into();
        Self {
            title: script.clone(),
            action_type: ActionType::Normal,
            script: Some(script),
            hook: None,
        }
    }

    /// Action delegated to a named manager hook
    pub fn hook(title: impl Into<String>, hook: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            action_type: ActionType::Normal,
            script: None,
            hook: Some(hook.into()),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_type(mut self, action_type: ActionType) -> Self {
        self.action_type = action_type;
        self
    }

    pub fn optional(self) -> Self {
        self.with_type(ActionType::Optional)
    }

    pub fn finalizer(self) -> Self {
        self.with_type(ActionType::Finalizer)
    }

    pub fn is_optional(&self) -> bool {
        self.action_type == ActionType::Optional
    }

    pub fn is_finalizer(&self) -> bool {
        self.action_type == ActionType::Finalizer
    }
}

/// Execution record of one persist action during a save
#[derive(Debug, Clone)]
pub struct PersistInfo {
    pub action: PersistAction,
    pub executed: bool,
    pub error: Option<ExError>,
}

impl PersistInfo {
    pub fn new(action: PersistAction) -> Self {
        Self {
            action,
            executed: false,
            error: None,
        }
    }
}
