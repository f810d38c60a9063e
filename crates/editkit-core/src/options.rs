use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Options passed through `save_changes` to every object manager
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SaveOptions(BTreeMap<String, Value>);

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Boolean option; absent or non-boolean values read as `false`
    pub fn flag(&self, key: &str) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

fn default_context_name() -> String {
    "editkit".to_string()
}

/// Construction-time settings of a command context
///
/// In an atomic context reflectors are not called while commands are
/// added or undone; the model is updated only once the save commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub atomic: bool,
    #[serde(default = "default_context_name")]
    pub context_name: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            atomic: false,
            context_name: default_context_name(),
        }
    }
}

impl ContextConfig {
    pub fn atomic() -> Self {
        Self {
            atomic: true,
            ..Self::default()
        }
    }

    pub fn with_context_name(mut self, name: impl Into<String>) -> Self {
        self.context_name = name.into();
        self
    }
}
