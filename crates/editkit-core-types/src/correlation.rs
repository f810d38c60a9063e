//! Save run correlation
//!
//! `CommandContext::save_changes` mints one `RequestId` per call. It is
//! logged on the `save_changes` start/end events and attached to the error a
//! failed save returns, so a reported failure can be matched to its log lines.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one save run
///
/// Time-ordered (UUIDv7); serialized as the hyphenated string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_run_gets_a_fresh_id() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_ids_are_version_7() {
        assert_eq!(RequestId::new().as_uuid().get_version_num(), 7);
    }

    #[test]
    fn test_display_parses_back() {
        let id = RequestId::new();
        let text = id.to_string();

        assert_eq!(text.len(), 36);
        assert_eq!(text.parse::<RequestId>().unwrap(), id);
        assert!("not-a-uuid".parse::<RequestId>().is_err());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = RequestId::new();
        let json = serde_json::to_string(&id).unwrap();

        assert_eq!(json, format!("\"{}\"", id));
        assert_eq!(serde_json::from_str::<RequestId>(&json).unwrap(), id);
    }
}
