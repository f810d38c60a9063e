//! Canonical schema constants for structured logging and events
//!
//! These constants ensure consistency across all logging and error reporting.

// Canonical field keys for structured logging
pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_REQUEST_ID: &str = "request_id";

// Command and object identifiers
pub const FIELD_COMMAND_ID: &str = "command_id";
pub const FIELD_COMMAND_TITLE: &str = "command_title";
pub const FIELD_ACTION_TITLE: &str = "action_title";
pub const FIELD_TARGET: &str = "target";

// Collection sizes
pub const FIELD_QUEUE_COUNT: &str = "queue_count";
pub const FIELD_HISTORY_LEN: &str = "history_len";

// Error fields
pub const FIELD_ERR_KIND: &str = "err.kind";
pub const FIELD_ERR_CODE: &str = "err.code";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";
