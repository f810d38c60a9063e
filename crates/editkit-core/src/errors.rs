use editkit_core_types::{ObjectHandle, RequestId};
use thiserror::Error;

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code that callers can match on when
/// deciding how to render a failure to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Preconditions
    NotConnected,
    IllegalState,
    NoObjectManager,

    // Validation
    ValidationFailed,
    InvalidInput,
    NotFound,
    AlreadyExists,
    Unsupported,

    // Execution
    PersistFailure,
    UnknownHook,
    Canceled,
    /// Auto-commit switch, commit or rollback failed (logged, never returned by the engine)
    TransactionControl,

    // Integration/IO
    Persistence,
    Io,
    Serialization,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::NotConnected => "ERR_NOT_CONNECTED",
            ExErrorKind::IllegalState => "ERR_ILLEGAL_STATE",
            ExErrorKind::NoObjectManager => "ERR_NO_OBJECT_MANAGER",
            ExErrorKind::ValidationFailed => "ERR_VALIDATION_FAILED",
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::AlreadyExists => "ERR_ALREADY_EXISTS",
            ExErrorKind::Unsupported => "ERR_UNSUPPORTED",
            ExErrorKind::PersistFailure => "ERR_PERSIST_FAILURE",
            ExErrorKind::UnknownHook => "ERR_UNKNOWN_HOOK",
            ExErrorKind::Canceled => "ERR_CANCELED",
            ExErrorKind::TransactionControl => "ERR_TRANSACTION_CONTROL",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }
}

/// Canonical structured error type
///
/// Carries a classification for programmatic handling plus the command and
/// action titles a UI needs to explain what failed.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    command_title: Option<String>,
    action_title: Option<String>,
    target: Option<ObjectHandle>,
    request_id: Option<RequestId>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            command_title: None,
            action_title: None,
            target: None,
            request_id: None,
            message: String::new(),
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add the title of the command being persisted
    pub fn with_command_title(mut self, title: impl Into<String>) -> Self {
        self.command_title = Some(title.into());
        self
    }

    /// Add the title of the persist action that failed
    pub fn with_action_title(mut self, title: impl Into<String>) -> Self {
        self.action_title = Some(title.into());
        self
    }

    /// Add the target object
    pub fn with_target(mut self, target: ObjectHandle) -> Self {
        self.target = Some(target);
        self
    }

    /// Add request ID context
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn command_title(&self) -> Option<&str> {
        self.command_title.as_deref()
    }

    pub fn action_title(&self) -> Option<&str> {
        self.action_title.as_deref()
    }

    pub fn target(&self) -> Option<&ObjectHandle> {
        self.target.as_ref()
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }

    /// Walk the source chain down to the innermost error
    pub fn root_cause(&self) -> &ExError {
        let mut current = self;
        while let Some(next) = current.source_error() {
            current = next;
        }
        current
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(title) = &self.command_title {
            write!(f, " (command: {})", title)?;
        }
        if let Some(title) = &self.action_title {
            write!(f, " (action: {})", title)?;
        }
        if let Some(target) = &self.target {
            write!(f, " (target: {})", target)?;
        }
        if let Some(request_id) = &self.request_id {
            write!(f, " (request: {})", request_id)?;
        }
        if let Some(source) = &self.source {
            write!(f, ": caused by {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Error taxonomy of the command engine
#[derive(Error, Debug, Clone)]
pub enum EditError {
    /// `save_changes` was called while the execution context is disconnected
    #[error("Context [{context}] isn't connected to the database")]
    NotConnected { context: String },

    /// A command rejected itself before anything was persisted
    #[error("Cannot save: {reason}")]
    Validation { command: String, reason: String },

    /// A persist action failed while executing a command
    #[error("Failed to execute '{action}' of '{command}': {source}")]
    PersistFailure {
        command: String,
        action: String,
        #[source]
        source: ExError,
    },

    /// Undo/redo called with nothing eligible
    #[error("Illegal state: {reason}")]
    IllegalState { reason: String },

    /// The manager resolver knows nothing about the target's kind
    #[error("Can't find object manager for '{target}'")]
    NoObjectManager { target: ObjectHandle },

    /// The progress monitor requested cancellation
    #[error("Save canceled by user")]
    Canceled,

    /// The object manager cannot persist this kind of command
    #[error("{kind} is not supported for {target}")]
    UnsupportedCommand { kind: String, target: ObjectHandle },

    /// A persist action names a handler hook nobody implements
    #[error("Unknown persist hook '{hook}'")]
    UnknownHook { hook: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<EditError> for ExError {
    fn from(err: EditError) -> Self {
        match err {
            EditError::NotConnected { context } => ExError::new(ExErrorKind::NotConnected)
                .with_op("save_changes")
                .with_message(format!("Context [{}] isn't connected to the database", context)),

            EditError::Validation { command, reason } => {
                ExError::new(ExErrorKind::ValidationFailed)
                    .with_op("validate")
                    .with_command_title(command)
                    .with_message(format!("Cannot save: {}", reason))
            }

            EditError::PersistFailure {
                command,
                action,
                source,
            } => ExError::new(ExErrorKind::PersistFailure)
                .with_op("execute_persist_action")
                .with_command_title(command)
                .with_action_title(action)
                .with_message(source.message().to_string())
                .with_source(source),

            EditError::IllegalState { reason } => {
                ExError::new(ExErrorKind::IllegalState).with_message(reason)
            }

            EditError::NoObjectManager { target } => ExError::new(ExErrorKind::NoObjectManager)
                .with_message(format!("Can't find object manager for '{}'", target))
                .with_target(target),

            EditError::Canceled => {
                ExError::new(ExErrorKind::Canceled).with_message("Save canceled by user")
            }

            EditError::UnsupportedCommand { kind, target } => {
                ExError::new(ExErrorKind::Unsupported)
                    .with_message(format!("{} is not supported for {}", kind, target))
                    .with_target(target)
            }

            EditError::UnknownHook { hook } => ExError::new(ExErrorKind::UnknownHook)
                .with_message(format!("Unknown persist hook '{}'", hook)),

            EditError::Internal { message } => {
                ExError::new(ExErrorKind::Internal).with_message(message)
            }
        }
    }
}

/// Conversion from serde_json::Error to ExError
impl From<serde_json::Error> for ExError {
    fn from(err: serde_json::Error) -> Self {
        ExError::new(ExErrorKind::Serialization).with_message(err.to_string())
    }
}
