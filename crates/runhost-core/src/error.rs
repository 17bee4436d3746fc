//! Error types for the runhost scripting host

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for the scripting host
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input to the host's own contract, raised before the engine is touched
    #[error("Validation error: {0}")]
    Validation(String),

    /// A parameter-bound command could not be resolved by the engine
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    /// The caller cancelled an in-flight run
    #[error("Execution was cancelled")]
    Cancelled,

    /// Operation attempted on a disposed context or a closed pool
    #[error("Cannot access a disposed {0}")]
    Disposed(String),

    /// A script or command raised a runtime fault
    #[error("Script runtime error: {message}")]
    Execution {
        /// Error message
        message: String,
        /// Source position text, when the engine reports one
        position: Option<String>,
    },

    /// Script text could not be parsed
    #[error("Script parse error: {message}")]
    Parse {
        /// Error message
        message: String,
        /// Source position text, when the engine reports one
        position: Option<String>,
    },

    /// Operation forbidden by the session's execution policy
    #[error("Execution policy violation: {0}")]
    Restricted(String),

    /// Attempt to overwrite a constant variable
    #[error("Variable '{0}' is read-only")]
    VariableReadOnly(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (should not happen in production)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Create an execution error without position information
    pub fn execution(message: impl Into<String>) -> Self {
        Error::Execution {
            message: message.into(),
            position: None,
        }
    }

    /// Create a disposed-resource error naming the resource
    pub fn disposed(resource: impl Into<String>) -> Self {
        Error::Disposed(resource.into())
    }

    /// Returns true if this error is a caller-requested cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns true if this error was raised by a disposed resource
    pub fn is_disposed(&self) -> bool {
        matches!(self, Error::Disposed(_))
    }

    /// Source position text attached to engine errors
    pub fn position(&self) -> Option<&str> {
        match self {
            Error::Execution { position, .. } | Error::Parse { position, .. } => {
                position.as_deref()
            }
            _ => None,
        }
    }
}
