//! Error types for the Mediaflow engine.
//!
//! Two layers are kept apart:
//!
//! - [`EngineError`] is what callers of the engine see. Structural problems
//!   (`InternalState`) are never swallowed and always reach the caller.
//! - [`OperationError`] is what operation handlers return. The driver turns
//!   these into state transitions and error messages on the instance.

use thiserror::Error;

/// Engine-level errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The instance is structurally inconsistent (empty operation list,
    /// no current operation where one is required, broken positions).
    #[error("Internal state error: {0}")]
    InternalState(String),

    /// A required configuration key is missing or blank.
    #[error("Configuration key '{key}' is either missing or empty")]
    Configuration { key: String },

    /// The requested lifecycle transition is not allowed right now.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Parse error (YAML, JSON, etc.)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persistence collaborator failure
    #[error("Repository error: {0}")]
    Repository(String),

    /// Job registry failure
    #[error("Job error: {0}")]
    Job(String),
}

impl EngineError {
    /// Shorthand for a missing configuration key.
    pub fn missing_key(key: impl Into<String>) -> Self {
        EngineError::Configuration { key: key.into() }
    }

    /// Returns true for structural errors that must reach the caller.
    pub fn is_internal(&self) -> bool {
        matches!(self, EngineError::InternalState(_))
    }
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<envy::Error> for EngineError {
    fn from(err: envy::Error) -> Self {
        match err {
            envy::Error::MissingValue(key) => EngineError::missing_key(key),
            envy::Error::Custom(msg) => EngineError::Parse(msg),
        }
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::Parse(err.to_string())
    }
}

/// Errors raised by operation handlers while executing.
#[derive(Debug, Error)]
pub enum OperationError {
    /// The handler ran and failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// The operation is misconfigured.
    #[error("Configuration key '{0}' is either missing or empty")]
    Configuration(String),

    /// The handler did not return in time.
    #[error("Execution timed out after {0} seconds")]
    Timeout(u64),

    /// A stop request interrupted the operation.
    #[error("Execution cancelled")]
    Cancelled,

    /// No handler is registered for the operation template.
    #[error("No operation handler registered for '{0}'")]
    HandlerNotFound(String),

    /// A job dispatched by the handler could not be tracked.
    #[error("Job error: {0}")]
    Job(String),
}

impl From<EngineError> for OperationError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Configuration { key } => OperationError::Configuration(key),
            EngineError::Job(msg) => OperationError::Job(msg),
            other => OperationError::ExecutionFailed(other.to_string()),
        }
    }
}

impl From<std::io::Error> for OperationError {
    fn from(e: std::io::Error) -> Self {
        OperationError::ExecutionFailed(e.to_string())
    }
}
