//! Worker error types.

use std::path::PathBuf;

use mediaflow_engine::EngineError;
use thiserror::Error;

/// Errors raised while preparing or driving workflows.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// A `key=value` configuration pair could not be parsed.
    #[error("Invalid configuration pair '{0}', expected key=value")]
    InvalidPair(String),

    /// An artifact file could not be read or parsed.
    #[error("Failed to load artifact from {path}: {message}")]
    Artifact { path: PathBuf, message: String },

    /// The engine refused or failed the request.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The worker is shutting down and accepts no more workflows.
    #[error("Worker is shutting down")]
    ShuttingDown,
}

pub type WorkerResult<T> = Result<T, WorkerError>;
