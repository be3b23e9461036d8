//! Error types for Gantry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Invalid pipeline definition: {0}")]
    InvalidPipeline(String),

    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    // Step errors
    #[error("Step '{step}' could not be executed: {message}")]
    StepExecution { step: String, message: String },

    #[error("Step '{step}' has nothing to run")]
    EmptyStep { step: String },

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error stems from the pipeline configuration rather than
    /// from executing it.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::InvalidPipeline(_) | Error::InvalidPattern { .. } | Error::InvalidEvent(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::InvalidPipeline(err.to_string())
    }
}
