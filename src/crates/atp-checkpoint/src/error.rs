//! Error types for checkpoint operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Which checkpoint operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOp {
    Save,
    Load,
    Clear,
}

impl std::fmt::Display for CheckpointOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointOp::Save => write!(f, "save"),
            CheckpointOp::Load => write!(f, "load"),
            CheckpointOp::Clear => write!(f, "clear"),
        }
    }
}

/// Errors that can occur during checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// The underlying cache provider failed
    #[error("cache storage error: {0}")]
    Storage(String),

    /// A checkpoint read/write failed; carries the operation tag and key
    #[error("checkpoint {op} failed for key '{key}': {message}")]
    Io {
        op: CheckpointOp,
        key: String,
        message: String,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored data did not have the expected shape
    #[error("invalid checkpoint data: {0}")]
    Invalid(String),
}

impl CheckpointError {
    /// Wrap a storage failure with the operation tag and key it occurred on.
    pub fn io(op: CheckpointOp, key: impl Into<String>, source: impl std::fmt::Display) -> Self {
        CheckpointError::Io {
            op,
            key: key.into(),
            message: source.to_string(),
        }
    }
}
