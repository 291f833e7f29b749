//! Engine error taxonomy
//!
//! Every failure the engine reports to a client falls into one of the
//! wire kinds returned by [`EngineError::kind`]. The pause signal is
//! deliberately *not* part of this taxonomy: pausing is control flow,
//! carried on the interpreter's own channel and recovered only by the
//! executor.

use atp_checkpoint::CheckpointError;
use atp_script::ParseError;
use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// User source could not be parsed. Fatal; the program never runs.
    #[error("parse error at line {line}, column {column}: {message}")]
    Parse {
        line: u32,
        column: u32,
        message: String,
    },

    /// An AST rewrite failed for a particular pattern. Engine-internal
    /// callers treat this as non-fatal (the site falls back to the
    /// original source); it only surfaces if the fallback itself fails.
    #[error("transform failed: {0}")]
    Transform(String),

    /// Durable cache read/write failed. Fatal for the attempt; the
    /// client may retry the resume.
    #[error(transparent)]
    CheckpointIo(#[from] CheckpointError),

    /// A resumable loop exceeded the iteration cap.
    #[error("loop exceeded {cap} iterations without completing")]
    InfiniteLoop { cap: u64 },

    /// Callback count, memory, or wall-clock budget exceeded.
    #[error("limit exceeded: {what}")]
    LimitExceeded { what: String },

    /// Cooperative cancellation.
    #[error("execution cancelled")]
    Cancelled,

    /// Uncaught exception from user code, surfaced as-is.
    #[error("{message}")]
    User {
        message: String,
        stack: Option<String>,
    },

    /// No execution with this id is known.
    #[error("unknown execution: {0}")]
    UnknownExecution(String),

    /// The execution exists but is not in a state that allows the
    /// requested operation (e.g. resuming a completed execution).
    #[error("execution {id} is {status}, not paused")]
    InvalidState { id: String, status: String },

    /// Submitted program text differs from the text this execution id
    /// was created with; resume across changed code is refused.
    #[error("code does not match execution {0}")]
    CodeMismatch(String),
}

impl EngineError {
    /// Wire error kind, per the engine's error taxonomy.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Parse { .. } => "parse-error",
            EngineError::Transform(_) => "transform-error",
            EngineError::CheckpointIo(_) => "checkpoint-io",
            EngineError::InfiniteLoop { .. } => "infinite-loop",
            EngineError::LimitExceeded { .. } => "limit-exceeded",
            EngineError::Cancelled => "cancelled",
            EngineError::User { .. } => "user-error",
            EngineError::UnknownExecution(_) => "not-found",
            EngineError::InvalidState { .. } => "invalid-state",
            EngineError::CodeMismatch(_) => "code-mismatch",
        }
    }

    pub fn limit(what: impl Into<String>) -> Self {
        EngineError::LimitExceeded { what: what.into() }
    }
}

impl From<ParseError> for EngineError {
    fn from(err: ParseError) -> Self {
        EngineError::Parse {
            line: err.line,
            column: err.column,
            message: err.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_the_taxonomy() {
        assert_eq!(
            EngineError::Parse {
                line: 1,
                column: 2,
                message: "x".into()
            }
            .kind(),
            "parse-error"
        );
        assert_eq!(EngineError::InfiniteLoop { cap: 10 }.kind(), "infinite-loop");
        assert_eq!(EngineError::limit("wall-clock").kind(), "limit-exceeded");
        assert_eq!(EngineError::Cancelled.kind(), "cancelled");
        assert_eq!(
            EngineError::User {
                message: "boom".into(),
                stack: None
            }
            .kind(),
            "user-error"
        );
    }
}
