//! Parse error reporting

use thiserror::Error;

/// A syntax error in program text, with the 1-based line and column where
/// it was detected. Parse errors are fatal: the program is never run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("parse error at line {line}, column {column}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl ParseError {
    pub fn new(line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}
