//! Failure kinds produced by the process engine and operation dispatch.
//!
//! The set is closed and flat: no variant wraps another error, so callers
//! match on the kind and only ever display the `stderr` / `context` payloads.

use crate::operation::Mode;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The binary could not be launched (missing or not executable)
    #[error("{program} not found - is Homebrew installed? See https://brew.sh")]
    NotFound { program: String },

    #[error("command exited with status {code}: {}", stderr.trim())]
    NonZeroExit { code: i32, stderr: String },

    #[error("failed to decode output: {context}")]
    DecodeFailure { context: String },

    #[error("command timed out")]
    Timeout,

    #[error("command was cancelled")]
    Cancelled,

    /// An operation was dispatched through an entry point for another
    /// execution mode; brew was not launched
    #[error("brew {operation} is a {declared:?} operation and cannot be run as {requested:?}")]
    ModeMismatch {
        operation: &'static str,
        declared: Mode,
        requested: Mode,
    },
}

impl ExecutionError {
    pub fn decode(context: impl Into<String>) -> Self {
        ExecutionError::DecodeFailure {
            context: context.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ExecutionError::NotFound { .. })
    }

    /// Exit code carried by a `NonZeroExit`, if any
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionError::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ExecutionError {
    fn from(err: serde_json::Error) -> Self {
        ExecutionError::decode(format!(
            "invalid JSON at line {} column {}: {}",
            err.line(),
            err.column(),
            err
        ))
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
