use thiserror::Error;

use super::job::JobState;
use super::value::ValueError;

/// User-correctable input problem with a machine-readable code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct InvalidInput {
    pub code: &'static str,
    pub message: String,
}

impl InvalidInput {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Container output could not be turned into the job's output schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputParseError {
    #[error("expected {expected} output lines, got {actual}")]
    LineCount { expected: usize, actual: usize },

    #[error("output line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: ValueError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidInput),

    #[error("invalid state change: cannot {action} a {actual} job (expected {expected})")]
    InvalidStateChange {
        action: &'static str,
        actual: JobState,
        expected: JobState,
    },

    #[error("output parse error: {0}")]
    OutputParse(#[from] OutputParseError),
}

impl JobError {
    /// Machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            JobError::InvalidInput(invalid) => invalid.code,
            JobError::InvalidStateChange { .. } => "invalid-state-change",
            JobError::OutputParse(_) => "output-parse-error",
        }
    }
}
