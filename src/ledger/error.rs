use thiserror::Error;

use crate::model::JobError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Blueprint not found: {0}")]
    BlueprintNotFound(String),

    /// The update closure refused the change; nothing was written.
    #[error("Update rejected: {0}")]
    Rejected(#[from] JobError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
