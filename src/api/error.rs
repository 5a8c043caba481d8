use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;
use tracing::error;

use super::models::ErrorResponse;
use super::validation::BoxValidationError;
use crate::ledger::LedgerError;
use crate::model::InvalidInput;
use crate::service::SubmitError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    /// Domain validation failure; its code is passed through to the client
    #[error("{}", .0.message)]
    InvalidInput(InvalidInput),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("missing or empty X-Runbox-User header")]
    MissingUser,
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) | ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::MissingUser => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::InvalidInput(invalid) => invalid.code,
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::MissingUser => "MISSING_USER",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        if let ApiError::Internal(message) = &self {
            error!(%message, "Request failed");
        }

        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<InvalidInput> for ApiError {
    fn from(value: InvalidInput) -> Self {
        ApiError::InvalidInput(value)
    }
}

impl From<BoxValidationError> for ApiError {
    fn from(value: BoxValidationError) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<LedgerError> for ApiError {
    fn from(value: LedgerError) -> Self {
        ApiError::Internal(value.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Empty => ApiError::InvalidPayload(value.to_string()),
            StorageError::NotFound(id) => ApiError::NotFound(format!("archive {id}")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(value: SubmitError) -> Self {
        match value {
            SubmitError::BlueprintNotFound(id) => ApiError::NotFound(format!("box {id}")),
            SubmitError::InvalidInput(invalid) => ApiError::InvalidInput(invalid),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
