//! Audit error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::response::ErrorResponse;

/// Errors raised by an [`AuditStore`](super::store::AuditStore) backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt audit row: {0}")]
    Corrupt(String),
}

/// Errors surfaced by the audit core
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// Caller lacks the role required for the operation
    #[error("Forbidden: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Export error: {0}")]
    Export(String),
}

impl AuditError {
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization(_))
    }
}

impl From<sqlx::Error> for AuditError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}

impl From<csv::Error> for AuditError {
    fn from(err: csv::Error) -> Self {
        Self::Export(err.to_string())
    }
}

impl IntoResponse for AuditError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AuditError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg),
            AuditError::Authorization(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            AuditError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AuditError::Store(err) => {
                tracing::error!(error = %err, "Audit store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "A database error occurred".to_string(),
                )
            },
            AuditError::Serialization(err) => {
                tracing::error!(error = %err, "Audit serialization error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            },
            AuditError::Export(msg) => {
                tracing::error!(error = %msg, "Audit export error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            },
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}
