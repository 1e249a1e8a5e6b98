//! Typed errors and HTTP mapping.

use crate::service::Violation;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("validation failed: {}", summarize(.0))]
    ValidationFailed(Vec<Violation>),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transaction aborted at step {step}: {reason}")]
    TransactionAborted { step: usize, reason: String },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("decode: {0}")]
    Decode(String),
}

impl AppError {
    /// Backend-level write rejection (unique or foreign key violation).
    pub fn is_conflict(&self) -> bool {
        match self {
            AppError::Conflict(_) => true,
            AppError::Db(sqlx::Error::Database(e)) => e.is_unique_violation() || e.is_foreign_key_violation(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Decode(e.to_string())
    }
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::ValidationFailed(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Db(e) => {
                if let sqlx::Error::RowNotFound = e {
                    (StatusCode::NOT_FOUND, "not_found")
                } else if self.is_conflict() {
                    (StatusCode::CONFLICT, "conflict")
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
                }
            }
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::TransactionAborted { .. } => (StatusCode::CONFLICT, "transaction_aborted"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Decode(_) => (StatusCode::INTERNAL_SERVER_ERROR, "decode_error"),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let details = match &self {
            AppError::ValidationFailed(violations) => serde_json::to_value(violations).ok(),
            _ => None,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Turns a zero affected-row count into `NotFound` for callers that expect a match.
pub fn expect_matched(affected: u64, what: &str) -> Result<u64, AppError> {
    if affected == 0 {
        return Err(AppError::NotFound(what.to_string()));
    }
    Ok(affected)
}
