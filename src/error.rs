//! Error handling for the attendance server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDateTime;
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or missing input (tag, date, time, credential)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unparseable value coming from storage or a client
    #[error("Parse error: {0}")]
    Parse(String),

    /// No active student matches the lookup key
    #[error("Student not found: {0}")]
    StudentNotFound(String),

    /// Not found (generic)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Device credential rejected, or device school does not own the student
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Missing or unknown client token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Token is valid but not allowed to perform the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Check-out timestamp precedes the recorded check-in
    #[error("Check-out at {check_out} is before check-in at {check_in}")]
    CheckOutBeforeCheckIn {
        check_in: NaiveDateTime,
        check_out: NaiveDateTime,
    },

    /// Conflict (duplicate row)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLx database error
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl Error {
    /// Stable machine-readable code used in API and WebSocket error payloads
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Parse(_) => "PARSE_ERROR",
            Error::StudentNotFound(_) => "STUDENT_NOT_FOUND",
            Error::NotFound(_) => "NOT_FOUND",
            Error::InvalidCredential(_) => "INVALID_CREDENTIAL",
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::CheckOutBeforeCheckIn { .. } => "CHECK_OUT_BEFORE_CHECK_IN",
            Error::Conflict(_) => "CONFLICT",
            Error::Database(_) | Error::Sqlx(_) => "DATABASE_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::Parse(_) => StatusCode::BAD_REQUEST,
            Error::StudentNotFound(_) | Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidCredential(_) | Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::CheckOutBeforeCheckIn { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Database(_)
            | Error::Sqlx(_)
            | Error::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map a duplicate-key failure to `Conflict`, leave everything else as SQLx
    pub(crate) fn from_insert(e: sqlx::Error, what: &str) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict(format!("{} already exists", what))
            }
            _ => Error::Sqlx(e),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_code = self.code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request error"
            );
        } else {
            tracing::warn!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request rejected"
            );
        }

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
