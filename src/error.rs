/// Unified error types for the account coordinator
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for every core operation
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Missing, malformed or expired credentials
    #[error("Authentication failed: {0}")]
    Unauthenticated(String),

    /// Well-formed credentials that do not grant access
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Duplicate email on creation or update
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Account, preference or device-token lookup miss
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed platform value, missing registration fields, bad paging
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unexpected failure that must not leak to callers
    #[error("Internal error: {0}")]
    Internal(String),

    /// Persistent store errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Invalid process configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Stable error classification for calling layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Unauthenticated,
    Unauthorized,
    Conflict,
    NotFound,
    InvalidArgument,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthenticated => "Unauthenticated",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::Internal => "Internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ServiceError {
    /// Classify this error into one of the stable kinds
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            ServiceError::Unauthorized(_) => ErrorKind::Unauthorized,
            ServiceError::Conflict(_) => ErrorKind::Conflict,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ServiceError::Internal(_)
            | ServiceError::Database(_)
            | ServiceError::Configuration(_) => ErrorKind::Internal,
        }
    }

    /// True when a store error is a unique-constraint violation
    pub fn is_unique_violation(&self) -> bool {
        match self {
            ServiceError::Database(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
            _ => false,
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub message: String,
}

/// Convert ServiceError to HTTP response
impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let message = match kind {
            // Don't leak storage details
            ErrorKind::Internal => {
                tracing::error!(error = %self, "internal error surfaced to caller");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let body = Json(ErrorResponse {
            success: false,
            error: kind.as_str().to_string(),
            message,
        });

        (kind.status_code(), body).into_response()
    }
}

/// Result type alias for coordinator operations
pub type ServiceResult<T> = Result<T, ServiceError>;
