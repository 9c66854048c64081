//! Error handling module
//!
//! Centralized error types and HTTP response conversion.
//!
//! A blocked reservation is deliberately absent here: it is a business
//! outcome returned as a structured `CreditDecision`, never an error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Customer already exists: {0}")]
    CustomerAlreadyExists(String),

    #[error("Idempotency conflict: same key with different request")]
    IdempotencyConflict,

    #[error("Request with this idempotency key is already in progress")]
    IdempotencyInProgress,

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] crate::domain::DomainError),

    // Server errors (5xx)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl From<crate::customer::CustomerError> for AppError {
    fn from(err: crate::customer::CustomerError) -> Self {
        use crate::customer::CustomerError;
        match err {
            CustomerError::NotFound(id) => AppError::CustomerNotFound(id.to_string()),
            CustomerError::AlreadyExists(id) => AppError::CustomerAlreadyExists(id.to_string()),
            CustomerError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<crate::credit::CreditEngineError> for AppError {
    fn from(err: crate::credit::CreditEngineError) -> Self {
        use crate::credit::CreditEngineError;
        match err {
            CreditEngineError::CustomerNotFound(id) => AppError::CustomerNotFound(id.to_string()),
            CreditEngineError::Domain(e) => AppError::Domain(e),
            CreditEngineError::Database(e) => AppError::Database(e),
            CreditEngineError::Customer(e) => e.into(),
            CreditEngineError::Journal(crate::journal::JournalError::Database(e)) => {
                AppError::Database(e)
            }
            CreditEngineError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<crate::idempotency::IdempotencyError> for AppError {
    fn from(err: crate::idempotency::IdempotencyError) -> Self {
        use crate::idempotency::IdempotencyError;
        match err {
            IdempotencyError::KeyInProgress => AppError::IdempotencyInProgress,
            IdempotencyError::HashMismatch(_) => AppError::IdempotencyConflict,
            IdempotencyError::Database(e) => AppError::Database(e),
            IdempotencyError::NotFound(key) => {
                AppError::Internal(format!("idempotency record vanished: {}", key))
            }
        }
    }
}

impl From<crate::journal::JournalError> for AppError {
    fn from(err: crate::journal::JournalError) -> Self {
        match err {
            crate::journal::JournalError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<crate::reconcile::ReconcileError> for AppError {
    fn from(err: crate::reconcile::ReconcileError) -> Self {
        use crate::reconcile::ReconcileError;
        match err {
            ReconcileError::CustomerNotFound(id) => AppError::CustomerNotFound(id.to_string()),
            ReconcileError::Database(e) => AppError::Database(e),
            ReconcileError::Customer(e) => e.into(),
            ReconcileError::Journal(e) => e.into(),
        }
    }
}

impl From<crate::audit::AuditError> for AppError {
    fn from(err: crate::audit::AuditError) -> Self {
        match err {
            crate::audit::AuditError::Database(e) => AppError::Database(e),
            crate::audit::AuditError::Serialization(e) => AppError::Internal(e.to_string()),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::MissingHeader(header) => {
                (StatusCode::BAD_REQUEST, "missing_header", Some(header.clone()))
            }

            // 401 Unauthorized
            AppError::InvalidApiKey => {
                (StatusCode::UNAUTHORIZED, "invalid_api_key", None)
            }

            // 403 Forbidden
            AppError::PermissionDenied => {
                (StatusCode::FORBIDDEN, "permission_denied", None)
            }
            AppError::Forbidden(msg) => {
                (StatusCode::FORBIDDEN, "forbidden", Some(msg.clone()))
            }

            // 404 Not Found
            AppError::CustomerNotFound(id) => {
                (StatusCode::NOT_FOUND, "customer_not_found", Some(id.clone()))
            }

            // 409 Conflict
            AppError::CustomerAlreadyExists(id) => {
                (StatusCode::CONFLICT, "customer_already_exists", Some(id.clone()))
            }
            AppError::IdempotencyConflict => {
                (StatusCode::CONFLICT, "idempotency_conflict", None)
            }
            AppError::IdempotencyInProgress => {
                (StatusCode::CONFLICT, "idempotency_in_progress", None)
            }

            // 429 Too Many Requests
            AppError::RateLimitExceeded => {
                (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded", None)
            }

            // Domain errors - map to appropriate HTTP status
            AppError::Domain(ref domain_err) => {
                use crate::domain::DomainError;
                match domain_err {
                    DomainError::InvalidAmount(msg) => {
                        (StatusCode::BAD_REQUEST, "invalid_amount", Some(msg.clone()))
                    }
                    DomainError::MissingOverrideReason => {
                        (StatusCode::BAD_REQUEST, "missing_override_reason", None)
                    }
                    DomainError::CustomerNotFound(id) => {
                        (StatusCode::NOT_FOUND, "customer_not_found", Some(id.clone()))
                    }
                    DomainError::Unauthorized(msg) => {
                        (StatusCode::FORBIDDEN, "unauthorized", Some(msg.clone()))
                    }
                    DomainError::InvariantViolation(msg) => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", Some(msg.clone()))
                    }
                    DomainError::DuplicateOperation { key } => {
                        (StatusCode::CONFLICT, "duplicate_operation", Some(key.clone()))
                    }
                }
            }

            // 500 Internal Server Error
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
