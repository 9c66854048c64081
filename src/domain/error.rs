//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;

/// Domain-specific errors
///
/// These errors represent business rule violations and domain invariant
/// failures. They are independent of the web/infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Invalid amount (zero, negative, or exceeds limit)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Override requested without a reason
    #[error("Override requires a non-empty reason")]
    MissingOverrideReason,

    /// Customer not found
    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    /// Unauthorized operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Invariant violation detected and recovered (e.g. over-release)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Duplicate operation (idempotency)
    #[error("Duplicate operation: {key}")]
    DuplicateOperation { key: String },
}

impl DomainError {
    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAmount(_)
                | Self::MissingOverrideReason
                | Self::Unauthorized(_)
        )
    }

    /// Check if this is a conflict error (retry may help)
    pub fn is_conflict_error(&self) -> bool {
        matches!(self, Self::DuplicateOperation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_amount_error() {
        let err = DomainError::InvalidAmount("must be positive".to_string());

        assert!(err.is_client_error());
        assert!(!err.is_conflict_error());
        assert!(err.to_string().contains("must be positive"));
    }

    #[test]
    fn test_missing_override_reason() {
        let err = DomainError::MissingOverrideReason;

        assert!(err.is_client_error());
        assert!(err.to_string().contains("reason"));
    }

    #[test]
    fn test_duplicate_operation_error() {
        let err = DomainError::DuplicateOperation {
            key: "abc".to_string(),
        };

        assert!(!err.is_client_error());
        assert!(err.is_conflict_error());
    }
}
