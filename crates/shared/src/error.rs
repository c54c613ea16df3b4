//! Application-wide error types.
//!
//! Every failure that leaves the service is rendered as a structured
//! `{ "error": code, "message": text }` body. `error_code` is the stable part
//! clients match on.

use thiserror::Error;

/// Application error types.
#[derive(Debug, Error)]
pub enum AppError {
    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// Access denied.
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// User-correctable input problem (illegal name, extension, size).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage reservation refused.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Conflict (e.g., duplicate entry).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Some members of a batch operation failed.
    #[error("Partially failed: {0}")]
    PartialFailure(String),

    /// The client went away before the operation finished.
    #[error("Canceled by client: {0}")]
    ClientCanceled(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Storage backend or other external service error.
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::Conflict(_) => 409,
            Self::PartialFailure(_) => 207,
            Self::ClientCanceled(_) => 499,
            Self::QuotaExceeded(_) => 507,
            Self::ExternalService(_) => 502,
            Self::Database(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::QuotaExceeded(_) => "QUOTA_EXCEEDED",
            Self::Conflict(_) => "CONFLICT",
            Self::PartialFailure(_) => "PARTIAL_FAILURE",
            Self::ClientCanceled(_) => "CLIENT_CANCELED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(AppError::Unauthorized(String::new()), 401, "UNAUTHORIZED")]
    #[case(AppError::Forbidden(String::new()), 403, "FORBIDDEN")]
    #[case(AppError::NotFound(String::new()), 404, "NOT_FOUND")]
    #[case(AppError::Validation(String::new()), 400, "VALIDATION_ERROR")]
    #[case(AppError::QuotaExceeded(String::new()), 507, "QUOTA_EXCEEDED")]
    #[case(AppError::Conflict(String::new()), 409, "CONFLICT")]
    #[case(AppError::PartialFailure(String::new()), 207, "PARTIAL_FAILURE")]
    #[case(AppError::ClientCanceled(String::new()), 499, "CLIENT_CANCELED")]
    #[case(AppError::Database(String::new()), 500, "DATABASE_ERROR")]
    #[case(AppError::ExternalService(String::new()), 502, "EXTERNAL_SERVICE_ERROR")]
    #[case(AppError::Internal(String::new()), 500, "INTERNAL_ERROR")]
    fn test_status_and_code(#[case] err: AppError, #[case] status: u16, #[case] code: &str) {
        assert_eq!(err.status_code(), status);
        assert_eq!(err.error_code(), code);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            AppError::QuotaExceeded("msg".into()).to_string(),
            "Quota exceeded: msg"
        );
        assert_eq!(
            AppError::PartialFailure("2 objects failed".into()).to_string(),
            "Partially failed: 2 objects failed"
        );
        assert_eq!(
            AppError::Validation("msg".into()).to_string(),
            "Validation error: msg"
        );
    }
}
