//! Conversion of core failures into HTTP responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use stratus_core::aria2::Aria2Error;
use stratus_core::filesystem::{ErrorKind, FsError};
use stratus_core::repository::RepoError;
use stratus_core::task::TaskError;
use stratus_shared::AppError;

/// Handler error rendered as `{"error": code, "message": text}`.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl ApiError {
    /// Rejects malformed client input.
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self(AppError::Validation(msg.into()))
    }

    /// Refuses an unauthenticated request.
    #[must_use]
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self(AppError::Unauthorized(msg.into()))
    }

    /// Status code of the response.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::validation(err.to_string())
    }
}

impl From<FsError> for ApiError {
    fn from(err: FsError) -> Self {
        let msg = err.to_string();
        Self(match err.kind() {
            ErrorKind::Validation => AppError::Validation(msg),
            ErrorKind::QuotaExceeded => AppError::QuotaExceeded(msg),
            ErrorKind::Backend => AppError::ExternalService(msg),
            ErrorKind::Persistence => AppError::Database(msg),
            ErrorKind::PartialFailure => AppError::PartialFailure(msg),
            ErrorKind::ClientCanceled => AppError::ClientCanceled(msg),
            ErrorKind::NotFound => AppError::NotFound(msg),
            ErrorKind::Conflict => AppError::Conflict(msg),
            ErrorKind::Internal => AppError::Internal(msg),
        })
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        let msg = err.to_string();
        Self(match err {
            RepoError::NotFound(_) => AppError::NotFound(msg),
            RepoError::Conflict(_) => AppError::Conflict(msg),
            RepoError::Database(_) => AppError::Database(msg),
        })
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Persistence(e) => e.into(),
            other => Self(AppError::Internal(other.to_string())),
        }
    }
}

impl From<Aria2Error> for ApiError {
    fn from(err: Aria2Error) -> Self {
        match err {
            Aria2Error::NotEnabled => Self(AppError::Forbidden(err.to_string())),
            Aria2Error::DstNotExist => Self(AppError::NotFound(err.to_string())),
            Aria2Error::Config(_) => Self(AppError::Internal(err.to_string())),
            Aria2Error::Transport(_) | Aria2Error::Rpc { .. } | Aria2Error::Decode(_) => {
                Self(AppError::ExternalService(err.to_string()))
            }
            Aria2Error::Persistence(e) => e.into(),
            Aria2Error::Task(e) => e.into(),
            Aria2Error::Fs(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request rejected");
        }
        (
            status,
            Json(json!({
                "error": self.0.error_code(),
                "message": self.0.to_string(),
            })),
        )
            .into_response()
    }
}
