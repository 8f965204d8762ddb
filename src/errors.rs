use crate::{
    models::api::ApiResponse,
    services::storage_service::StorageError,
};
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::time::Duration;
use thiserror::Error;

/// Every failure a handler can report. Each kind has its own envelope code.
#[derive(Debug, Error)]
pub enum AppError {
    /// No `Authorization` header.
    #[error("not authenticated")]
    NotAuthenticated,
    /// Token present but wrong.
    #[error("auth failed")]
    AuthFailed,
    /// The server has no token configured.
    #[error("system not configured for authentication")]
    SystemMisconfigured,
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("too many requests")]
    RateLimited { retry_after: Duration },
    #[error("store error: {0}")]
    Store(StorageError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Envelope `code`; `0` is reserved for success.
    pub fn code(&self) -> i32 {
        match self {
            AppError::NotAuthenticated => 1001,
            AppError::AuthFailed => 1002,
            AppError::SystemMisconfigured => 1003,
            AppError::Validation(_) => 1004,
            AppError::NotFound(_) => 1005,
            AppError::RateLimited { .. } => 1006,
            AppError::Store(_) => 1007,
            AppError::Internal(_) => 1008,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotAuthenticated | AppError::AuthFailed => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::SystemMisconfigured | AppError::Store(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ObjectNotFound(key) => AppError::NotFound(format!("object `{}` not found", key)),
            err @ (StorageError::InvalidObjectKey(_)
            | StorageError::InvalidCursor
            | StorageError::LengthMismatch { .. }) => AppError::Validation(err.to_string()),
            other => AppError::Store(other),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            tracing::error!(code = self.code(), "{}", self);
        }

        let body = Json(ApiResponse::<()> {
            code: self.code(),
            message: self.to_string(),
            data: None,
        });
        let mut response = (self.status(), body).into_response();

        if let AppError::RateLimited { retry_after } = &self {
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
