pub mod auth_handlers;
pub mod health_handlers;
pub mod object_handlers;

use crate::errors::AppError;
use axum::{Json, extract::rejection::JsonRejection};

/// Unwrap a JSON body, turning extractor rejections into validation errors
/// so they share the response envelope.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(inner)| inner)
        .map_err(|rejection| AppError::validation(rejection.body_text()))
}
