//! Token probe used by the admin UI before showing protected pages.

use crate::{
    middleware::verify_token,
    models::api::{ApiResponse, CheckTokenReq},
    state::AppState,
};
use axum::{Json, extract::State, extract::rejection::JsonRejection};

/// `POST /checkToken`
///
/// Always answers with a success envelope; `data` says whether the token
/// matches the configured secret. An unreadable body counts as no token.
pub async fn check_token(
    State(state): State<AppState>,
    body: Result<Json<CheckTokenReq>, JsonRejection>,
) -> Json<ApiResponse<bool>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let token = req.token.as_deref().map(str::trim).filter(|t| !t.is_empty());
    let valid = verify_token(state.auth_token.as_deref(), token).is_ok();
    Json(ApiResponse::ok(valid))
}
