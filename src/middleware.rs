//! Request gates: the shared-secret check and client identification for rate
//! limiting.

use crate::{errors::AppError, state::AppState};
use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use std::{convert::Infallible, net::SocketAddr};

/// Extract the token from an `Authorization` header, accepting either the
/// bare token or `Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    (!token.is_empty()).then_some(token)
}

/// Compare a presented token with the configured secret.
///
/// A missing token is reported before a missing secret, so unauthenticated
/// callers learn nothing about server configuration.
pub fn verify_token(expected: Option<&str>, provided: Option<&str>) -> Result<(), AppError> {
    let provided = provided.ok_or(AppError::NotAuthenticated)?;
    let expected = expected.ok_or(AppError::SystemMisconfigured)?;
    if provided != expected {
        return Err(AppError::AuthFailed);
    }
    Ok(())
}

/// Middleware for routes that require the shared secret.
pub async fn require_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let outcome = verify_token(state.auth_token.as_deref(), bearer_token(req.headers()));
    if let Err(err) = &outcome {
        tracing::info!(path = %req.uri().path(), "rejected request: {}", err);
    }
    outcome?;
    Ok(next.run(req).await)
}

/// Who a request is charged to for rate limiting.
///
/// Taken from `cf-connecting-ip`, then the first `x-forwarded-for` hop, then
/// the peer address; `unknown` when none is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header_value = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let identity = header_value("cf-connecting-ip")
            .or_else(|| {
                header_value("x-forwarded-for")
                    .and_then(|v| v.split(',').next().map(|hop| hop.trim().to_string()))
                    .filter(|hop| !hop.is_empty())
            })
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());

        Ok(ClientIdentity(identity))
    }
}
