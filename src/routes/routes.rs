//! Route table for the gateway.
//!
//! ## Structure (API mounted under `/rest`)
//! - **Public**
//!   - `POST   /checkToken`: does a token match the configured secret
//!   - `POST   /upload`    : multipart batch upload, rate limited per client and globally
//!   - `GET    /{*key}`    : object bytes with Range / conditional support
//!
//! - **Token required**
//!   - `POST   /list`      : paginated listing
//!   - `POST   /folder`    : create a folder marker
//!   - `DELETE /`          : delete comma separated keys (`/rest` and `/rest/`)
//!   - `GET    /del/{*key}`: delete one key
//!
//! Probes `GET /healthz` and `GET /readyz` sit at the root. Anything else gets
//! a not-found envelope.

use crate::{
    errors::AppError,
    handlers::{
        auth_handlers::check_token,
        health_handlers::{healthz, readyz},
        object_handlers::{
            create_folder, delete_image, delete_images, get_image, list_images, upload_images,
        },
    },
    middleware::require_token,
    state::{AppState, REST_PREFIX},
};
use axum::{
    Router,
    middleware,
    routing::{delete, get, post},
};

/// Build the full application router with its state attached.
pub fn app(state: AppState) -> Router {
    routes(state.clone()).with_state(state)
}

/// Build the router; `state` is needed up front for the auth middleware.
pub fn routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/list", post(list_images))
        .route("/folder", post(create_folder))
        .route("/", delete(delete_images))
        .route("/del/{*key}", get(delete_image))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    let public = Router::new()
        .route("/checkToken", post(check_token))
        .route("/upload", post(upload_images))
        .route("/{*key}", get(get_image));

    // A nested `/` only answers on `/rest`; the trailing-slash form is
    // registered on the outer router.
    let delete_root = delete(delete_images)
        .route_layer(middleware::from_fn_with_state(state, require_token));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(&format!("{}/", REST_PREFIX), delete_root)
        .nest(REST_PREFIX, protected.merge(public))
        .fallback(route_not_found)
}

async fn route_not_found() -> AppError {
    AppError::NotFound("route not found".into())
}
