//! HTTP handlers for image objects.
//! Uploads are streamed field by field into the store and downloads are
//! streamed back out; nothing is buffered whole in memory.

use crate::{
    errors::AppError,
    handlers::json_body,
    middleware::ClientIdentity,
    models::{
        api::{
            ApiResponse, DeleteReq, DeleteResult, FolderReq, ListPageResponse, ListReq,
            UploadResult,
        },
        object::StoredObject,
    },
    range::parse_range,
    services::{
        rate_limiter::Decision,
        storage_service::{Conditions, GetOptions, GetOutcome},
        upload_service::UploadItem,
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, State, multipart::MultipartRejection, rejection::JsonRejection,
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use std::io;
use tokio_util::io::ReaderStream;

/// Multipart field carrying upload files; may repeat.
const FILES_FIELD: &str = "files";

/// `POST /upload`: store every `files` part; partial success is normal.
pub async fn upload_images(
    State(state): State<AppState>,
    ClientIdentity(client): ClientIdentity,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ApiResponse<UploadResult>>, AppError> {
    // Per client first, so a client over its own limit never touches the
    // global window. A global denial still counts against the client.
    for limiter in [&state.upload_limiter, &state.global_limiter] {
        if let Decision::Denied { retry_after } = limiter.check(&client).await {
            tracing::info!(%client, "upload rate limited");
            return Err(AppError::RateLimited { retry_after });
        }
    }

    let mut multipart = multipart.map_err(|err| AppError::validation(err.body_text()))?;
    let mut result = UploadResult::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                // The rest of the body cannot be parsed; keep what was stored.
                result.errors.push(format!("malformed multipart body: {}", err));
                break;
            }
        };
        if field.name() != Some(FILES_FIELD) {
            continue;
        }

        let item = UploadItem {
            content_type: field.content_type().map(str::to_string),
            filename: field.file_name().map(str::to_string),
            size: None,
            body: field.map(|chunk| chunk.map_err(io::Error::other)),
        };
        result.record(state.uploads.store_one(item).await);
    }

    tracing::info!(
        %client,
        accepted = result.accepted.len(),
        rejected = result.errors.len(),
        "upload batch finished"
    );
    let message = result.errors.join(",");
    Ok(Json(ApiResponse::with_message(result, message)))
}

/// `POST /list`
pub async fn list_images(
    State(state): State<AppState>,
    body: Result<Json<ListReq>, JsonRejection>,
) -> Result<Json<ApiResponse<ListPageResponse>>, AppError> {
    let req = json_body(body)?;
    let page = state.listing.list(req).await?;
    Ok(Json(ApiResponse::ok(page)))
}

/// Folder names are letters and underscores only.
pub fn is_valid_folder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphabetic() || c == '_')
}

/// `POST /folder`: create the zero-length marker object `<name>/`.
pub async fn create_folder(
    State(state): State<AppState>,
    body: Result<Json<FolderReq>, JsonRejection>,
) -> Result<Json<ApiResponse<String>>, AppError> {
    let req = json_body(body)?;
    if !is_valid_folder_name(&req.name) {
        return Err(AppError::validation(format!(
            "folder name `{}` must contain only letters and underscores",
            req.name
        )));
    }

    let key = format!("{}/", req.name);
    state
        .storage
        .put_object_stream(&key, None, Some(0), stream::empty::<io::Result<Bytes>>())
        .await?;
    tracing::info!(%key, "created folder");
    Ok(Json(ApiResponse::ok(key)))
}

/// `DELETE /`: delete a comma separated list of keys. Each key is attempted;
/// failures are reported next to the successes.
pub async fn delete_images(
    State(state): State<AppState>,
    body: Result<Json<DeleteReq>, JsonRejection>,
) -> Result<Json<ApiResponse<DeleteResult>>, AppError> {
    let req = json_body(body)?;
    let keys: Vec<String> = req
        .keys
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect();
    if keys.is_empty() {
        return Err(AppError::validation("no keys to delete"));
    }

    let mut result = DeleteResult::default();
    for key in keys {
        match state.storage.delete_object(&key).await {
            Ok(existed) => {
                tracing::info!(%key, existed, "deleted object");
                result.deleted.push(key);
            }
            Err(err) => {
                tracing::warn!(%key, "delete failed: {}", err);
                result.errors.push(format!("{}: {}", key, err));
            }
        }
    }
    Ok(Json(ApiResponse::ok(result)))
}

/// `GET /del/{*key}`: delete one key. Missing keys count as deleted.
pub async fn delete_image(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ApiResponse<String>>, AppError> {
    let existed = state.storage.delete_object(&key).await?;
    tracing::info!(%key, existed, "deleted object");
    Ok(Json(ApiResponse::ok(key)))
}

/// `GET /{*key}`: stream an object, honoring `Range` and conditional headers.
///
/// 200 for the whole object, 206 when a range was honored, 304 when a
/// condition withheld the body.
pub async fn get_image(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let opts = GetOptions {
        range: parse_range(header_str(&headers, header::RANGE)),
        conditions: conditions_from_headers(&headers),
    };

    let outcome = state.storage.get_object(&key, &opts).await?;
    let response = match outcome {
        GetOutcome::NotModified(object) => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::NOT_MODIFIED;
            set_object_headers(response.headers_mut(), &object);
            response
        }
        GetOutcome::Body {
            object,
            range,
            reader,
        } => {
            let mut response = Response::new(Body::from_stream(ReaderStream::new(reader)));
            let headers = response.headers_mut();
            set_object_headers(headers, &object);
            let length = match range {
                Some(r) => {
                    if let Ok(value) = HeaderValue::from_str(&r.content_range()) {
                        headers.insert(header::CONTENT_RANGE, value);
                    }
                    r.len()
                }
                None => object.size(),
            };
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            *response.status_mut() = if range.is_some() {
                StatusCode::PARTIAL_CONTENT
            } else {
                StatusCode::OK
            };
            response
        }
    };
    Ok(response)
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn http_date(headers: &HeaderMap, name: header::HeaderName) -> Option<DateTime<Utc>> {
    header_str(headers, name)
        .and_then(|v| DateTime::parse_from_rfc2822(v.trim()).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn conditions_from_headers(headers: &HeaderMap) -> Conditions {
    Conditions {
        if_match: header_str(headers, header::IF_MATCH).map(str::to_string),
        if_none_match: header_str(headers, header::IF_NONE_MATCH).map(str::to_string),
        if_modified_since: http_date(headers, header::IF_MODIFIED_SINCE),
        if_unmodified_since: http_date(headers, header::IF_UNMODIFIED_SINCE),
    }
}

fn set_object_headers(headers: &mut HeaderMap, object: &StoredObject) {
    let content_type = object
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    if let Ok(value) = HeaderValue::from_str(&object.http_etag()) {
        headers.insert(header::ETAG, value);
    }

    let last_modified = object
        .last_modified
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
}
