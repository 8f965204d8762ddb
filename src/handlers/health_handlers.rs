//! Liveness and readiness probes, mounted outside the `/rest` prefix.
//!
//! - GET /healthz  -> process is up
//! - GET /readyz   -> metadata database answers and the payload directory is writable

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<Result<(), String>> for CheckStatus {
    fn from(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self { ok: true, error: None },
            Err(error) => Self {
                ok: false,
                error: Some(error),
            },
        }
    }
}

/// `GET /healthz`: never touches storage.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`: 200 when every check passes, 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let metadata = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM objects")
        .fetch_one(&*state.storage.db)
        .await
        .map(|_| ())
        .map_err(|e| format!("metadata query failed: {}", e));
    let payloads = probe_disk(&state.storage.base_path).await;

    let mut checks = BTreeMap::new();
    checks.insert("metadata", CheckStatus::from(metadata));
    checks.insert("payloads", CheckStatus::from(payloads));

    let ready = checks.values().all(|c| c.ok);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if ready { "ok" } else { "error" },
        checks,
    };
    (status, Json(body))
}

/// Write, read back and remove a scratch file under `base`.
async fn probe_disk(base: &Path) -> Result<(), String> {
    fs::create_dir_all(base)
        .await
        .map_err(|e| format!("could not create {}: {}", base.display(), e))?;
    let probe = base.join(format!(".readyz-{}", Uuid::new_v4()));
    fs::write(&probe, b"readyz")
        .await
        .map_err(|e| format!("could not write probe: {}", e))?;
    let read_back = fs::read(&probe).await;
    let _ = fs::remove_file(&probe).await;
    match read_back {
        Ok(bytes) if bytes == b"readyz" => Ok(()),
        Ok(_) => Err("probe content mismatch".into()),
        Err(e) => Err(format!("could not read probe: {}", e)),
    }
}
