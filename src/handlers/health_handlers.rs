//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that runs the storage self-test

use crate::services::upload_service::UploadService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::error;

/// `GET /healthz`
///
/// Always 200; performs no I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Opens and aborts a multipart upload against every configured storage
/// target. HTTP 200 when all succeed, HTTP 503 when any fails. Store error
/// details are logged, not returned.
pub async fn readyz(State(service): State<UploadService>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    for check in service.check_storages().await {
        let status = match check.result {
            Ok(()) => CheckStatus {
                ok: true,
                error: None,
            },
            Err(err) => {
                error!(storage = %check.storage, "readiness check failed: {}", err);
                CheckStatus {
                    ok: false,
                    error: Some("storage self-test failed".into()),
                }
            }
        };
        checks.insert(check.storage, status);
    }

    let overall_ok = checks.values().all(|check| check.ok);
    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: BTreeMap<String, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
