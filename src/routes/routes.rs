//! Routes of the direct-upload API.
//!
//! - `POST /upload-initialize`: open a multipart session, return part URLs
//! - `POST /upload-complete`: pre-sign the store's completion call
//! - `POST /finalize`: confirm the object and mint a field value
//! - `GET  /healthz`, `GET /readyz`
//!
//! Paths are relative; embedders may `nest` the router under any prefix.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{finalize, upload_complete, upload_initialize},
    },
    services::upload_service::UploadService,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router. State is supplied by the caller with `with_state`.
pub fn routes() -> Router<UploadService> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/upload-initialize", post(upload_initialize))
        .route("/upload-complete", post(upload_complete))
        .route("/finalize", post(finalize))
}
