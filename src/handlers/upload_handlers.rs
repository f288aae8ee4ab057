//! HTTP handlers for the three upload steps.
//!
//! Handlers only map JSON to and from the service. Bodies are taken as
//! `Result<Json<_>, JsonRejection>` so malformed JSON yields our 400 body
//! rather than axum's plain-text rejection.

use crate::{
    errors::AppError,
    models::api::{
        CompleteUploadRequest, CompleteUploadResponse, FinalizeRequest, FinalizeResponse,
        InitializeUploadRequest, InitializeUploadResponse,
    },
    services::upload_service::UploadService,
};
use axum::{Json, extract::State, extract::rejection::JsonRejection};
use tracing::debug;

/// `POST /upload-initialize`
pub async fn upload_initialize(
    State(service): State<UploadService>,
    payload: Result<Json<InitializeUploadRequest>, JsonRejection>,
) -> Result<Json<InitializeUploadResponse>, AppError> {
    let Json(request) = payload?;
    let request = request.validate()?;
    debug!(field_id = %request.field_id, file_size = request.file_size, "initializing upload");

    Ok(Json(service.initialize(request).await?))
}

/// `POST /upload-complete`
pub async fn upload_complete(
    State(service): State<UploadService>,
    payload: Result<Json<CompleteUploadRequest>, JsonRejection>,
) -> Result<Json<CompleteUploadResponse>, AppError> {
    let Json(request) = payload?;
    let request = request.validate()?;
    debug!(upload_id = %request.upload_id, parts = request.parts.len(), "completing upload");

    Ok(Json(service.complete(request)?))
}

/// `POST /finalize`
pub async fn finalize(
    State(service): State<UploadService>,
    payload: Result<Json<FinalizeRequest>, JsonRejection>,
) -> Result<Json<FinalizeResponse>, AppError> {
    let Json(request) = payload?;
    let upload_signature = request.validate()?;

    Ok(Json(service.finalize(&upload_signature).await?))
}
