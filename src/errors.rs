use crate::{
    models::api::ValidationErrors,
    services::{multipart::UploadError, upload_service::ServiceError},
};
use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::error;

/// Error returned by HTTP handlers.
///
/// Serialized as `{"error": message, "status": code}`, plus a `fields` map
/// of per-field messages when the request failed validation.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub fields: Option<ValidationErrors>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            fields: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// 400 carrying field-level messages.
    pub fn validation(fields: ValidationErrors) -> Self {
        Self {
            fields: Some(fields),
            ..Self::bad_request("Invalid request.")
        }
    }

    /// Opaque 500. The cause is logged here and never sent to the client.
    pub fn internal(cause: impl fmt::Display) -> Self {
        error!("internal error: {}", cause);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
            "status": self.status.as_u16()
        });
        if let Some(fields) = self.fields {
            body["fields"] = json!(fields);
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<ValidationErrors> for AppError {
    fn from(fields: ValidationErrors) -> Self {
        AppError::validation(fields)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::bad_request(rejection.body_text())
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(fields) => AppError::validation(fields),
            ServiceError::InvalidSignature(_) => AppError::validation(ValidationErrors::single(
                "upload_signature",
                "Invalid upload signature.",
            )),
            ServiceError::Mint(err) => AppError::internal(err),
            ServiceError::Upload(UploadError::UploadTooLarge(_)) => {
                AppError::bad_request("Upload size is too large.")
            }
            ServiceError::Upload(UploadError::ObjectNotFound { .. }) => {
                AppError::bad_request("Object not found")
            }
            ServiceError::Upload(err @ UploadError::SelfTestFailed(_)) => {
                error!("{}", err);
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "Storage unavailable")
            }
            ServiceError::Upload(UploadError::Store(err)) => AppError::internal(err),
        }
    }
}
