//! Direct-to-object-store multipart uploads.
//!
//! Browsers upload file bytes straight to an S3-compatible store through
//! pre-signed URLs. This service decides object keys, opens and completes
//! multipart sessions on the client's behalf and mints a signed field value
//! once the object exists. It stores no upload state of its own.

pub mod client;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

pub use services::upload_service::UploadService;
