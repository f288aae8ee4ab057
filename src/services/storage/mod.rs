//! Object-store adapters.
//!
//! Each supported backend implements [`StorageAdapter`]. The closed
//! [`Backend`] enum picks the variant from configuration and dispatches to it,
//! so an unsupported backend is a configuration error rather than a silent
//! fallback to some other storage.

pub mod client;
pub mod minio;
pub mod s3;
pub mod sigv4;

use crate::{
    models::transfer::TransferredParts,
    services::sizes::PartLimits,
};
use std::{fmt, future::Future, str::FromStr, time::Duration};
use thiserror::Error;

pub use minio::MinioAdapter;
pub use s3::S3Adapter;

/// Lifetime of URLs handed to clients. Large uploads can take days.
pub const CLIENT_URL_EXPIRY: Duration = sigv4::MAX_EXPIRY;

/// Lifetime of URLs the server signs for its own calls.
pub const SERVER_URL_EXPIRY: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request to object store failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("object store responded with status {status} ({code}): {message}")]
    Status {
        status: u16,
        code: String,
        message: String,
    },
    #[error("unexpected object store response: {0}")]
    MalformedResponse(String),
    #[error("object `{key}` not found")]
    ObjectNotFound { key: String },
}

#[derive(Debug, Error)]
pub enum StorageConfigError {
    #[error(
        "unsupported storage backend `{0}`; direct uploads require an S3-compatible backend (`s3` or `minio`)"
    )]
    UnsupportedStorage(String),
    #[error("invalid storage endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("storage backend `{0}` requires an endpoint")]
    MissingEndpoint(BackendKind),
    #[error("storage bucket name is empty")]
    MissingBucket,
    #[error("failed to build HTTP client for object store: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    S3,
    Minio,
}

impl FromStr for BackendKind {
    type Err = StorageConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "s3" | "aws" => Ok(Self::S3),
            "minio" => Ok(Self::Minio),
            other => Err(StorageConfigError::UnsupportedStorage(other.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S3 => f.write_str("s3"),
            Self::Minio => f.write_str("minio"),
        }
    }
}

/// Connection settings for one storage target.
#[derive(Clone)]
pub struct StorageConfig {
    pub backend: BackendKind,
    pub bucket: String,
    pub region: Option<String>,

    /// Endpoint used by the server. Required for MinIO; optional for S3.
    pub endpoint: Option<String>,

    /// Endpoint embedded in URLs given to browsers, when it differs from `endpoint`.
    pub public_endpoint: Option<String>,

    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,

    /// Canned ACL applied to new objects (S3 only).
    pub acl: Option<String>,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("backend", &self.backend)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("public_endpoint", &self.public_endpoint)
            .field("access_key", &self.access_key)
            .field("acl", &self.acl)
            .finish_non_exhaustive()
    }
}

/// Capabilities the multipart facade needs from an object store.
///
/// Pre-signing is local computation and cannot fail; the async methods talk
/// to the store.
pub trait StorageAdapter: Send + Sync {
    /// Multipart bounds enforced by this backend.
    fn limits(&self) -> PartLimits;

    /// Open a multipart session; the finished object is served with `content_type`.
    fn create_upload_session(
        &self,
        object_key: &str,
        content_type: &str,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    fn abort_upload_session(
        &self,
        object_key: &str,
        upload_id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// URL the client PUTs the bytes of one part to.
    fn presign_part_url(
        &self,
        object_key: &str,
        upload_id: &str,
        part_number: u32,
        part_size: u64,
    ) -> String;

    /// URL the client POSTs the completion body to.
    fn presign_completion_url(&self, transferred_parts: &TransferredParts) -> String;

    /// `CompleteMultipartUpload` document for `transferred_parts`.
    fn build_completion_body(&self, transferred_parts: &TransferredParts) -> String {
        completion_body(transferred_parts)
    }

    /// Size of a stored object; [`StoreError::ObjectNotFound`] when absent.
    fn get_object_size(
        &self,
        object_key: &str,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// A copy of this adapter tuned for health probes: short connect timeout, no retries.
    fn probing(&self) -> Self
    where
        Self: Sized;
}

/// The configured storage backend.
#[derive(Debug, Clone)]
pub enum Backend {
    S3(S3Adapter),
    Minio(MinioAdapter),
}

impl Backend {
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageConfigError> {
        if config.bucket.trim().is_empty() {
            return Err(StorageConfigError::MissingBucket);
        }
        match config.backend {
            BackendKind::S3 => Ok(Self::S3(S3Adapter::new(config)?)),
            BackendKind::Minio => Ok(Self::Minio(MinioAdapter::new(config)?)),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::S3(_) => BackendKind::S3,
            Self::Minio(_) => BackendKind::Minio,
        }
    }

    pub fn bucket(&self) -> &str {
        match self {
            Self::S3(adapter) => adapter.bucket(),
            Self::Minio(adapter) => adapter.bucket(),
        }
    }
}

impl StorageAdapter for Backend {
    fn limits(&self) -> PartLimits {
        match self {
            Self::S3(adapter) => adapter.limits(),
            Self::Minio(adapter) => adapter.limits(),
        }
    }

    async fn create_upload_session(
        &self,
        object_key: &str,
        content_type: &str,
    ) -> Result<String, StoreError> {
        match self {
            Self::S3(adapter) => adapter.create_upload_session(object_key, content_type).await,
            Self::Minio(adapter) => adapter.create_upload_session(object_key, content_type).await,
        }
    }

    async fn abort_upload_session(&self, object_key: &str, upload_id: &str) -> Result<(), StoreError> {
        match self {
            Self::S3(adapter) => adapter.abort_upload_session(object_key, upload_id).await,
            Self::Minio(adapter) => adapter.abort_upload_session(object_key, upload_id).await,
        }
    }

    fn presign_part_url(
        &self,
        object_key: &str,
        upload_id: &str,
        part_number: u32,
        part_size: u64,
    ) -> String {
        match self {
            Self::S3(adapter) => {
                adapter.presign_part_url(object_key, upload_id, part_number, part_size)
            }
            Self::Minio(adapter) => {
                adapter.presign_part_url(object_key, upload_id, part_number, part_size)
            }
        }
    }

    fn presign_completion_url(&self, transferred_parts: &TransferredParts) -> String {
        match self {
            Self::S3(adapter) => adapter.presign_completion_url(transferred_parts),
            Self::Minio(adapter) => adapter.presign_completion_url(transferred_parts),
        }
    }

    fn build_completion_body(&self, transferred_parts: &TransferredParts) -> String {
        match self {
            Self::S3(adapter) => adapter.build_completion_body(transferred_parts),
            Self::Minio(adapter) => adapter.build_completion_body(transferred_parts),
        }
    }

    async fn get_object_size(&self, object_key: &str) -> Result<u64, StoreError> {
        match self {
            Self::S3(adapter) => adapter.get_object_size(object_key).await,
            Self::Minio(adapter) => adapter.get_object_size(object_key).await,
        }
    }

    fn probing(&self) -> Self {
        match self {
            Self::S3(adapter) => Self::S3(adapter.probing()),
            Self::Minio(adapter) => Self::Minio(adapter.probing()),
        }
    }
}

/// Build the body of a `CompleteMultipartUpload` request.
///
/// Parts are listed in ascending part-number order regardless of input order.
/// See <https://docs.aws.amazon.com/AmazonS3/latest/API/API_CompleteMultipartUpload.html>
pub fn completion_body(transferred_parts: &TransferredParts) -> String {
    let mut parts: Vec<_> = transferred_parts.parts.iter().collect();
    parts.sort_by_key(|part| part.part_number);

    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><CompleteMultipartUpload xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#,
    );
    for part in parts {
        xml.push_str("<Part>");
        xml.push_str(&format!("<PartNumber>{}</PartNumber>", part.part_number));
        xml.push_str(&format!("<ETag>{}</ETag>", xml_escape(&part.etag)));
        xml.push_str("</Part>");
    }
    xml.push_str("</CompleteMultipartUpload>");
    xml
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
