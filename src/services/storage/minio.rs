//! MinIO adapter.
//!
//! MinIO is always addressed path-style against an explicit endpoint. A
//! separate public endpoint may be configured for URLs handed to browsers,
//! e.g. when MinIO is only reachable as `minio:9000` inside a container
//! network.

use super::{
    BackendKind, CLIENT_URL_EXPIRY, StorageAdapter, StorageConfig, StorageConfigError, StoreError,
    client::{Addressing, StoreClient, StoreSettings},
    sigv4::Credentials,
};
use crate::{models::transfer::TransferredParts, services::sizes::PartLimits};

/// MinIO ignores the region but SigV4 still needs one.
const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone)]
pub struct MinioAdapter {
    client: StoreClient,
}

impl MinioAdapter {
    pub fn new(config: &StorageConfig) -> Result<Self, StorageConfigError> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or(StorageConfigError::MissingEndpoint(BackendKind::Minio))?;
        let region = config
            .region
            .clone()
            .filter(|region| !region.is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let client = StoreClient::new(StoreSettings {
            bucket: config.bucket.clone(),
            region,
            endpoint,
            public_endpoint: config.public_endpoint.clone(),
            addressing: Addressing::Path,
            credentials: Credentials {
                access_key: config.access_key.clone(),
                secret_key: config.secret_key.clone(),
                session_token: config.session_token.clone(),
            },
        })?;

        Ok(Self { client })
    }

    pub fn bucket(&self) -> &str {
        self.client.bucket()
    }
}

impl StorageAdapter for MinioAdapter {
    fn limits(&self) -> PartLimits {
        PartLimits::MINIO
    }

    async fn create_upload_session(
        &self,
        object_key: &str,
        content_type: &str,
    ) -> Result<String, StoreError> {
        self.client
            .create_multipart_upload(
                object_key,
                vec![("content-type".to_string(), content_type.to_string())],
            )
            .await
    }

    async fn abort_upload_session(&self, object_key: &str, upload_id: &str) -> Result<(), StoreError> {
        self.client.abort_multipart_upload(object_key, upload_id).await
    }

    /// MinIO does not enforce a signed `Content-Length`, so only `host` is signed.
    fn presign_part_url(
        &self,
        object_key: &str,
        upload_id: &str,
        part_number: u32,
        _part_size: u64,
    ) -> String {
        self.client.presign_public(
            "PUT",
            object_key,
            vec![
                ("partNumber".into(), part_number.to_string()),
                ("uploadId".into(), upload_id.to_string()),
            ],
            Vec::new(),
            CLIENT_URL_EXPIRY,
        )
    }

    fn presign_completion_url(&self, transferred_parts: &TransferredParts) -> String {
        self.client.presign_public(
            "POST",
            &transferred_parts.object_key,
            vec![("uploadId".into(), transferred_parts.upload_id.clone())],
            Vec::new(),
            CLIENT_URL_EXPIRY,
        )
    }

    async fn get_object_size(&self, object_key: &str) -> Result<u64, StoreError> {
        self.client.head_object(object_key).await
    }

    fn probing(&self) -> Self {
        Self {
            client: self.client.probing(),
        }
    }
}
