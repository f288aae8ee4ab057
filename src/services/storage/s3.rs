//! AWS S3 adapter.

use super::{
    CLIENT_URL_EXPIRY, StorageAdapter, StorageConfig, StorageConfigError, StoreError,
    client::{Addressing, StoreClient, StoreSettings},
    sigv4::Credentials,
};
use crate::{models::transfer::TransferredParts, services::sizes::PartLimits};

const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone)]
pub struct S3Adapter {
    client: StoreClient,
    acl: Option<String>,
}

impl S3Adapter {
    /// Without an explicit endpoint the regional AWS endpoint is used with
    /// virtual-hosted addressing; custom endpoints are addressed path-style.
    pub fn new(config: &StorageConfig) -> Result<Self, StorageConfigError> {
        let region = config
            .region
            .clone()
            .filter(|region| !region.is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let (endpoint, addressing) = match &config.endpoint {
            Some(endpoint) => (endpoint.clone(), Addressing::Path),
            None => (
                format!("https://s3.{}.amazonaws.com", region),
                Addressing::VirtualHosted,
            ),
        };

        let client = StoreClient::new(StoreSettings {
            bucket: config.bucket.clone(),
            region,
            endpoint,
            public_endpoint: config.public_endpoint.clone(),
            addressing,
            credentials: Credentials {
                access_key: config.access_key.clone(),
                secret_key: config.secret_key.clone(),
                session_token: config.session_token.clone(),
            },
        })?;

        Ok(Self {
            client,
            acl: config.acl.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        self.client.bucket()
    }
}

impl StorageAdapter for S3Adapter {
    fn limits(&self) -> PartLimits {
        PartLimits::S3
    }

    async fn create_upload_session(
        &self,
        object_key: &str,
        content_type: &str,
    ) -> Result<String, StoreError> {
        let mut headers = vec![("content-type".to_string(), content_type.to_string())];
        if let Some(acl) = &self.acl {
            headers.push(("x-amz-acl".to_string(), acl.clone()));
        }
        self.client.create_multipart_upload(object_key, headers).await
    }

    async fn abort_upload_session(&self, object_key: &str, upload_id: &str) -> Result<(), StoreError> {
        self.client.abort_multipart_upload(object_key, upload_id).await
    }

    /// S3 enforces the signed `Content-Length`, so a part of the wrong size is rejected.
    fn presign_part_url(
        &self,
        object_key: &str,
        upload_id: &str,
        part_number: u32,
        part_size: u64,
    ) -> String {
        self.client.presign_public(
            "PUT",
            object_key,
            vec![
                ("partNumber".into(), part_number.to_string()),
                ("uploadId".into(), upload_id.to_string()),
            ],
            vec![("content-length".into(), part_size.to_string())],
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
        match self.client.head_object(object_key).await {
            // Without s3:ListBucket, S3 reports missing keys as 403.
            Err(StoreError::Status { status: 403, .. }) => Err(StoreError::ObjectNotFound {
                key: object_key.to_string(),
            }),
            other => other,
        }
    }

    fn probing(&self) -> Self {
        Self {
            client: self.client.probing(),
            acl: self.acl.clone(),
        }
    }
}
