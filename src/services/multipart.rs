//! Backend-agnostic multipart upload orchestration.
//!
//! An upload moves through `initialized -> parts transferred -> completed ->
//! finalized`. Nothing here records which stage an upload is in: the server
//! infers it from what the client presents and from what the store reports.

use crate::{
    models::transfer::{
        PresignedPartTransfer, PresignedTransfer, PresignedUploadCompletion, TransferredParts,
    },
    services::{
        sizes::{self, UploadTooLarge},
        storage::{Backend, StorageAdapter, StoreError},
    },
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Key opened and aborted by [`MultipartManager::test_upload`].
pub const SELF_TEST_OBJECT_KEY: &str = ".s3-file-field-test-file";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    UploadTooLarge(#[from] UploadTooLarge),
    #[error("object `{key}` not found")]
    ObjectNotFound { key: String },
    #[error("storage self-test failed: {0}")]
    SelfTestFailed(#[source] StoreError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Drives multipart uploads against one storage target.
#[derive(Debug, Clone)]
pub struct MultipartManager<A = Backend> {
    adapter: A,
    part_size: Option<u64>,
}

impl<A: StorageAdapter> MultipartManager<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            part_size: None,
        }
    }

    /// Preferred part size; the planner still enforces the backend's bounds.
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = Some(part_size);
        self
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Open a multipart session and pre-sign one upload URL per part.
    ///
    /// Oversized files are rejected before the store is contacted.
    pub async fn initialize_upload(
        &self,
        object_key: &str,
        file_size: u64,
        content_type: &str,
    ) -> UploadResult<PresignedTransfer> {
        let plan = sizes::plan_parts(file_size, self.part_size, &self.adapter.limits())?;

        let upload_id = self
            .adapter
            .create_upload_session(object_key, content_type)
            .await
            .inspect_err(|err| {
                error!(object_key, file_size, "failed to create multipart upload: {}", err)
            })?;

        let parts = plan
            .into_iter()
            .map(|part| PresignedPartTransfer {
                part_number: part.part_number,
                size: part.size,
                upload_url: self.adapter.presign_part_url(
                    object_key,
                    &upload_id,
                    part.part_number,
                    part.size,
                ),
            })
            .collect::<Vec<_>>();

        info!(
            object_key,
            upload_id = %upload_id,
            file_size,
            parts = parts.len(),
            "initialized multipart upload"
        );

        Ok(PresignedTransfer {
            object_key: object_key.to_string(),
            upload_id,
            parts,
        })
    }

    /// Pre-sign the store's completion call for the client.
    ///
    /// The client performs the completion itself, so this does not check that
    /// the object exists; [`Self::finalize`] does.
    pub fn complete_upload(&self, mut transferred_parts: TransferredParts) -> PresignedUploadCompletion {
        transferred_parts.sort_parts();

        debug!(
            object_key = %transferred_parts.object_key,
            upload_id = %transferred_parts.upload_id,
            parts = transferred_parts.parts.len(),
            "presigning multipart completion"
        );

        PresignedUploadCompletion {
            complete_url: self.adapter.presign_completion_url(&transferred_parts),
            body: self.adapter.build_completion_body(&transferred_parts),
        }
    }

    /// Confirm the completed object landed and return its size.
    pub async fn finalize(&self, object_key: &str) -> UploadResult<u64> {
        match self.adapter.get_object_size(object_key).await {
            Ok(size) => {
                info!(object_key, size, "finalized upload");
                Ok(size)
            }
            Err(StoreError::ObjectNotFound { key }) => {
                warn!(object_key, "finalize requested for an object that does not exist");
                Err(UploadError::ObjectNotFound { key })
            }
            Err(err) => {
                error!(object_key, "failed to stat uploaded object: {}", err);
                Err(err.into())
            }
        }
    }

    /// Open and immediately abort a session on a sentinel key.
    ///
    /// A failed create points at misconfiguration: credentials, endpoint or
    /// bucket. Once the session is open the store is usable, so a failed abort
    /// is only logged.
    pub async fn test_upload(&self) -> UploadResult<()> {
        let probe = self.adapter.probing();

        let upload_id = probe
            .create_upload_session(SELF_TEST_OBJECT_KEY, "application/octet-stream")
            .await
            .map_err(UploadError::SelfTestFailed)?;

        if let Err(err) = probe
            .abort_upload_session(SELF_TEST_OBJECT_KEY, &upload_id)
            .await
        {
            warn!(upload_id = %upload_id, "self-test could not abort its upload: {}", err);
        }
        Ok(())
    }
}
