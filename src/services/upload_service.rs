//! UploadService: the three upload steps behind the HTTP endpoints.
//!
//! The service owns no per-upload state. Every request is authorized by the
//! upload signature minted at initialization, and the object key always comes
//! out of that signature, never from the request body.

use crate::{
    models::{
        api::{
            CompleteUpload, CompleteUploadResponse, FinalizeResponse, InitializeUpload,
            InitializeUploadResponse, ValidationErrors,
        },
        transfer::TransferredParts,
    },
    services::{
        multipart::{MultipartManager, UploadError},
        registry::{FieldDefinition, FieldRegistry},
        signing::{FieldValue, SignatureError, Signer, UploadSignature},
        storage::{Backend, StorageAdapter},
    },
};
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request validation failed")]
    Validation(ValidationErrors),
    #[error("upload signature rejected: {0}")]
    InvalidSignature(#[source] SignatureError),
    #[error("failed to sign token: {0}")]
    Mint(#[source] SignatureError),
    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl From<ValidationErrors> for ServiceError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Outcome of the storage self-test for one storage target.
#[derive(Debug)]
pub struct StorageCheck {
    pub storage: String,
    pub result: Result<(), UploadError>,
}

/// Shared application state: the field registry, the token signer and the
/// global key prefix. Cheap to clone.
#[derive(Debug)]
pub struct UploadService<A = Backend> {
    registry: Arc<FieldRegistry<MultipartManager<A>>>,
    signer: Arc<Signer>,
    upload_prefix: Arc<str>,
}

impl<A> Clone for UploadService<A> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            signer: Arc::clone(&self.signer),
            upload_prefix: Arc::clone(&self.upload_prefix),
        }
    }
}

impl<A: StorageAdapter> UploadService<A> {
    pub fn new(
        registry: FieldRegistry<MultipartManager<A>>,
        signer: Signer,
        upload_prefix: impl Into<String>,
    ) -> Self {
        let upload_prefix: String = upload_prefix.into();
        Self {
            registry: Arc::new(registry),
            signer: Arc::new(signer),
            upload_prefix: upload_prefix.into(),
        }
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    pub fn registry(&self) -> &FieldRegistry<MultipartManager<A>> {
        &self.registry
    }

    fn resolve_field(
        &self,
        field_id: &str,
    ) -> ServiceResult<(&FieldDefinition, &MultipartManager<A>)> {
        self.registry
            .field(field_id)
            .and_then(|field| Some((field, self.registry.manager_for(field)?.as_ref())))
            .ok_or_else(|| {
                ValidationErrors::single("field_id", format!("Invalid field ID: \"{field_id}\"."))
                    .into()
            })
    }

    fn verify_signature(&self, token: &str) -> ServiceResult<UploadSignature> {
        UploadSignature::verify(&self.signer, token).map_err(|err| {
            warn!("rejected upload signature: {}", err);
            ServiceError::InvalidSignature(err)
        })
    }

    /// Pick the object key, open the multipart session and sign the session token.
    pub async fn initialize(&self, request: InitializeUpload) -> ServiceResult<InitializeUploadResponse> {
        let (field, manager) = self.resolve_field(&request.field_id)?;
        let object_key = field
            .generate_object_key(&self.upload_prefix, &request.file_name)
            .map_err(|err| ValidationErrors::single("file_name", err.to_string()))?;

        let transfer = manager
            .initialize_upload(&object_key, request.file_size, &request.content_type)
            .await?;

        let upload_signature = UploadSignature {
            field_id: field.id.clone(),
            object_key: transfer.object_key.clone(),
        }
        .mint(&self.signer)
        .map_err(ServiceError::Mint)?;

        Ok(InitializeUploadResponse {
            object_key: transfer.object_key,
            upload_id: transfer.upload_id,
            parts: transfer.parts,
            upload_signature,
        })
    }

    /// Pre-sign the store's completion call for the signed session.
    pub fn complete(&self, request: CompleteUpload) -> ServiceResult<CompleteUploadResponse> {
        let signature = self.verify_signature(&request.upload_signature)?;
        let (_, manager) = self.resolve_field(&signature.field_id)?;

        Ok(manager.complete_upload(TransferredParts {
            object_key: signature.object_key,
            upload_id: request.upload_id,
            parts: request.parts,
        }))
    }

    /// Confirm the object exists and mint the value the application stores.
    pub async fn finalize(&self, upload_signature: &str) -> ServiceResult<FinalizeResponse> {
        let signature = self.verify_signature(upload_signature)?;
        let (_, manager) = self.resolve_field(&signature.field_id)?;

        let file_size = manager.finalize(&signature.object_key).await?;
        let field_value = FieldValue {
            object_key: signature.object_key,
            file_size,
        }
        .mint(&self.signer)
        .map_err(ServiceError::Mint)?;

        info!(field_id = %signature.field_id, file_size, "upload finalized");
        Ok(FinalizeResponse { field_value })
    }

    /// Run the storage self-test against every storage target, concurrently.
    pub async fn check_storages(&self) -> Vec<StorageCheck> {
        join_all(self.registry.storages().map(|(name, manager)| async move {
            StorageCheck {
                storage: name.to_string(),
                result: manager.test_upload().await,
            }
        }))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::transfer::TransferredPart,
        services::{multipart::tests::MockAdapter, registry::DEFAULT_STORAGE, sizes::MIB},
    };

    const FIELD_ID: &str = "core.Resource.blob";

    fn service(adapter: MockAdapter) -> UploadService<MockAdapter> {
        let mut registry =
            FieldRegistry::new().with_storage(DEFAULT_STORAGE, MultipartManager::new(adapter));
        registry
            .register(FieldDefinition::new(FIELD_ID, "resources"))
            .unwrap();
        UploadService::new(registry, Signer::new("test-secret"), "uploads")
    }

    fn initialize_request(file_size: u64) -> InitializeUpload {
        InitializeUpload {
            field_id: FIELD_ID.into(),
            file_name: "report.pdf".into(),
            file_size,
            content_type: "application/pdf".into(),
        }
    }

    #[tokio::test]
    async fn initialize_signs_the_chosen_key() {
        let service = service(MockAdapter::default());

        let response = service.initialize(initialize_request(10)).await.unwrap();

        assert!(response.object_key.starts_with("uploads/resources/"));
        assert!(response.object_key.ends_with("/report.pdf"));
        let signature = UploadSignature::verify(service.signer(), &response.upload_signature).unwrap();
        assert_eq!(signature.field_id, FIELD_ID);
        assert_eq!(signature.object_key, response.object_key);
    }

    #[tokio::test]
    async fn unknown_fields_never_reach_the_store() {
        let adapter = MockAdapter::default();
        let service = service(adapter.clone());
        let mut request = initialize_request(10);
        request.field_id = "core.Resource.nope".into();

        let err = service.initialize(request).await.unwrap_err();

        let errors = match err {
            ServiceError::Validation(errors) => errors,
            other => panic!("expected validation error, got {other:?}"),
        };
        assert_eq!(
            errors.get("field_id").unwrap(),
            &["Invalid field ID: \"core.Resource.nope\".".to_string()][..]
        );
        assert_eq!(adapter.store_calls(), 0);
    }

    #[tokio::test]
    async fn invalid_field_id_is_quoted_verbatim() {
        let service = service(MockAdapter::default());
        let mut request = initialize_request(10);
        request.field_id = r#"a"b\c"#.into();

        let err = service.initialize(request).await.unwrap_err();

        let errors = match err {
            ServiceError::Validation(errors) => errors,
            other => panic!("expected validation error, got {other:?}"),
        };
        assert_eq!(
            errors.get("field_id").unwrap(),
            &[r#"Invalid field ID: "a"b\c"."#.to_string()][..]
        );
    }

    #[tokio::test]
    async fn oversized_uploads_are_rejected() {
        let adapter = MockAdapter::default();
        let service = service(adapter.clone());

        let err = service
            .initialize(initialize_request(100 * MIB + 1))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Upload(UploadError::UploadTooLarge(_))));
        assert_eq!(adapter.store_calls(), 0);
    }

    #[tokio::test]
    async fn complete_uses_the_signed_object_key() {
        let service = service(MockAdapter::default());
        let initialized = service.initialize(initialize_request(10)).await.unwrap();

        let completion = service
            .complete(CompleteUpload {
                upload_signature: initialized.upload_signature,
                upload_id: initialized.upload_id.clone(),
                parts: vec![TransferredPart {
                    part_number: 1,
                    size: 10,
                    etag: "\"abc\"".into(),
                }],
            })
            .unwrap();

        assert!(completion.complete_url.contains(&initialized.object_key));
        assert!(completion.body.contains("<ETag>&quot;abc&quot;</ETag>"));
    }

    #[tokio::test]
    async fn tampered_signatures_are_rejected_before_the_store() {
        let adapter = MockAdapter {
            object_size: Some(10),
            ..Default::default()
        };
        let service = service(adapter.clone());
        let forged = UploadSignature {
            field_id: FIELD_ID.into(),
            object_key: "someone/else.pdf".into(),
        }
        .mint(&Signer::new("other-secret"))
        .unwrap();

        let err = service.finalize(&forged).await.unwrap_err();

        assert!(matches!(err, ServiceError::InvalidSignature(SignatureError::BadSignature)));
        assert_eq!(adapter.store_calls(), 0);
    }

    #[tokio::test]
    async fn finalize_mints_a_field_value() {
        let service = service(MockAdapter {
            object_size: Some(10),
            ..Default::default()
        });
        let initialized = service.initialize(initialize_request(10)).await.unwrap();

        let response = service.finalize(&initialized.upload_signature).await.unwrap();

        let value = FieldValue::from_token(service.signer(), &response.field_value).unwrap();
        assert_eq!(value.object_key, initialized.object_key);
        assert_eq!(value.file_size, 10);
    }

    #[tokio::test]
    async fn finalize_before_completion_reports_missing_object() {
        let service = service(MockAdapter::default());
        let initialized = service.initialize(initialize_request(10)).await.unwrap();

        let err = service.finalize(&initialized.upload_signature).await.unwrap_err();

        assert!(matches!(err, ServiceError::Upload(UploadError::ObjectNotFound { .. })));
    }

    #[tokio::test]
    async fn storage_checks_cover_every_storage() {
        let failing = MockAdapter {
            fail_create: true,
            ..Default::default()
        };
        let registry = FieldRegistry::new()
            .with_storage(DEFAULT_STORAGE, MultipartManager::new(MockAdapter::default()))
            .with_storage("archive", MultipartManager::new(failing));
        let service = UploadService::new(registry, Signer::new("s"), "");

        let checks = service.check_storages().await;

        assert_eq!(checks.len(), 2);
        assert!(checks.iter().any(|c| c.storage == DEFAULT_STORAGE && c.result.is_ok()));
        assert!(checks.iter().any(|c| c.storage == "archive" && c.result.is_err()));
    }
}
