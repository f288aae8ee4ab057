#![allow(dead_code)]

pub mod fake_store;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use direct_upload::{
    UploadService,
    routes::routes::routes,
    services::{
        multipart::MultipartManager,
        registry::{DEFAULT_STORAGE, FieldDefinition, FieldRegistry},
        signing::Signer,
        sizes::MIB,
        storage::{Backend, BackendKind, StorageConfig},
    },
};
use serde_json::Value;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::ServiceExt;

pub use fake_store::{BUCKET, FakeStore};

pub const FIELD_ID: &str = "core.Resource.blob";
pub const SECRET: &str = "integration-test-secret";

pub fn storage_config(endpoint: &str, backend: BackendKind) -> StorageConfig {
    StorageConfig {
        backend,
        bucket: BUCKET.into(),
        region: None,
        endpoint: Some(endpoint.into()),
        public_endpoint: None,
        access_key: "test-access-key".into(),
        secret_key: "test-secret-key".into(),
        session_token: None,
        acl: None,
    }
}

/// Service with one field, `FIELD_ID`, stored under `uploads/resources/`.
pub fn service(endpoint: &str, backend: BackendKind) -> UploadService {
    let backend = Backend::from_config(&storage_config(endpoint, backend)).unwrap();
    let manager = MultipartManager::new(backend).with_part_size(5 * MIB);
    let mut registry = FieldRegistry::new().with_storage(DEFAULT_STORAGE, manager);
    registry
        .register(FieldDefinition::new(FIELD_ID, "resources"))
        .unwrap();
    UploadService::new(registry, Signer::new(SECRET), "uploads")
}

pub fn app(service: UploadService) -> Router {
    routes().with_state(service)
}

/// Serve `router` on an ephemeral port.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    addr
}

pub async fn call_raw(router: &Router, method: Method, uri: &str, body: Body) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

pub async fn post(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    call_raw(router, Method::POST, uri, Body::from(body.to_string())).await
}

pub async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    call_raw(router, Method::GET, uri, Body::empty()).await
}
