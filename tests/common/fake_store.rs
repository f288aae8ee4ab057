//! In-memory S3-compatible store speaking the path-style multipart API.
//!
//! Signatures are not verified, but every request must carry one. Completion
//! is checked the way S3 checks it: ascending part numbers, matching ETags
//! and a 5 MiB minimum for every part but the last.

use axum::{
    Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::net::TcpListener;
use uuid::Uuid;

pub const BUCKET: &str = "test-bucket";
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

type Params = HashMap<String, String>;

#[derive(Default)]
struct Store {
    uploads: HashMap<String, PendingUpload>,
    objects: HashMap<String, Bytes>,
}

struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Clone, Default)]
struct Shared {
    store: Arc<Mutex<Store>>,
    requests: Arc<AtomicUsize>,
}

#[derive(Clone)]
pub struct FakeStore {
    pub endpoint: String,
    shared: Shared,
}

#[derive(Deserialize)]
struct CompleteMultipartUpload {
    #[serde(rename = "Part", default)]
    parts: Vec<CompletedPart>,
}

#[derive(Deserialize)]
struct CompletedPart {
    #[serde(rename = "PartNumber")]
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: String,
}

impl FakeStore {
    pub async fn spawn() -> Self {
        let shared = Shared::default();
        let app = Router::new()
            .route(
                "/{bucket}/{*key}",
                post(post_object)
                    .put(put_part)
                    .head(head_object)
                    .get(get_object)
                    .delete(abort_upload),
            )
            .with_state(shared.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        Self {
            endpoint: format!("http://{addr}"),
            shared,
        }
    }

    /// Requests received so far, of any kind.
    pub fn requests(&self) -> usize {
        self.shared.requests.load(Ordering::SeqCst)
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.shared.store.lock().unwrap().objects.get(key).cloned()
    }

    pub fn pending_uploads(&self) -> usize {
        self.shared.store.lock().unwrap().uploads.len()
    }
}

fn s3_error(status: StatusCode, code: &str) -> Response {
    let body = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Error><Code>{code}</Code><Message>{code}</Message></Error>"#
    );
    (status, [(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

/// Common checks; `Err` is the response to send instead.
fn admit(shared: &Shared, bucket: &str, params: &Params) -> Result<(), Response> {
    shared.requests.fetch_add(1, Ordering::SeqCst);
    if !params.contains_key("X-Amz-Signature") || !params.contains_key("X-Amz-Expires") {
        return Err(s3_error(StatusCode::FORBIDDEN, "AccessDenied"));
    }
    if bucket != BUCKET {
        return Err(s3_error(StatusCode::NOT_FOUND, "NoSuchBucket"));
    }
    Ok(())
}

async fn post_object(
    State(shared): State<Shared>,
    Path((bucket, key)): Path<(String, String)>,
    Query(params): Query<Params>,
    body: Bytes,
) -> Response {
    if let Err(response) = admit(&shared, &bucket, &params) {
        return response;
    }

    if params.contains_key("uploads") {
        let upload_id = Uuid::new_v4().to_string();
        shared.store.lock().unwrap().uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.clone(),
                parts: BTreeMap::new(),
            },
        );
        let xml = format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<InitiateMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#,
                "<Bucket>{}</Bucket><Key>{}</Key><UploadId>{}</UploadId>",
                "</InitiateMultipartUploadResult>"
            ),
            bucket, key, upload_id
        );
        return (StatusCode::OK, [(header::CONTENT_TYPE, "application/xml")], xml).into_response();
    }

    match params.get("uploadId") {
        Some(upload_id) => complete_upload(&shared, &key, upload_id, &body),
        None => s3_error(StatusCode::BAD_REQUEST, "InvalidRequest"),
    }
}

fn complete_upload(shared: &Shared, key: &str, upload_id: &str, body: &[u8]) -> Response {
    let Ok(text) = std::str::from_utf8(body) else {
        return s3_error(StatusCode::BAD_REQUEST, "MalformedXML");
    };
    let Ok(request) = quick_xml::de::from_str::<CompleteMultipartUpload>(text) else {
        return s3_error(StatusCode::BAD_REQUEST, "MalformedXML");
    };

    let mut store = shared.store.lock().unwrap();
    let Some(upload) = store.uploads.get(upload_id) else {
        return s3_error(StatusCode::NOT_FOUND, "NoSuchUpload");
    };
    if upload.key != key || request.parts.is_empty() {
        return s3_error(StatusCode::BAD_REQUEST, "InvalidRequest");
    }
    if !request
        .parts
        .windows(2)
        .all(|pair| pair[0].part_number < pair[1].part_number)
    {
        return s3_error(StatusCode::BAD_REQUEST, "InvalidPartOrder");
    }

    let mut assembled = Vec::new();
    let last = request.parts.len() - 1;
    for (index, part) in request.parts.iter().enumerate() {
        match upload.parts.get(&part.part_number) {
            Some((etag, data)) if *etag == part.etag => {
                if index != last && data.len() < MIN_PART_SIZE {
                    return s3_error(StatusCode::BAD_REQUEST, "EntityTooSmall");
                }
                assembled.extend_from_slice(data);
            }
            _ => return s3_error(StatusCode::BAD_REQUEST, "InvalidPart"),
        }
    }

    store.uploads.remove(upload_id);
    store.objects.insert(key.to_string(), Bytes::from(assembled));
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><CompleteMultipartUploadResult><Bucket>{BUCKET}</Bucket><Key>{key}</Key></CompleteMultipartUploadResult>"#
    );
    (StatusCode::OK, [(header::CONTENT_TYPE, "application/xml")], xml).into_response()
}

async fn put_part(
    State(shared): State<Shared>,
    Path((bucket, _key)): Path<(String, String)>,
    Query(params): Query<Params>,
    body: Bytes,
) -> Response {
    if let Err(response) = admit(&shared, &bucket, &params) {
        return response;
    }
    let (Some(upload_id), Some(part_number)) = (
        params.get("uploadId"),
        params.get("partNumber").and_then(|n| n.parse::<u32>().ok()),
    ) else {
        return s3_error(StatusCode::BAD_REQUEST, "InvalidRequest");
    };

    let mut store = shared.store.lock().unwrap();
    let Some(upload) = store.uploads.get_mut(upload_id) else {
        return s3_error(StatusCode::NOT_FOUND, "NoSuchUpload");
    };
    let etag = format!("\"{:x}\"", md5::compute(&body));
    upload.parts.insert(part_number, (etag.clone(), body));

    let mut response = StatusCode::OK.into_response();
    if let Ok(value) = HeaderValue::from_str(&etag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    response
}

async fn head_object(
    State(shared): State<Shared>,
    Path((bucket, key)): Path<(String, String)>,
    Query(params): Query<Params>,
) -> Response {
    if let Err(response) = admit(&shared, &bucket, &params) {
        return response;
    }
    match shared.store.lock().unwrap().objects.get(&key) {
        Some(data) => (
            StatusCode::OK,
            [(header::CONTENT_LENGTH, data.len().to_string())],
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_object(
    State(shared): State<Shared>,
    Path((bucket, key)): Path<(String, String)>,
    Query(params): Query<Params>,
) -> Response {
    if let Err(response) = admit(&shared, &bucket, &params) {
        return response;
    }
    match shared.store.lock().unwrap().objects.get(&key) {
        Some(data) => (StatusCode::OK, data.clone()).into_response(),
        None => s3_error(StatusCode::NOT_FOUND, "NoSuchKey"),
    }
}

async fn abort_upload(
    State(shared): State<Shared>,
    Path((bucket, _key)): Path<(String, String)>,
    Query(params): Query<Params>,
) -> Response {
    if let Err(response) = admit(&shared, &bucket, &params) {
        return response;
    }
    let Some(upload_id) = params.get("uploadId") else {
        return s3_error(StatusCode::BAD_REQUEST, "InvalidRequest");
    };
    match shared.store.lock().unwrap().uploads.remove(upload_id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => s3_error(StatusCode::NOT_FOUND, "NoSuchUpload"),
    }
}
