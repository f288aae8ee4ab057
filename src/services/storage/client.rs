//! HTTP plumbing shared by the S3-compatible adapters.
//!
//! Requests are pre-signed with [`sigv4::Signer`] and executed with
//! `reqwest`. Idempotent calls (`HEAD`, `DELETE`) are retried on connection
//! failures and 5xx responses; probing clients never retry.

use super::{
    SERVER_URL_EXPIRY, StorageConfigError, StoreError,
    sigv4::{self, Credentials, PresignRequest},
};
use reqwest::{Method, Response, StatusCode, header};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};
use url::Url;

const DEFAULT_RETRIES: u32 = 2;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// How the bucket is addressed in URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// `https://{bucket}.{endpoint-host}/{key}`
    VirtualHosted,
    /// `https://{endpoint-host}/{bucket}/{key}`
    Path,
}

/// Resolved settings for a [`StoreClient`].
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub bucket: String,
    pub region: String,
    pub endpoint: String,
    pub public_endpoint: Option<String>,
    pub addressing: Addressing,
    pub credentials: Credentials,
}

#[derive(Debug, Clone)]
struct BucketLocation {
    origin: Url,
    path_prefix: String,
}

impl BucketLocation {
    fn resolve(
        endpoint: &str,
        bucket: &str,
        addressing: Addressing,
    ) -> Result<Self, StorageConfigError> {
        let invalid = |reason: String| StorageConfigError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };
        let mut origin = Url::parse(endpoint).map_err(|err| invalid(err.to_string()))?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https".into()));
        }
        let host = origin
            .host_str()
            .ok_or_else(|| invalid("missing host".into()))?
            .to_string();

        match addressing {
            Addressing::VirtualHosted => {
                origin
                    .set_host(Some(&format!("{}.{}", bucket, host)))
                    .map_err(|err| invalid(err.to_string()))?;
                Ok(Self {
                    origin,
                    path_prefix: String::new(),
                })
            }
            Addressing::Path => Ok(Self {
                origin,
                path_prefix: format!("/{}", bucket),
            }),
        }
    }

    fn object_path(&self, object_key: &str) -> String {
        format!("{}/{}", self.path_prefix, object_key)
    }
}

/// A signed HTTP client bound to one bucket.
#[derive(Debug, Clone)]
pub struct StoreClient {
    http: reqwest::Client,
    retries: u32,
    signer: Arc<sigv4::Signer>,
    bucket: String,
    internal: BucketLocation,
    public: BucketLocation,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateMultipartUploadResult {
    upload_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    code: String,
    #[serde(default)]
    message: String,
}

impl StoreClient {
    pub fn new(settings: StoreSettings) -> Result<Self, StorageConfigError> {
        let internal =
            BucketLocation::resolve(&settings.endpoint, &settings.bucket, settings.addressing)?;
        let public = match &settings.public_endpoint {
            Some(endpoint) => {
                BucketLocation::resolve(endpoint, &settings.bucket, settings.addressing)?
            }
            None => internal.clone(),
        };

        Ok(Self {
            http: reqwest::Client::builder().build()?,
            retries: DEFAULT_RETRIES,
            signer: Arc::new(sigv4::Signer::new(settings.credentials, settings.region)),
            bucket: settings.bucket,
            internal,
            public,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// A copy that fails fast: short timeouts and no retries.
    pub fn probing(&self) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(PROBE_CONNECT_TIMEOUT)
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_else(|err| {
                warn!("could not build probe HTTP client, reusing default: {}", err);
                self.http.clone()
            });
        Self {
            http,
            retries: 0,
            ..self.clone()
        }
    }

    /// Pre-sign a URL for browsers, using the public endpoint.
    pub fn presign_public(
        &self,
        method: &str,
        object_key: &str,
        query: Vec<(String, String)>,
        headers: Vec<(String, String)>,
        expires: Duration,
    ) -> String {
        self.presign(&self.public, method, object_key, query, headers, expires)
    }

    fn presign_internal(
        &self,
        method: &str,
        object_key: &str,
        query: Vec<(String, String)>,
        headers: Vec<(String, String)>,
    ) -> String {
        self.presign(
            &self.internal,
            method,
            object_key,
            query,
            headers,
            SERVER_URL_EXPIRY,
        )
    }

    fn presign(
        &self,
        location: &BucketLocation,
        method: &str,
        object_key: &str,
        query: Vec<(String, String)>,
        headers: Vec<(String, String)>,
        expires: Duration,
    ) -> String {
        let path = location.object_path(object_key);
        self.signer.presign(&PresignRequest {
            method,
            origin: &location.origin,
            path: &path,
            query,
            headers,
            expires,
        })
    }

    /// `POST /{key}?uploads`; returns the new upload ID.
    pub async fn create_multipart_upload(
        &self,
        object_key: &str,
        headers: Vec<(String, String)>,
    ) -> Result<String, StoreError> {
        let url = self.presign_internal(
            "POST",
            object_key,
            vec![("uploads".into(), String::new())],
            headers.clone(),
        );
        let mut request = self.http.post(&url).body("");
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let response = error_for_status(response).await?;
        let text = response.text().await?;
        let result: InitiateMultipartUploadResult = quick_xml::de::from_str(&text)
            .map_err(|err| StoreError::MalformedResponse(format!("create multipart upload: {}", err)))?;

        debug!(
            bucket = %self.bucket,
            object_key,
            upload_id = %result.upload_id,
            "created multipart upload"
        );
        Ok(result.upload_id)
    }

    /// `DELETE /{key}?uploadId=...`
    pub async fn abort_multipart_upload(
        &self,
        object_key: &str,
        upload_id: &str,
    ) -> Result<(), StoreError> {
        let url = self.presign_internal(
            "DELETE",
            object_key,
            vec![("uploadId".into(), upload_id.to_string())],
            Vec::new(),
        );
        let response = self.send_idempotent(Method::DELETE, &url).await?;
        error_for_status(response).await?;
        debug!(bucket = %self.bucket, object_key, upload_id, "aborted multipart upload");
        Ok(())
    }

    /// `HEAD /{key}`; returns the object's `Content-Length`.
    pub async fn head_object(&self, object_key: &str) -> Result<u64, StoreError> {
        let url = self.presign_internal("HEAD", object_key, Vec::new(), Vec::new());
        let response = self.send_idempotent(Method::HEAD, &url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::ObjectNotFound {
                key: object_key.to_string(),
            });
        }
        let response = error_for_status(response).await?;

        response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .ok_or_else(|| {
                StoreError::MalformedResponse(format!(
                    "object `{}` has no Content-Length",
                    object_key
                ))
            })
    }

    async fn send_idempotent(&self, method: Method, url: &str) -> Result<Response, StoreError> {
        let mut attempt = 0;
        loop {
            let result = self.http.request(method.clone(), url).send().await;
            let retryable = match &result {
                Ok(response) => response.status().is_server_error(),
                Err(err) => err.is_connect() || err.is_timeout(),
            };
            if !retryable || attempt >= self.retries {
                return Ok(result?);
            }

            let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
            warn!(
                %method,
                attempt = attempt + 1,
                "transient object store failure, retrying in {:?}",
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Turn a non-2xx store response into a [`StoreError::Status`].
async fn error_for_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    // HEAD responses carry no body, so the code may be unavailable.
    let text = response.text().await.unwrap_or_default();
    let (code, message) = match quick_xml::de::from_str::<ErrorResponse>(&text) {
        Ok(error) => (error.code, error.message),
        Err(_) => (
            status.canonical_reason().unwrap_or("Unknown").to_string(),
            String::new(),
        ),
    };

    Err(StoreError::Status {
        status: status.as_u16(),
        code,
        message,
    })
}
