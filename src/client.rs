//! Client for the upload endpoints.
//!
//! Mirrors what a browser does: initialize, PUT every part straight to the
//! store, ask the server to pre-sign the completion, POST it to the store and
//! finalize. The returned field value is what the application submits.

use crate::models::{
    api::{
        CompleteUploadRequest, CompleteUploadResponse, FinalizeRequest, FinalizeResponse,
        InitializeUploadRequest, InitializeUploadResponse, Lenient, TransferredPartRequest,
    },
    transfer::{PresignedPartTransfer, TransferredPart},
};
use bytes::Bytes;
use futures::{TryStreamExt, stream};
use reqwest::header::{CONTENT_TYPE, ETAG};
use serde::{Serialize, de::DeserializeOwned};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("reading upload source failed: {0}")]
    Io(#[from] io::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("{url} responded with status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("store returned no ETag for part {part_number}")]
    MissingEtag { part_number: u32 },
    #[error("store rejected the completion: {0}")]
    CompletionFailed(String),
    #[error("size of {0} bytes cannot be sent as a JSON integer")]
    SizeOutOfRange(u64),
}

fn json_size(size: u64) -> Result<i64, ClientError> {
    i64::try_from(size).map_err(|_| ClientError::SizeOutOfRange(size))
}

#[derive(Debug, Clone)]
pub struct UploadClient {
    http: reqwest::Client,
    base_url: Url,
    concurrency: usize,
}

impl UploadClient {
    /// `base_url` is where the upload routes are mounted.
    pub fn new(mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Parts in flight at once; at least one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Upload `file_size` bytes read from `reader` and return the signed field value.
    pub async fn upload<R>(
        &self,
        reader: R,
        file_size: u64,
        file_name: &str,
        content_type: &str,
        field_id: &str,
    ) -> Result<String, ClientError>
    where
        R: AsyncRead + Unpin,
    {
        let initialized: InitializeUploadResponse = self
            .post_json(
                "upload-initialize",
                &InitializeUploadRequest {
                    field_id: Some(field_id.to_string().into()),
                    file_name: Some(file_name.to_string().into()),
                    file_size: Some(json_size(file_size)?.into()),
                    content_type: Some(content_type.to_string().into()),
                },
            )
            .await?;
        debug!(
            object_key = %initialized.object_key,
            parts = initialized.parts.len(),
            "upload initialized"
        );

        let transferred = self.transfer_parts(reader, initialized.parts).await?;

        let parts = transferred
            .into_iter()
            .map(|part| {
                Ok(Lenient::Valid(TransferredPartRequest {
                    part_number: Some(Lenient::Valid(part.part_number.into())),
                    size: Some(json_size(part.size)?.into()),
                    etag: Some(part.etag.into()),
                }))
            })
            .collect::<Result<Vec<_>, ClientError>>()?;
        let completion: CompleteUploadResponse = self
            .post_json(
                "upload-complete",
                &CompleteUploadRequest {
                    upload_signature: Some(initialized.upload_signature.clone().into()),
                    upload_id: Some(initialized.upload_id.into()),
                    parts: Some(parts.into()),
                },
            )
            .await?;

        let response = self
            .http
            .post(&completion.complete_url)
            .header(CONTENT_TYPE, "application/xml")
            .body(completion.body)
            .send()
            .await?;
        // The store can answer 200 and still report a failure in the body.
        let body = error_for_status(response).await?.text().await?;
        if body.contains("<Error>") {
            return Err(ClientError::CompletionFailed(body));
        }

        let finalized: FinalizeResponse = self
            .post_json(
                "finalize",
                &FinalizeRequest {
                    upload_signature: Some(initialized.upload_signature.into()),
                },
            )
            .await?;

        info!(object_key = %initialized.object_key, file_size, "upload finished");
        Ok(finalized.field_value)
    }

    /// Upload an in-memory buffer.
    pub async fn upload_bytes(
        &self,
        data: Bytes,
        file_name: &str,
        content_type: &str,
        field_id: &str,
    ) -> Result<String, ClientError> {
        self.upload(&data[..], data.len() as u64, file_name, content_type, field_id)
            .await
    }

    /// Read parts in order and PUT up to `concurrency` of them at once.
    ///
    /// Results keep part order, and at most `concurrency` part buffers are
    /// held in memory.
    async fn transfer_parts<R>(
        &self,
        reader: R,
        parts: Vec<PresignedPartTransfer>,
    ) -> Result<Vec<TransferredPart>, ClientError>
    where
        R: AsyncRead + Unpin,
    {
        stream::try_unfold((reader, parts.into_iter()), |(mut reader, mut parts)| async move {
            let Some(part) = parts.next() else {
                return Ok(None);
            };
            let len = usize::try_from(part.size).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "part does not fit in memory")
            })?;
            let mut buf = vec![0; len];
            reader.read_exact(&mut buf).await?;
            Ok::<_, ClientError>(Some(((part, Bytes::from(buf)), (reader, parts))))
        })
        .map_ok(|(part, data)| self.put_part(part, data))
        .try_buffered(self.concurrency)
        .try_collect()
        .await
    }

    async fn put_part(
        &self,
        part: PresignedPartTransfer,
        data: Bytes,
    ) -> Result<TransferredPart, ClientError> {
        let response = self.http.put(&part.upload_url).body(data).send().await?;
        let response = error_for_status(response).await?;
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or(ClientError::MissingEtag {
                part_number: part.part_number,
            })?;

        debug!(part_number = part.part_number, size = part.size, "part transferred");
        Ok(TransferredPart {
            part_number: part.part_number,
            size: part.size,
            etag,
        })
    }

    async fn post_json<B, T>(&self, route: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = self.base_url.join(route)?;
        let response = self.http.post(url).json(body).send().await?;
        Ok(error_for_status(response).await?.json().await?)
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        url,
        status: status.as_u16(),
        body,
    })
}
