//! AWS Signature Version 4 query-string pre-signing.
//!
//! Every store call goes through a pre-signed URL: the ones handed to
//! browsers (part uploads, completion) and the ones the server executes itself
//! (create, abort, head). Payloads are never hashed (`UNSIGNED-PAYLOAD`).

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Longest expiry SigV4 accepts for a pre-signed URL.
pub const MAX_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Everything but RFC 3986 unreserved characters.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Same as [`URI_COMPONENT`] but keeps path separators.
const URI_PATH: &AsciiSet = &URI_COMPONENT.remove(b'/');

#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A request to pre-sign.
#[derive(Debug, Clone)]
pub struct PresignRequest<'a> {
    pub method: &'a str,

    /// Scheme and authority of the target; any path on it is ignored.
    pub origin: &'a Url,

    /// Unencoded absolute path, e.g. `/bucket/some key.txt`.
    pub path: &'a str,

    /// Operation query parameters (`uploadId`, `partNumber`, `uploads`, ...).
    pub query: Vec<(String, String)>,

    /// Headers the caller commits to sending; they become part of the signature.
    pub headers: Vec<(String, String)>,

    pub expires: Duration,
}

#[derive(Debug, Clone)]
pub struct Signer {
    credentials: Credentials,
    region: String,
    service: String,
}

impl Signer {
    pub fn new(credentials: Credentials, region: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
            service: "s3".into(),
        }
    }

    /// Pre-sign `request` using the current time.
    pub fn presign(&self, request: &PresignRequest<'_>) -> String {
        self.presign_at(request, Utc::now())
    }

    /// Pre-sign `request` as of `now`; the returned URL is absolute.
    pub fn presign_at(&self, request: &PresignRequest<'_>, now: DateTime<Utc>) -> String {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let expires = request.expires.min(MAX_EXPIRY).as_secs().max(1);

        let host = host_header(request.origin);
        let mut headers: Vec<(String, String)> = request
            .headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
            .chain(std::iter::once(("host".to_string(), host.clone())))
            .collect();
        headers.sort();
        let signed_headers = headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value))
            .collect();

        let mut query = request.query.clone();
        query.push(("X-Amz-Algorithm".into(), ALGORITHM.into()));
        query.push((
            "X-Amz-Credential".into(),
            format!("{}/{}", self.credentials.access_key, scope),
        ));
        query.push(("X-Amz-Date".into(), amz_date.clone()));
        query.push(("X-Amz-Expires".into(), expires.to_string()));
        if let Some(token) = &self.credentials.session_token {
            query.push(("X-Amz-Security-Token".into(), token.clone()));
        }
        query.push(("X-Amz-SignedHeaders".into(), signed_headers.clone()));
        let canonical_query = canonical_query_string(&query);

        let canonical_uri = utf8_percent_encode(request.path, URI_PATH).to_string();
        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            request.method,
            canonical_uri,
            canonical_query,
            canonical_headers,
            signed_headers,
            UNSIGNED_PAYLOAD
        );

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signature = hex::encode(hmac_sha256(
            &self.signing_key(&date_stamp),
            string_to_sign.as_bytes(),
        ));

        format!(
            "{}://{}{}?{}&X-Amz-Signature={}",
            request.origin.scheme(),
            host,
            canonical_uri,
            canonical_query,
            signature
        )
    }

    fn signing_key(&self, date_stamp: &str) -> Vec<u8> {
        let k_date = hmac_sha256(
            format!("AWS4{}", self.credentials.secret_key).as_bytes(),
            date_stamp.as_bytes(),
        );
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        hmac_sha256(&k_service, b"aws4_request")
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// `host[:port]`, omitting the port when it is the scheme default.
fn host_header(origin: &Url) -> String {
    let host = origin.host_str().unwrap_or_default();
    match origin.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

fn canonical_query_string(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(key, value)| {
            (
                utf8_percent_encode(key, URI_COMPONENT).to_string(),
                utf8_percent_encode(value, URI_COMPONENT).to_string(),
            )
        })
        .collect();
    encoded.sort();
    encoded
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&")
}
