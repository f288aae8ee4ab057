//! Tamper-evident tokens that replace server-side upload sessions.
//!
//! A token is `payload:timestamp:signature`, each segment base64url without
//! padding. The payload is JSON, the timestamp is the signing time in Unix
//! seconds, and the signature is HMAC-SHA256 over the salt and the first two
//! segments. Every token kind has its own salt, so an upload signature can
//! never be presented as a field value or the other way round.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use std::{fmt, time::Duration};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const KEY_DERIVATION_PREFIX: &[u8] = b"direct-upload.signer";
const UPLOAD_SIGNATURE_SALT: &str = "direct-upload.upload-signature";
const FIELD_VALUE_SALT: &str = "direct-upload.field-value";

/// Upload signatures outlive the pre-signed part URLs by nothing.
pub const UPLOAD_SIGNATURE_MAX_AGE: Duration = crate::services::storage::CLIENT_URL_EXPIRY;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("token is malformed")]
    Malformed,
    #[error("signature does not match")]
    BadSignature,
    #[error("signature expired {age_secs}s after signing (max {max_age_secs}s)")]
    Expired { age_secs: i64, max_age_secs: u64 },
    #[error("token payload could not be encoded: {0}")]
    Encode(String),
}

/// Signs and verifies tokens with a server-held secret.
#[derive(Clone)]
pub struct Signer {
    key: [u8; 32],
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DERIVATION_PREFIX);
        hasher.update(secret.as_ref());
        Self {
            key: hasher.finalize().into(),
        }
    }

    pub fn sign<T: Serialize>(&self, salt: &str, value: &T) -> Result<String, SignatureError> {
        self.sign_at(salt, value, Utc::now().timestamp())
    }

    fn sign_at<T: Serialize>(
        &self,
        salt: &str,
        value: &T,
        timestamp: i64,
    ) -> Result<String, SignatureError> {
        let json =
            serde_json::to_vec(value).map_err(|err| SignatureError::Encode(err.to_string()))?;
        let signed = format!(
            "{}:{}",
            URL_SAFE_NO_PAD.encode(json),
            URL_SAFE_NO_PAD.encode(timestamp.to_string())
        );
        let signature = URL_SAFE_NO_PAD.encode(self.mac(salt, &signed).finalize().into_bytes());
        Ok(format!("{}:{}", signed, signature))
    }

    /// Verify `token` and decode its payload.
    ///
    /// With `max_age`, tokens signed longer ago than that are rejected.
    pub fn unsign<T: DeserializeOwned>(
        &self,
        salt: &str,
        token: &str,
        max_age: Option<Duration>,
    ) -> Result<T, SignatureError> {
        let (signed, signature) = token.rsplit_once(':').ok_or(SignatureError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SignatureError::Malformed)?;
        self.mac(salt, signed)
            .verify_slice(&signature)
            .map_err(|_| SignatureError::BadSignature)?;

        let (payload, timestamp) = signed.split_once(':').ok_or(SignatureError::Malformed)?;
        if let Some(max_age) = max_age {
            let timestamp = URL_SAFE_NO_PAD
                .decode(timestamp)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .and_then(|text| text.parse::<i64>().ok())
                .ok_or(SignatureError::Malformed)?;
            let age_secs = Utc::now().timestamp() - timestamp;
            if age_secs > max_age.as_secs() as i64 {
                return Err(SignatureError::Expired {
                    age_secs,
                    max_age_secs: max_age.as_secs(),
                });
            }
        }

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| SignatureError::Malformed)?;
        serde_json::from_slice(&json).map_err(|_| SignatureError::Malformed)
    }

    fn mac(&self, salt: &str, signed: &str) -> HmacSha256 {
        let mut mac =
            <HmacSha256 as Mac>::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(salt.as_bytes());
        mac.update(b":");
        mac.update(signed.as_bytes());
        mac
    }
}

/// Session token minted at initialization.
///
/// Possession of a valid signature is the authorization to complete and
/// finalize an upload of `object_key` for `field_id`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadSignature {
    pub field_id: String,
    pub object_key: String,
}

impl UploadSignature {
    pub fn mint(&self, signer: &Signer) -> Result<String, SignatureError> {
        signer.sign(UPLOAD_SIGNATURE_SALT, self)
    }

    pub fn verify(signer: &Signer, token: &str) -> Result<Self, SignatureError> {
        signer.unsign(UPLOAD_SIGNATURE_SALT, token, Some(UPLOAD_SIGNATURE_MAX_AGE))
    }
}

/// The only trusted representation of "a file exists at this key with this size".
///
/// Application code must store values obtained through
/// [`FieldValue::from_token`], never a raw object key taken from a client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FieldValue {
    pub object_key: String,
    pub file_size: u64,
}

impl FieldValue {
    pub fn mint(&self, signer: &Signer) -> Result<String, SignatureError> {
        signer.sign(FIELD_VALUE_SALT, self)
    }

    pub fn from_token(signer: &Signer, token: &str) -> Result<Self, SignatureError> {
        signer.unsign(FIELD_VALUE_SALT, token, None)
    }
}
