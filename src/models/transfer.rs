//! Transfer records exchanged between the server, the client and the store.
//!
//! None of these are persisted. They live for a single request/response round
//! trip; the store's multipart session is the only durable state.

use serde::{Deserialize, Serialize};

/// One planned part of a multipart upload.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartPlan {
    /// 1-based part number.
    pub part_number: u32,

    /// Size of this part in bytes.
    pub size: u64,
}

/// A planned part together with the pre-signed URL the client PUTs it to.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PresignedPartTransfer {
    pub part_number: u32,
    pub size: u64,
    pub upload_url: String,
}

/// Result of opening a multipart session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PresignedTransfer {
    pub object_key: String,
    pub upload_id: String,
    pub parts: Vec<PresignedPartTransfer>,
}

/// Client-reported evidence that one part reached the store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TransferredPart {
    pub part_number: u32,
    pub size: u64,

    /// Store-assigned ETag, passed back verbatim on completion.
    pub etag: String,
}

/// The client's claim that every part of an upload has been transferred.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TransferredParts {
    pub object_key: String,
    pub upload_id: String,
    pub parts: Vec<TransferredPart>,
}

impl TransferredParts {
    /// Order parts by part number; the store rejects out-of-order completions.
    pub fn sort_parts(&mut self) {
        self.parts.sort_by_key(|part| part.part_number);
    }
}

/// Pre-signed completion request the client sends straight to the store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PresignedUploadCompletion {
    pub complete_url: String,

    /// `CompleteMultipartUpload` XML document to POST to `complete_url`.
    pub body: String,
}
