//! Part planning for multipart uploads.
//!
//! Splits a file into consecutive parts that satisfy the store's multipart
//! limits. All parts except the last have the same size; the last part takes
//! whatever remains.

use crate::models::transfer::PartPlan;
use thiserror::Error;

pub const KIB: u64 = 1 << 10;
pub const MIB: u64 = 1 << 20;
pub const GIB: u64 = 1 << 30;
pub const TIB: u64 = 1 << 40;

/// Part size used when the caller does not request one.
pub const DEFAULT_PART_SIZE: u64 = 64 * MIB;

/// Store-imposed bounds on a multipart upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartLimits {
    pub max_object_size: u64,
    pub min_part_size: u64,
    pub max_part_size: u64,
    pub max_parts: u64,
}

impl PartLimits {
    /// AWS S3 limits: <https://docs.aws.amazon.com/AmazonS3/latest/userguide/qfacts.html>
    pub const S3: Self = Self {
        max_object_size: 5 * TIB,
        min_part_size: 5 * MIB,
        max_part_size: 5 * GIB,
        max_parts: 10_000,
    };

    /// MinIO accepts much larger objects with the same part bounds.
    pub const MINIO: Self = Self {
        max_object_size: 50 * TIB,
        ..Self::S3
    };

    /// Largest file that can be both stored and partitioned within these limits.
    pub fn max_upload_size(&self) -> u64 {
        self.max_object_size
            .min(self.max_part_size.saturating_mul(self.max_parts))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("file size {size} exceeds the maximum object size of {max} bytes")]
pub struct UploadTooLarge {
    pub size: u64,
    pub max: u64,
}

/// Compute the part size that will be used for `file_size`.
fn effective_part_size(file_size: u64, requested_part_size: Option<u64>, limits: &PartLimits) -> u64 {
    let mut part_size = requested_part_size
        .filter(|size| *size > 0)
        .unwrap_or(DEFAULT_PART_SIZE);

    if file_size.div_ceil(part_size) > limits.max_parts {
        part_size = file_size.div_ceil(limits.max_parts);
    }

    part_size.clamp(limits.min_part_size, limits.max_part_size)
}

/// Partition `file_size` bytes into numbered parts.
///
/// Fails with [`UploadTooLarge`] when the file cannot be stored by the
/// backend at all. A zero-sized file yields no parts; callers reject empty
/// uploads before planning.
pub fn plan_parts(
    file_size: u64,
    requested_part_size: Option<u64>,
    limits: &PartLimits,
) -> Result<Vec<PartPlan>, UploadTooLarge> {
    let max = limits.max_upload_size();
    if file_size > max {
        return Err(UploadTooLarge {
            size: file_size,
            max,
        });
    }

    let part_size = effective_part_size(file_size, requested_part_size, limits);
    let count = file_size.div_ceil(part_size);

    let parts = (1..=count)
        .map(|part_number| {
            let offset = (part_number - 1) * part_size;
            PartPlan {
                // count <= max_parts, which fits in u32
                part_number: part_number as u32,
                size: part_size.min(file_size - offset),
            }
        })
        .collect();

    Ok(parts)
}
