//! JSON bodies of the upload endpoints.
//!
//! Request fields are optional and [`Lenient`] at the serde level, so that a
//! missing, empty or wrongly typed field surfaces as a field-level validation
//! message instead of a generic deserialization failure. `validate` turns a
//! raw request into its checked form.

use crate::models::transfer::{PresignedPartTransfer, PresignedUploadCompletion, TransferredPart};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::DeserializeOwned};
use std::collections::{BTreeMap, BTreeSet};

const REQUIRED: &str = "This field is required.";
const BLANK: &str = "This field may not be blank.";
const NOT_A_STRING: &str = "Not a valid string.";
const NOT_AN_INTEGER: &str = "A valid integer is required.";
const NOT_A_LIST: &str = "Expected a list of items.";
const NOT_AN_OBJECT: &str = "Invalid data. Expected an object.";

/// A request value that may have arrived with the wrong JSON type.
///
/// Deserializing never fails: a value that does not fit `T` becomes
/// `Invalid` and is reported by `validate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lenient<T> {
    Valid(T),
    Invalid,
}

impl<T> From<T> for Lenient<T> {
    fn from(value: T) -> Self {
        Lenient::Valid(value)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Lenient<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(serde_json::from_value(value).map_or(Lenient::Invalid, Lenient::Valid))
    }
}

impl<T: Serialize> Serialize for Lenient<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Lenient::Valid(value) => value.serialize(serializer),
            Lenient::Invalid => serializer.serialize_none(),
        }
    }
}

/// Messages keyed by the request field they refer to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a single message on a single field.
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn into_map(self) -> BTreeMap<String, Vec<String>> {
        self.0
    }

    fn finish<T>(self, value: impl FnOnce() -> T) -> Result<T, Self> {
        if self.is_empty() { Ok(value()) } else { Err(self) }
    }
}

fn require_text(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<Lenient<String>>,
) -> String {
    match value {
        None => {
            errors.add(field, REQUIRED);
            String::new()
        }
        Some(Lenient::Invalid) => {
            errors.add(field, NOT_A_STRING);
            String::new()
        }
        Some(Lenient::Valid(text)) if text.trim().is_empty() => {
            errors.add(field, BLANK);
            String::new()
        }
        Some(Lenient::Valid(text)) => text,
    }
}

/// `POST /upload-initialize`
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct InitializeUploadRequest {
    #[serde(default)]
    pub field_id: Option<Lenient<String>>,
    #[serde(default)]
    pub file_name: Option<Lenient<String>>,
    #[serde(default)]
    pub file_size: Option<Lenient<i64>>,
    #[serde(default)]
    pub content_type: Option<Lenient<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializeUpload {
    pub field_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub content_type: String,
}

impl InitializeUploadRequest {
    pub fn validate(self) -> Result<InitializeUpload, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let field_id = require_text(&mut errors, "field_id", self.field_id);
        let file_name = require_text(&mut errors, "file_name", self.file_name);
        let content_type = require_text(&mut errors, "content_type", self.content_type);
        let file_size = match self.file_size {
            None => {
                errors.add("file_size", REQUIRED);
                0
            }
            Some(Lenient::Invalid) => {
                errors.add("file_size", NOT_AN_INTEGER);
                0
            }
            Some(Lenient::Valid(size)) => match u64::try_from(size) {
                Ok(size) if size >= 1 => size,
                _ => {
                    errors.add(
                        "file_size",
                        "Ensure this value is greater than or equal to 1.",
                    );
                    0
                }
            },
        };

        errors.finish(|| InitializeUpload {
            field_id,
            file_name,
            file_size,
            content_type,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InitializeUploadResponse {
    pub object_key: String,
    pub upload_id: String,
    pub parts: Vec<PresignedPartTransfer>,
    pub upload_signature: String,
}

/// One entry of `parts` in `POST /upload-complete`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TransferredPartRequest {
    #[serde(default)]
    pub part_number: Option<Lenient<i64>>,
    #[serde(default)]
    pub size: Option<Lenient<i64>>,
    #[serde(default)]
    pub etag: Option<Lenient<String>>,
}

/// `POST /upload-complete`
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CompleteUploadRequest {
    #[serde(default)]
    pub upload_signature: Option<Lenient<String>>,
    #[serde(default)]
    pub upload_id: Option<Lenient<String>>,
    #[serde(default)]
    pub parts: Option<Lenient<Vec<Lenient<TransferredPartRequest>>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteUpload {
    pub upload_signature: String,
    pub upload_id: String,
    pub parts: Vec<TransferredPart>,
}

impl CompleteUploadRequest {
    pub fn validate(self) -> Result<CompleteUpload, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let upload_signature = require_text(&mut errors, "upload_signature", self.upload_signature);
        let upload_id = require_text(&mut errors, "upload_id", self.upload_id);

        let mut parts = Vec::new();
        match self.parts {
            None => errors.add("parts", REQUIRED),
            Some(Lenient::Invalid) => errors.add("parts", NOT_A_LIST),
            Some(Lenient::Valid(raw)) if raw.is_empty() => {
                errors.add("parts", "This list may not be empty.")
            }
            Some(Lenient::Valid(raw)) => {
                let mut seen = BTreeSet::new();
                for (index, part) in raw.into_iter().enumerate() {
                    let label = format!("parts[{index}]");
                    let part = match part {
                        Lenient::Valid(part) => validate_part(part),
                        Lenient::Invalid => Err(vec![NOT_AN_OBJECT]),
                    };
                    match part {
                        Ok(part) if !seen.insert(part.part_number) => errors.add(
                            &label,
                            format!("Duplicate part number {}.", part.part_number),
                        ),
                        Ok(part) => parts.push(part),
                        Err(messages) => {
                            for message in messages {
                                errors.add(&label, message);
                            }
                        }
                    }
                }
            }
        }

        errors.finish(|| CompleteUpload {
            upload_signature,
            upload_id,
            parts,
        })
    }
}

fn validate_part(part: TransferredPartRequest) -> Result<TransferredPart, Vec<&'static str>> {
    let mut messages = Vec::new();
    let part_number = match part.part_number {
        Some(Lenient::Valid(number)) => match u32::try_from(number) {
            Ok(number) if number >= 1 => number,
            _ => {
                messages.push("part_number must be a positive integer.");
                0
            }
        },
        Some(Lenient::Invalid) => {
            messages.push("part_number must be a positive integer.");
            0
        }
        None => {
            messages.push("part_number is required.");
            0
        }
    };
    let size = match part.size {
        Some(Lenient::Valid(size)) => match u64::try_from(size) {
            Ok(size) if size >= 1 => size,
            _ => {
                messages.push("size must be greater than or equal to 1.");
                0
            }
        },
        Some(Lenient::Invalid) => {
            messages.push("size must be a valid integer.");
            0
        }
        None => {
            messages.push("size is required.");
            0
        }
    };
    let etag = match part.etag {
        Some(Lenient::Valid(etag)) if !etag.trim().is_empty() => etag,
        _ => {
            messages.push("etag is required.");
            String::new()
        }
    };

    if messages.is_empty() {
        Ok(TransferredPart {
            part_number,
            size,
            etag,
        })
    } else {
        Err(messages)
    }
}

pub type CompleteUploadResponse = PresignedUploadCompletion;

/// `POST /finalize`
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct FinalizeRequest {
    #[serde(default)]
    pub upload_signature: Option<Lenient<String>>,
}

impl FinalizeRequest {
    pub fn validate(self) -> Result<String, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let upload_signature = require_text(&mut errors, "upload_signature", self.upload_signature);
        errors.finish(|| upload_signature)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FinalizeResponse {
    pub field_value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_request_requires_every_field() {
        let errors = InitializeUploadRequest::default().validate().unwrap_err();

        for field in ["field_id", "file_name", "file_size", "content_type"] {
            assert_eq!(errors.get(field), Some(&[REQUIRED.to_string()][..]), "{field}");
        }
    }

    #[test]
    fn initialize_request_rejects_empty_files() {
        let errors = InitializeUploadRequest {
            field_id: Some(String::from("f").into()),
            file_name: Some(String::from("a.txt").into()),
            file_size: Some(Lenient::Valid(0)),
            content_type: Some(String::from("text/plain").into()),
        }
        .validate()
        .unwrap_err();

        assert_eq!(errors.into_map().keys().collect::<Vec<_>>(), vec!["file_size"]);
    }

    #[test]
    fn initialize_request_accepts_valid_input() {
        let request: InitializeUploadRequest = serde_json::from_str(
            r#"{"field_id":"f","file_name":"a.txt","file_size":10,"content_type":"text/plain"}"#,
        )
        .unwrap();

        assert_eq!(
            request.validate().unwrap(),
            InitializeUpload {
                field_id: "f".into(),
                file_name: "a.txt".into(),
                file_size: 10,
                content_type: "text/plain".into(),
            }
        );
    }

    #[test]
    fn complete_request_reports_bad_parts_by_index() {
        let request: CompleteUploadRequest = serde_json::from_str(
            r#"{
                "upload_signature": "sig",
                "upload_id": "u",
                "parts": [
                    {"part_number": 1, "size": 5, "etag": "\"a\""},
                    {"part_number": 0, "size": 5, "etag": ""},
                    {"part_number": 1, "size": 5, "etag": "\"b\""}
                ]
            }"#,
        )
        .unwrap();

        let errors = request.validate().unwrap_err();

        assert!(errors.get("parts[0]").is_none());
        assert_eq!(errors.get("parts[1]").unwrap().len(), 2);
        assert_eq!(
            errors.get("parts[2]").unwrap(),
            &["Duplicate part number 1.".to_string()][..]
        );
    }

    #[test]
    fn wrongly_typed_fields_are_field_errors() {
        let request: InitializeUploadRequest = serde_json::from_str(
            r#"{"field_id":7,"file_name":"a.txt","file_size":"abc","content_type":null}"#,
        )
        .unwrap();

        let errors = request.validate().unwrap_err();

        assert_eq!(errors.get("field_id"), Some(&[NOT_A_STRING.to_string()][..]));
        assert_eq!(errors.get("file_size"), Some(&[NOT_AN_INTEGER.to_string()][..]));
        assert_eq!(errors.get("content_type"), Some(&[REQUIRED.to_string()][..]));
        assert!(errors.get("file_name").is_none());
    }

    #[test]
    fn wrongly_typed_parts_are_reported_by_index() {
        let request: CompleteUploadRequest = serde_json::from_str(
            r#"{
                "upload_signature": "sig",
                "upload_id": "u",
                "parts": [
                    "not a part",
                    {"part_number": "one", "size": 1.5, "etag": "\"a\""}
                ]
            }"#,
        )
        .unwrap();

        let errors = request.validate().unwrap_err();

        assert_eq!(errors.get("parts[0]"), Some(&[NOT_AN_OBJECT.to_string()][..]));
        assert_eq!(errors.get("parts[1]").unwrap().len(), 2);

        let request: CompleteUploadRequest =
            serde_json::from_str(r#"{"upload_signature":"sig","upload_id":"u","parts":{}}"#).unwrap();
        assert_eq!(
            request.validate().unwrap_err().get("parts"),
            Some(&[NOT_A_LIST.to_string()][..])
        );
    }

    #[test]
    fn complete_request_rejects_empty_part_list() {
        let errors = CompleteUploadRequest {
            upload_signature: Some(String::from("sig").into()),
            upload_id: Some(String::from("u").into()),
            parts: Some(Vec::new().into()),
        }
        .validate()
        .unwrap_err();

        assert!(errors.get("parts").is_some());
    }

    #[test]
    fn finalize_request_rejects_blank_signature() {
        let errors = FinalizeRequest {
            upload_signature: Some(String::from("  ").into()),
        }
        .validate()
        .unwrap_err();

        assert_eq!(errors.get("upload_signature"), Some(&[BLANK.to_string()][..]));
    }

    #[test]
    fn validation_errors_serialize_as_a_plain_map() {
        let errors = ValidationErrors::single("field_id", "Invalid field ID: \"x\".");
        assert_eq!(
            serde_json::to_value(&errors).unwrap(),
            serde_json::json!({"field_id": ["Invalid field ID: \"x\"."]})
        );
    }
}
