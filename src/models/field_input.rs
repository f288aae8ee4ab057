//! Turning submitted form data into a trusted field value.
//!
//! Application code that accepts an upload field from a form or API payload
//! resolves it here. Only signed field values are accepted; a raw object key
//! is never trusted.

use crate::services::signing::{FieldValue, Signer};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldInputError {
    #[error("Not a valid signed upload. Ensure that the upload flow is correct.")]
    InvalidValue,
    #[error("Please either submit a file or check the clear checkbox, not both.")]
    Contradiction,
    #[error("This field is required.")]
    Required,
}

/// What the submitted data asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldInput {
    /// Nothing submitted; keep any existing value.
    Unchanged,

    /// Remove the existing value.
    Clear,

    /// Store this verified upload.
    Upload(FieldValue),
}

/// Resolve a submitted field.
///
/// `submitted` is the raw string sent for the field (`None` when absent,
/// empty when left blank). `clear_requested` is the state of the field's
/// clear checkbox, which only optional fields honour. Submitting a new
/// upload while also asking to clear is rejected rather than guessing which
/// one was meant.
pub fn resolve_field_input(
    signer: &Signer,
    submitted: Option<&str>,
    clear_requested: bool,
    required: bool,
) -> Result<FieldInput, FieldInputError> {
    let upload = match submitted {
        None | Some("") => None,
        Some(token) => Some(
            FieldValue::from_token(signer, token).map_err(|_| FieldInputError::InvalidValue)?,
        ),
    };

    match (upload, clear_requested && !required) {
        (Some(_), true) => Err(FieldInputError::Contradiction),
        (Some(value), false) => Ok(FieldInput::Upload(value)),
        (None, true) => Ok(FieldInput::Clear),
        (None, false) => Ok(FieldInput::Unchanged),
    }
}

/// Resolve the value for a brand-new record, where a required field must be present.
pub fn resolve_new_field_input(
    signer: &Signer,
    submitted: Option<&str>,
    required: bool,
) -> Result<Option<FieldValue>, FieldInputError> {
    match resolve_field_input(signer, submitted, false, required)? {
        FieldInput::Upload(value) => Ok(Some(value)),
        FieldInput::Unchanged | FieldInput::Clear if required => Err(FieldInputError::Required),
        FieldInput::Unchanged | FieldInput::Clear => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(signer: &Signer) -> String {
        FieldValue {
            object_key: "uploads/u/a.txt".into(),
            file_size: 3,
        }
        .mint(signer)
        .unwrap()
    }

    #[test]
    fn accepts_signed_values() {
        let signer = Signer::new("s");
        let token = token(&signer);

        let input = resolve_field_input(&signer, Some(&token), false, true).unwrap();

        assert_eq!(
            input,
            FieldInput::Upload(FieldValue {
                object_key: "uploads/u/a.txt".into(),
                file_size: 3
            })
        );
    }

    #[test]
    fn rejects_raw_object_keys() {
        let signer = Signer::new("s");
        assert_eq!(
            resolve_field_input(&signer, Some("uploads/u/a.txt"), false, false),
            Err(FieldInputError::InvalidValue)
        );
    }

    #[test]
    fn upload_and_clear_together_is_a_contradiction() {
        let signer = Signer::new("s");
        let token = token(&signer);
        assert_eq!(
            resolve_field_input(&signer, Some(&token), true, false),
            Err(FieldInputError::Contradiction)
        );
    }

    #[test]
    fn clear_and_blank_inputs() {
        let signer = Signer::new("s");
        assert_eq!(
            resolve_field_input(&signer, Some(""), true, false),
            Ok(FieldInput::Clear)
        );
        assert_eq!(
            resolve_field_input(&signer, None, false, false),
            Ok(FieldInput::Unchanged)
        );
        // Required fields cannot be cleared.
        assert_eq!(
            resolve_field_input(&signer, None, true, true),
            Ok(FieldInput::Unchanged)
        );
    }

    #[test]
    fn new_records_require_required_fields() {
        let signer = Signer::new("s");
        assert_eq!(
            resolve_new_field_input(&signer, Some(""), true),
            Err(FieldInputError::Required)
        );
        assert_eq!(resolve_new_field_input(&signer, None, false), Ok(None));
        assert!(matches!(
            resolve_new_field_input(&signer, Some(&token(&signer)), true),
            Ok(Some(_))
        ));
    }
}
