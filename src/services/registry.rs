//! Registry of upload-enabled fields.
//!
//! Built once during startup and immutable afterwards; handlers receive it
//! through application state.

use crate::services::{multipart::MultipartManager, storage::Backend};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

pub const DEFAULT_STORAGE: &str = "default";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("field `{field_id}` refers to unknown storage `{storage}`")]
    UnknownStorage { field_id: String, storage: String },
    #[error("field ID must not be empty")]
    EmptyFieldId,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FileNameError {
    #[error("File name must not be empty.")]
    Empty,
    #[error("File name is not valid.")]
    Invalid,
}

/// Where uploads for one field are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub id: String,

    /// Name of the storage target uploads go to.
    pub storage: String,

    /// Key prefix owned by this field.
    pub key_namespace: String,
}

impl FieldDefinition {
    pub fn new(id: impl Into<String>, key_namespace: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            storage: DEFAULT_STORAGE.to_string(),
            key_namespace: key_namespace.into(),
        }
    }

    pub fn with_storage(mut self, storage: impl Into<String>) -> Self {
        self.storage = storage.into();
        self
    }

    /// `{upload_prefix}/{key_namespace}/{uuid}/{file_name}`, skipping empty segments.
    ///
    /// Only the final path component of `file_name` is kept.
    pub fn generate_object_key(
        &self,
        upload_prefix: &str,
        file_name: &str,
    ) -> Result<String, FileNameError> {
        let base_name = sanitize_file_name(file_name)?;
        let uuid = Uuid::new_v4().to_string();

        let key = [upload_prefix, self.key_namespace.as_str()]
            .into_iter()
            .flat_map(|segment| segment.split('/'))
            .filter(|segment| !segment.is_empty())
            .chain([uuid.as_str(), base_name])
            .collect::<Vec<_>>()
            .join("/");
        Ok(key)
    }
}

fn sanitize_file_name(file_name: &str) -> Result<&str, FileNameError> {
    if file_name.is_empty() {
        return Err(FileNameError::Empty);
    }
    let base_name = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);
    if base_name.is_empty() || base_name == "." || base_name == ".." {
        return Err(FileNameError::Invalid);
    }
    if base_name.bytes().any(|b| b.is_ascii_control()) {
        return Err(FileNameError::Invalid);
    }
    Ok(base_name)
}

/// Field IDs mapped to their storage and namespace.
#[derive(Debug)]
pub struct FieldRegistry<M = MultipartManager<Backend>> {
    fields: HashMap<String, FieldDefinition>,
    storages: BTreeMap<String, Arc<M>>,
}

impl<M> Default for FieldRegistry<M> {
    fn default() -> Self {
        Self {
            fields: HashMap::new(),
            storages: BTreeMap::new(),
        }
    }
}

impl<M> FieldRegistry<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a storage target available to fields under `name`.
    pub fn with_storage(mut self, name: impl Into<String>, manager: M) -> Self {
        self.storages.insert(name.into(), Arc::new(manager));
        self
    }

    /// Register a field. Re-registering an ID with a different definition
    /// overwrites it and logs a warning.
    pub fn register(&mut self, field: FieldDefinition) -> Result<(), RegistryError> {
        if field.id.is_empty() {
            return Err(RegistryError::EmptyFieldId);
        }
        if !self.storages.contains_key(&field.storage) {
            return Err(RegistryError::UnknownStorage {
                field_id: field.id,
                storage: field.storage,
            });
        }
        if let Some(existing) = self.fields.get(&field.id) {
            if existing != &field {
                warn!(field_id = %field.id, "overwriting existing upload field declaration");
            }
        }
        self.fields.insert(field.id.clone(), field);
        Ok(())
    }

    pub fn field(&self, field_id: &str) -> Option<&FieldDefinition> {
        self.fields.get(field_id)
    }

    /// Storage target for a registered field.
    pub fn manager_for(&self, field: &FieldDefinition) -> Option<&Arc<M>> {
        self.storages.get(&field.storage)
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.values()
    }

    /// Each distinct storage target, by name.
    pub fn storages(&self) -> impl Iterator<Item = (&str, &Arc<M>)> {
        self.storages.iter().map(|(name, manager)| (name.as_str(), manager))
    }
}
