//! Upload parameters, file-type validation and storage naming

use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use dataport_common::config::StorageConfig;
use dataport_common::error::{Error, Result};

/// A file held in memory, ready to upload
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    /// Original file name, only its extension is kept in storage
    pub name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl FileUpload {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }
}

/// One file or a batch
#[derive(Debug, Clone, PartialEq)]
pub enum FileInput {
    One(FileUpload),
    Many(Vec<FileUpload>),
}

impl FileInput {
    pub fn files(&self) -> &[FileUpload] {
        match self {
            Self::One(file) => std::slice::from_ref(file),
            Self::Many(files) => files,
        }
    }

    pub fn is_single(&self) -> bool {
        matches!(self, Self::One(_))
    }
}

/// Parameters of an upload call
#[derive(Debug, Clone, PartialEq)]
pub struct UploadParams {
    pub file: FileInput,
    /// Forwarded with the upload
    pub metadata: Option<JsonValue>,
    /// Merged over the adapter's default storage config for this call only
    pub storage: Option<StorageConfig>,
}

impl UploadParams {
    pub fn single(file: FileUpload) -> Self {
        Self {
            file: FileInput::One(file),
            metadata: None,
            storage: None,
        }
    }

    pub fn many(files: Vec<FileUpload>) -> Self {
        Self {
            file: FileInput::Many(files),
            metadata: None,
            storage: None,
        }
    }

    #[must_use]
    pub fn metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.storage = Some(storage);
        self
    }

    /// The storage config in effect for this call
    pub fn effective_storage(&self, default: &StorageConfig) -> StorageConfig {
        match &self.storage {
            Some(overlay) => default.merge(overlay),
            None => default.clone(),
        }
    }
}

/// Description of a stored object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub file_name: String,
    pub original_name: String,
    pub path: String,
    pub url: String,
    pub content_type: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
}

/// Reject the batch if it is empty or any file type is not allowed
pub fn validate_files(files: &[FileUpload], storage: &StorageConfig) -> Result<()> {
    if files.is_empty() {
        return Err(Error::NoFiles);
    }
    if let Some(allowed) = &storage.allowed_types {
        if let Some(file) = files.iter().find(|f| !storage.is_type_allowed(&f.content_type)) {
            return Err(Error::InvalidFileType {
                file_type: file.content_type.clone(),
                allowed: allowed.clone(),
            });
        }
    }
    Ok(())
}

/// Fresh random name that keeps the original extension
pub fn generate_file_name(original: &str) -> String {
    let extension = Path::new(original)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .unwrap_or("unknown");
    format!("{}.{extension}", Uuid::new_v4())
}

/// `{resource}/[{directory}/]{file_name}`
pub fn storage_path(resource: &str, storage: &StorageConfig, file_name: &str) -> String {
    match storage
        .directory
        .as_deref()
        .map(|d| d.trim_matches('/'))
        .filter(|d| !d.is_empty())
    {
        Some(directory) => format!("{resource}/{directory}/{file_name}"),
        None => format!("{resource}/{file_name}"),
    }
}
