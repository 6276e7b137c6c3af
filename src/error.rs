//! Error taxonomy for the upload pipeline.
//!
//! Validation errors (`EmptyInput`, `PathTraversal`, `Format`, `Size`) are
//! raised before anything is persisted. The pipeline's public entry points
//! never return these as `Err`: they are carried as data inside
//! [`UploadOutcome`](crate::upload::UploadOutcome) and
//! [`Materialized`](crate::materialize::Materialized).
//!
//! Every message combines the error kind with the constraint that was broken,
//! so it can be shown to a user as-is.

use crate::imaging::TransformError;
use crate::storage::StorageError;
use crate::validate::format_size;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Empty input: {0}")]
    EmptyInput(String),
    #[error("Path traversal rejected: '{path}'")]
    PathTraversal { path: String },
    #[error("File format not allowed: '{format}' (allowed: {allowed})")]
    Format { format: String, allowed: String },
    #[error("File too large: {} exceeds the maximum of {}", format_size(*size), format_size(*maximum))]
    Size { size: u64, maximum: u64 },
    #[error("Image transform failed: {0}")]
    Transform(#[from] TransformError),
    #[error("Could not materialize temporary file: {0}")]
    Materialization(String),
    #[error("Name collision while creating '{key}'")]
    NameResolutionConflict { key: String },
    #[error("Storage error: {0}")]
    Storage(StorageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Uploader setup failed: {0}")]
    Setup(String),
}

impl From<StorageError> for UploadError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(key) => UploadError::NameResolutionConflict { key },
            StorageError::InvalidKey(path) => UploadError::PathTraversal { path },
            other => UploadError::Storage(other),
        }
    }
}

impl UploadError {
    /// Whether this error was raised by input validation (nothing persisted).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            UploadError::EmptyInput(_)
                | UploadError::PathTraversal { .. }
                | UploadError::Format { .. }
                | UploadError::Size { .. }
        )
    }
}
