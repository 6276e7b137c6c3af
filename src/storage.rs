//! Storage backend contract and the local-disk implementation.
//!
//! The pipeline only talks to [`StorageBackend`]; keys are `/`-separated,
//! storage-relative and backend independent. A local directory and an object
//! store are interchangeable behind the trait, and which one an
//! [`Uploader`](crate::upload::Uploader) uses is decided when it is built.

use crate::imaging::format_normalize_key;
use crate::naming::{join_key, resolve_unique_name, sanitize_folder, split_key, split_name};
use crate::validate::{FileKind, classify};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid storage key: '{0}'")]
    InvalidKey(String),
    #[error("Key already exists: '{0}'")]
    Conflict(String),
    #[error("Key not found: '{0}'")]
    NotFound(String),
}

/// Bytes to persist.
#[derive(Debug, Clone, Copy)]
pub enum FileSource<'a> {
    Path(&'a Path),
    Bytes(&'a [u8]),
}

/// Per-call persistence flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Keep the requested name even if an entry already exists (overwrite).
    pub same_name: bool,
    /// The file is a derived thumbnail.
    pub is_thumb: bool,
}

/// A persisted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredFile {
    /// Storage-relative key, possibly renamed to avoid a collision.
    pub key: String,
    pub kind: FileKind,
    pub has_thumb: bool,
    pub size: u64,
    /// SHA-256 of the stored bytes, lowercase hex.
    pub checksum: String,
}

/// Storage backend contract.
pub trait StorageBackend: Send + Sync {
    /// Persist `source` under `key`.
    ///
    /// Without `same_name` the backend picks a collision-free key and must
    /// create it atomically, reporting a lost race as
    /// [`StorageError::Conflict`].
    fn add_file(
        &self,
        source: FileSource<'_>,
        key: &str,
        options: AddOptions,
    ) -> Result<StoredFile, StorageError>;

    /// Key for the derived version `token` of `key`.
    fn version_path(&self, key: &str, token: &str) -> String;

    /// Whether `folder` is acceptable as a target folder.
    fn valid_folder_path(&self, folder: &str) -> bool;

    fn delete(&self, key: &str) -> Result<(), StorageError>;

    fn exists(&self, key: &str) -> bool;

    /// Local filesystem path of `key`, for backends that have one.
    fn local_path(&self, _key: &str) -> Option<PathBuf> {
        None
    }
}

/// SHA-256 of `data` as lowercase hex.
pub fn calculate_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Default version key scheme: `dir/stem-TOKEN.ext`, vectors as `png`.
pub fn default_version_path(key: &str, token: &str) -> String {
    let (folder, name) = split_key(key);
    let versioned = match split_name(name) {
        (stem, Some(ext)) => format!("{stem}-{token}.{ext}"),
        (stem, None) => format!("{stem}-{token}"),
    };
    format_normalize_key(&join_key(folder, &versioned))
}

/// Storage rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn checked_key(key: &str) -> Result<String, StorageError> {
        match sanitize_folder(key) {
            Ok(clean) if !clean.is_empty() => Ok(clean),
            _ => Err(StorageError::InvalidKey(key.to_string())),
        }
    }

    fn full_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(Self::checked_key(key)?))
    }
}

/// Create `path` only if it does not exist yet.
fn write_new(path: &Path, data: &[u8], key: &str) -> Result<(), StorageError> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(StorageError::Conflict(key.to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    file.write_all(data)?;
    Ok(())
}

impl StorageBackend for LocalStorage {
    fn add_file(
        &self,
        source: FileSource<'_>,
        key: &str,
        options: AddOptions,
    ) -> Result<StoredFile, StorageError> {
        let key = Self::checked_key(key)?;
        let (folder, name) = split_key(&key);
        let dir = self.root.join(folder);
        fs::create_dir_all(&dir)?;

        let final_name = if options.same_name {
            name.to_string()
        } else {
            resolve_unique_name(&dir, name)?
        };
        let final_key = join_key(folder, &final_name);
        let path = dir.join(&final_name);

        let data: Cow<'_, [u8]> = match source {
            FileSource::Bytes(bytes) => Cow::Borrowed(bytes),
            FileSource::Path(src) => Cow::Owned(fs::read(src)?),
        };

        if options.same_name {
            fs::write(&path, &data)?;
        } else {
            write_new(&path, &data, &final_key)?;
        }

        let stored = StoredFile {
            kind: classify(&final_name),
            has_thumb: false,
            size: data.len() as u64,
            checksum: calculate_checksum(&data),
            key: final_key,
        };
        info!(key = %stored.key, size = stored.size, thumb = options.is_thumb, "Stored file");
        Ok(stored)
    }

    fn version_path(&self, key: &str, token: &str) -> String {
        default_version_path(key, token)
    }

    fn valid_folder_path(&self, folder: &str) -> bool {
        sanitize_folder(folder).is_ok()
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.full_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(key = %key, "Deleted file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &str) -> bool {
        self.full_path(key).is_ok_and(|p| p.is_file())
    }

    fn local_path(&self, key: &str) -> Option<PathBuf> {
        self.full_path(key).ok()
    }
}
