//! Typed extension points.
//!
//! Each pipeline event carries a fixed, mutable context type. Observers run in
//! registration order and may change any field the pipeline reads back after
//! firing (e.g. override the gravity before a crop, or inject a different
//! storage backend at construction). With no observers every event is a
//! pass-through.
//!
//! | Event | Context | Fired |
//! |---|---|---|
//! | `uploader_constructed` | [`UploaderConstructed`] | once, in `UploaderBuilder::build` |
//! | `before_upload` | [`BeforeUpload`] | after input normalization, before validation |
//! | `after_upload` | [`AfterUpload`] | after cleanup of a successful upload |
//! | `before_crop` | [`BeforeCrop`] | before `crop_or_resize` touches pixels |
//! | `before_resize_crop` | [`BeforeResizeCrop`] | before `resize_and_crop` plans geometry |
//! | `on_resize` | [`OnResize`] | before the precondition resize of a dimension-constrained upload |

use crate::imaging::{Dimension, Gravity};
use crate::storage::StorageBackend;
use crate::upload::UploadOptions;
use crate::validate::FileKind;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

type Observer<C> = Box<dyn Fn(&mut C) + Send + Sync>;

/// Ordered observers for one event.
pub struct Observers<C> {
    observers: Vec<Observer<C>>,
}

impl<C> Observers<C> {
    pub fn register(&mut self, observer: impl Fn(&mut C) + Send + Sync + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn fire(&self, context: &mut C) {
        for observer in &self.observers {
            observer(context);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl<C> Default for Observers<C> {
    fn default() -> Self {
        Self {
            observers: Vec::new(),
        }
    }
}

impl<C> fmt::Debug for Observers<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observers({})", self.observers.len())
    }
}

/// Context for `uploader_constructed`. Replacing `storage` swaps the backend.
pub struct UploaderConstructed {
    pub storage: Arc<dyn StorageBackend>,
}

/// Context for `before_upload`.
#[derive(Debug, Clone)]
pub struct BeforeUpload {
    /// Name the file will be validated and stored under.
    pub filename: String,
    pub options: UploadOptions,
}

/// Context for `after_upload`.
#[derive(Debug, Clone)]
pub struct AfterUpload {
    pub key: String,
    pub kind: FileKind,
    pub version_keys: Vec<String>,
    pub thumbnail_key: Option<String>,
}

/// Context for `before_crop`.
#[derive(Debug, Clone)]
pub struct BeforeCrop {
    pub source: PathBuf,
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
    /// Straight resize instead of a crop.
    pub resize: bool,
}

/// Context for `before_resize_crop`.
#[derive(Debug, Clone)]
pub struct BeforeResizeCrop {
    pub source: PathBuf,
    pub width: Dimension,
    pub height: Dimension,
    pub gravity: Gravity,
}

/// Context for `on_resize`.
#[derive(Debug, Clone)]
pub struct OnResize {
    pub source: PathBuf,
    pub width: Dimension,
    pub height: Dimension,
}

/// Registry of all extension points.
#[derive(Debug, Default)]
pub struct Hooks {
    pub uploader_constructed: Observers<UploaderConstructed>,
    pub before_upload: Observers<BeforeUpload>,
    pub after_upload: Observers<AfterUpload>,
    pub before_crop: Observers<BeforeCrop>,
    pub before_resize_crop: Observers<BeforeResizeCrop>,
    pub on_resize: Observers<OnResize>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }
}
