//! Image codec backend trait and shared types.
//!
//! The [`ImageBackend`] trait is the raster codec black box: it can report a
//! source's dimensions and execute the three pixel operations the transform
//! service plans (straight resize, resize-then-crop, crop). Everything that
//! decides *which* operation to run and with *what* numbers lives in
//! [`operations`](super::operations) and [`geometry`](super::geometry).
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend).

use super::params::{CropParams, ResizeCropParams, ResizeParams};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },
    #[error("Failed to encode {path}: {reason}")]
    Encode { path: PathBuf, reason: String },
    #[error("Invalid target dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn as_tuple(self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Trait for image codec backends.
///
/// Implementations must write the output in the format implied by the output
/// path's extension, and must tolerate `output == source`.
pub trait ImageBackend: Send + Sync {
    /// Get image dimensions. Fails if the source cannot be decoded.
    fn identify(&self, path: &Path) -> Result<Dimensions, TransformError>;

    /// Resize to exactly `width`x`height`, ignoring the aspect ratio.
    fn resize(&self, params: &ResizeParams) -> Result<(), TransformError>;

    /// Resize to the cover canvas, then crop the region from it.
    fn resize_crop(&self, params: &ResizeCropParams) -> Result<(), TransformError>;

    /// Crop a region from the unscaled source.
    fn crop(&self, params: &CropParams) -> Result<(), TransformError>;
}
