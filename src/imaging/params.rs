//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the [`operations`](super::operations) module (which
//! plans geometry and picks output paths) and the [`backend`](super::backend)
//! (which does the pixel work). Swapping the backend for a recording mock
//! leaves the planning logic untouched.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`CropRegion`]: A window on a canvas: offset plus size.
//! - [`ResizeParams`]: Straight resize to an exact size.
//! - [`ResizeCropParams`]: Resize to a cover canvas, then crop a window from it.
//! - [`CropParams`]: Crop a window from the unscaled source.

use std::path::PathBuf;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// A crop window, in pixels of the canvas it is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Parameters for a straight (non-proportional) resize.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeParams {
    pub source: PathBuf,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub quality: Quality,
}

/// Parameters for resize-then-crop.
///
/// The crop region is expressed on the *resized* canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeCropParams {
    pub source: PathBuf,
    pub output: PathBuf,
    pub resize_width: u32,
    pub resize_height: u32,
    pub crop: CropRegion,
    pub quality: Quality,
}

/// Parameters for a crop at fixed offsets on the source canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct CropParams {
    pub source: PathBuf,
    pub output: PathBuf,
    pub crop: CropRegion,
    pub quality: Quality,
}
