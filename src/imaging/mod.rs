//! Image processing: geometry planning plus a pluggable raster codec.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::ImageReader` / `usvg::Tree` size |
//! | **Rasterise SVG** | `resvg::render` onto a `tiny_skia::Pixmap` |
//! | **Resize** | `resize_exact` with Lanczos3 |
//! | **Resize + crop** | `resize_exact` then `crop_imm` on the scaled canvas |
//!
//! The module is split into:
//! - **Geometry**: pure dimension and gravity math (unit testable)
//! - **Parameters**: data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: the transform service combining geometry + backend

pub mod backend;
pub mod geometry;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{Dimensions, ImageBackend, TransformError};
pub use geometry::{
    Dimension, Gravity, HorizontalAlign, ResizePlan, VerticalAlign, compute_crop_offset,
    compute_proportional_resize, format_normalize, format_normalize_key, is_vector,
    proportional_edge, resolve_relative_dimension,
};
pub use operations::{
    OutputTarget, Thumbnail, TransformPlan, apply_version, crop_or_resize, generate_thumbnail,
    plan_transform, resize_and_crop,
};
pub use params::{CropParams, CropRegion, Quality, ResizeCropParams, ResizeParams};
pub use rust_backend::RustBackend;
