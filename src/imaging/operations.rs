//! Image transform operations.
//!
//! These functions combine the geometry planning with backend execution:
//! identify the source, fire the matching hook, plan the pixel work, pick an
//! output path and hand the parameters to the [`ImageBackend`].
//!
//! Output paths always go through [`format_normalize`], so a vector source
//! produces a raster file next to it rather than overwriting it.

use super::backend::{Dimensions, ImageBackend, TransformError};
use super::geometry::{
    Dimension, Gravity, compute_crop_offset, compute_proportional_resize, format_normalize,
    proportional_edge, resolve_relative_dimension,
};
use super::params::{CropParams, CropRegion, Quality, ResizeCropParams, ResizeParams};
use crate::hooks::{BeforeCrop, BeforeResizeCrop, Hooks, OnResize};
use crate::naming::{resolve_unique_name, thumb_key, with_suffix};
use crate::versions::{VersionMode, VersionSpec};
use std::path::{Path, PathBuf};

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, TransformError>;

/// Where a transform writes its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Replace the source file.
    Overwrite,
    /// Write to an explicit path.
    Named(PathBuf),
    /// `crop_<name>` next to the source, collision-free.
    AutoCrop,
}

/// Pixel work planned against a known source size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformPlan {
    /// Scale to `resize`, then cut `crop` out of the scaled canvas.
    ResizeCrop { resize: (u32, u32), crop: CropRegion },
    /// Straight resize.
    Resize { width: u32, height: u32 },
}

impl TransformPlan {
    /// Size of the written image.
    pub fn output_dimensions(&self) -> (u32, u32) {
        match *self {
            TransformPlan::ResizeCrop { crop, .. } => (crop.width, crop.height),
            TransformPlan::Resize { width, height } => (width, height),
        }
    }
}

fn check_source(original: Dimensions) -> Result<()> {
    if original.width == 0 || original.height == 0 {
        return Err(TransformError::InvalidDimensions {
            width: original.width,
            height: original.height,
        });
    }
    Ok(())
}

fn reject_zero(width: Option<u32>, height: Option<u32>) -> Result<()> {
    if width == Some(0) || height == Some(0) {
        return Err(TransformError::InvalidDimensions {
            width: width.unwrap_or(0),
            height: height.unwrap_or(0),
        });
    }
    Ok(())
}

/// Resolve a pair of requested edges into a concrete size, deriving a missing
/// edge from the source aspect ratio. Both missing means the original size.
fn resolve_pair(original: Dimensions, width: Option<u32>, height: Option<u32>) -> (u32, u32) {
    let (ow, oh) = original.as_tuple();
    match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, proportional_edge(ow, w, oh)),
        (None, Some(h)) => (proportional_edge(oh, h, ow), h),
        (None, None) => (ow, oh),
    }
}

/// Plan a fit-and-crop.
///
/// Both edges known: cover-resize so the scaled source fully contains the
/// target box, then crop the box at the gravity anchor. One edge known: a
/// proportional resize. Neither: the original size. Crop offsets are always
/// computed on the resized canvas.
pub fn plan_transform(
    original: Dimensions,
    width: Dimension,
    height: Dimension,
    gravity: Gravity,
) -> Result<TransformPlan> {
    check_source(original)?;
    let (ow, oh) = original.as_tuple();
    let w = resolve_relative_dimension(ow, width);
    let h = resolve_relative_dimension(oh, height);
    reject_zero(w, h)?;

    match (w, h) {
        (Some(tw), Some(th)) => {
            let scaled = compute_proportional_resize(ow, oh, tw, th).scaled_dimensions((tw, th));
            let (x, y) = compute_crop_offset(gravity, scaled, (tw, th));
            Ok(TransformPlan::ResizeCrop {
                resize: scaled,
                crop: CropRegion {
                    x,
                    y,
                    width: tw,
                    height: th,
                },
            })
        }
        _ => {
            let (width, height) = resolve_pair(original, w, h);
            Ok(TransformPlan::Resize { width, height })
        }
    }
}

/// Plan a straight resize: exact edges are honoured as given, a missing edge
/// follows the aspect ratio.
pub fn plan_resize(original: Dimensions, width: Dimension, height: Dimension) -> Result<TransformPlan> {
    check_source(original)?;
    let w = resolve_relative_dimension(original.width, width);
    let h = resolve_relative_dimension(original.height, height);
    reject_zero(w, h)?;
    let (width, height) = resolve_pair(original, w, h);
    Ok(TransformPlan::Resize { width, height })
}

/// Run a plan through the backend.
pub fn execute_plan(
    backend: &impl ImageBackend,
    source: &Path,
    output: &Path,
    plan: &TransformPlan,
    quality: Quality,
) -> Result<()> {
    match *plan {
        TransformPlan::ResizeCrop { resize, crop } => backend.resize_crop(&ResizeCropParams {
            source: source.to_path_buf(),
            output: output.to_path_buf(),
            resize_width: resize.0,
            resize_height: resize.1,
            crop,
            quality,
        }),
        TransformPlan::Resize { width, height } => backend.resize(&ResizeParams {
            source: source.to_path_buf(),
            output: output.to_path_buf(),
            width,
            height,
            quality,
        }),
    }
}

/// Concrete output path for `target`, vector extensions normalized.
pub fn resolve_output(source: &Path, target: &OutputTarget) -> Result<PathBuf> {
    match target {
        OutputTarget::Overwrite => Ok(format_normalize(source)),
        OutputTarget::Named(path) => Ok(format_normalize(path)),
        OutputTarget::AutoCrop => {
            let dir = source.parent().unwrap_or_else(|| Path::new(""));
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| {
                    TransformError::ProcessingFailed(format!(
                        "{} has no file name",
                        source.display()
                    ))
                })?;
            let desired = format_normalize(Path::new(&format!("crop_{name}")));
            let unique = resolve_unique_name(dir, &desired.to_string_lossy())?;
            Ok(dir.join(unique))
        }
    }
}

/// Fit the source into `width`x`height` and crop at `gravity`.
///
/// Wildcard edges are resolved against the decoded size. Observers of
/// `before_resize_crop` may change the requested edges and the gravity.
/// Returns the path that was written.
#[allow(clippy::too_many_arguments)]
pub fn resize_and_crop(
    backend: &impl ImageBackend,
    hooks: &Hooks,
    source: &Path,
    width: Dimension,
    height: Dimension,
    gravity: Gravity,
    target: &OutputTarget,
    quality: Quality,
) -> Result<PathBuf> {
    let mut ctx = BeforeResizeCrop {
        source: source.to_path_buf(),
        width,
        height,
        gravity,
    };
    hooks.before_resize_crop.fire(&mut ctx);

    let original = backend.identify(source)?;
    let plan = plan_transform(original, ctx.width, ctx.height, ctx.gravity)?;
    let output = resolve_output(source, target)?;
    execute_plan(backend, source, &output, &plan, quality)?;
    Ok(output)
}

/// Straight resize to `width`x`height`, missing edges proportional.
///
/// Fires `on_resize` before identifying the source.
pub fn resize(
    backend: &impl ImageBackend,
    hooks: &Hooks,
    source: &Path,
    width: Dimension,
    height: Dimension,
    target: &OutputTarget,
    quality: Quality,
) -> Result<PathBuf> {
    let mut ctx = OnResize {
        source: source.to_path_buf(),
        width,
        height,
    };
    hooks.on_resize.fire(&mut ctx);

    let original = backend.identify(source)?;
    let plan = plan_resize(original, ctx.width, ctx.height)?;
    let output = resolve_output(source, target)?;
    execute_plan(backend, source, &output, &plan, quality)?;
    Ok(output)
}

/// Apply one [`VersionSpec`] to `source`, writing to `target`.
pub fn apply_version(
    backend: &impl ImageBackend,
    hooks: &Hooks,
    source: &Path,
    spec: &VersionSpec,
    gravity: Gravity,
    target: &OutputTarget,
    quality: Quality,
) -> Result<PathBuf> {
    match spec.mode {
        VersionMode::Crop => resize_and_crop(
            backend,
            hooks,
            source,
            spec.width,
            spec.height,
            gravity,
            target,
            quality,
        ),
        VersionMode::Resize => resize(backend, hooks, source, spec.width, spec.height, target, quality),
    }
}

/// Crop at fixed offsets, or straight-resize, without proportional fitting.
///
/// Exact edges are used as given. A wildcard or missing edge is resolved
/// against the source: when resizing it follows the aspect ratio, when
/// cropping it runs from the offset to the far edge. With `replace` the
/// source is rewritten in place, otherwise a `_crop` sibling is written.
#[allow(clippy::too_many_arguments)]
pub fn crop_or_resize(
    backend: &impl ImageBackend,
    hooks: &Hooks,
    source: &Path,
    width: Dimension,
    height: Dimension,
    x_offset: u32,
    y_offset: u32,
    resize_flag: bool,
    replace_flag: bool,
    quality: Quality,
) -> Result<PathBuf> {
    let original = backend.identify(source)?;
    check_source(original)?;
    let (ow, oh) = original.as_tuple();

    let w = resolve_relative_dimension(ow, width);
    let h = resolve_relative_dimension(oh, height);
    let (w, h) = if resize_flag {
        resolve_pair(original, w, h)
    } else {
        (
            w.unwrap_or_else(|| ow.saturating_sub(x_offset)),
            h.unwrap_or_else(|| oh.saturating_sub(y_offset)),
        )
    };

    let mut ctx = BeforeCrop {
        source: source.to_path_buf(),
        width: w,
        height: h,
        x: x_offset,
        y: y_offset,
        resize: resize_flag,
    };
    hooks.before_crop.fire(&mut ctx);
    reject_zero(Some(ctx.width), Some(ctx.height))?;

    let target = if replace_flag {
        OutputTarget::Overwrite
    } else {
        OutputTarget::Named(with_suffix_path(source, "_crop"))
    };
    let output = resolve_output(source, &target)?;

    if ctx.resize {
        backend.resize(&ResizeParams {
            source: source.to_path_buf(),
            output: output.clone(),
            width: ctx.width,
            height: ctx.height,
            quality,
        })?;
    } else {
        backend.crop(&CropParams {
            source: source.to_path_buf(),
            output: output.clone(),
            crop: CropRegion {
                x: ctx.x,
                y: ctx.y,
                width: ctx.width,
                height: ctx.height,
            },
            quality,
        })?;
    }
    Ok(output)
}

fn with_suffix_path(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(with_suffix(&name, suffix))
}

/// A generated thumbnail: its storage key and the local file holding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub key: String,
    pub path: PathBuf,
}

/// Render the thumbnail for the file stored under `key`.
///
/// The thumbnail key inserts a `thumb/` segment before the basename (vector
/// extensions become raster); the pixels are written into `output_dir`.
#[allow(clippy::too_many_arguments)]
pub fn generate_thumbnail(
    backend: &impl ImageBackend,
    hooks: &Hooks,
    source: &Path,
    key: &str,
    thumb_dims: (u32, u32),
    gravity: Gravity,
    output_dir: &Path,
    quality: Quality,
) -> Result<Thumbnail> {
    let key = thumb_key(key);
    let base = key.rsplit('/').next().unwrap_or(&key);
    let output = output_dir.join(format!("thumb-{base}"));
    let path = resize_and_crop(
        backend,
        hooks,
        source,
        Dimension::Exact(thumb_dims.0),
        Dimension::Exact(thumb_dims.1),
        gravity,
        &OutputTarget::Named(output),
        quality,
    )?;
    Ok(Thumbnail { key, path })
}
