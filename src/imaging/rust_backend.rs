//! Pure Rust codec backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, TIFF, WebP, BMP, ICO) | `image` crate |
//! | Decode (SVG, SVGZ) | `resvg` (rasterised at the document's natural size) |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Crop | `DynamicImage::crop_imm` |
//! | Encode | format inferred from the output extension; JPEG honours [`Quality`] |

use super::backend::{Dimensions, ImageBackend, TransformError};
use super::geometry::is_vector;
use super::params::{CropParams, CropRegion, Quality, ResizeCropParams, ResizeParams};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, RgbaImage};
use resvg::{tiny_skia, usvg};
use std::path::Path;

/// Backend built on the `image` crate, with `resvg` for vector sources.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_error(path: &Path, reason: impl ToString) -> TransformError {
    TransformError::Decode {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn parse_svg(path: &Path) -> Result<usvg::Tree, TransformError> {
    let data = std::fs::read(path)?;
    usvg::Tree::from_data(&data, &usvg::Options::default()).map_err(|e| decode_error(path, e))
}

/// Rasterise an SVG at its natural size into straight (non-premultiplied) RGBA.
fn decode_svg(path: &Path) -> Result<DynamicImage, TransformError> {
    let tree = parse_svg(path)?;
    let size = tree.size().to_int_size();
    let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height())
        .ok_or_else(|| decode_error(path, "SVG has an empty canvas"))?;
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

    let mut rgba = Vec::with_capacity(pixmap.pixels().len() * 4);
    for pixel in pixmap.pixels() {
        let c = pixel.demultiply();
        rgba.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }
    RgbaImage::from_raw(size.width(), size.height(), rgba)
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| decode_error(path, "rasterised SVG buffer has the wrong length"))
}

/// Load and decode an image from disk.
fn load_image(path: &Path) -> Result<DynamicImage, TransformError> {
    if is_vector(path) {
        return decode_svg(path);
    }
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| decode_error(path, e))
}

/// Save an image, inferring the format from the output extension.
fn save_image(img: &DynamicImage, path: &Path, quality: Quality) -> Result<(), TransformError> {
    let encode_error = |reason: String| TransformError::Encode {
        path: path.to_path_buf(),
        reason,
    };
    let format = ImageFormat::from_path(path).map_err(|e| encode_error(e.to_string()))?;

    match format {
        ImageFormat::Jpeg => {
            let file = std::fs::File::create(path)?;
            let writer = std::io::BufWriter::new(file);
            let encoder = JpegEncoder::new_with_quality(writer, quality.value() as u8);
            // JPEG has no alpha channel
            DynamicImage::ImageRgb8(img.to_rgb8())
                .write_with_encoder(encoder)
                .map_err(|e| encode_error(e.to_string()))
        }
        ImageFormat::WebP => DynamicImage::ImageRgba8(img.to_rgba8())
            .save_with_format(path, ImageFormat::WebP)
            .map_err(|e| encode_error(e.to_string())),
        other if other.writing_enabled() => img
            .save_with_format(path, other)
            .map_err(|e| encode_error(e.to_string())),
        other => Err(encode_error(format!("Unsupported output format: {other:?}"))),
    }
}

fn check_region(img: &DynamicImage, crop: &CropRegion) -> Result<(), TransformError> {
    let fits = crop.width > 0
        && crop.height > 0
        && crop.x as u64 + crop.width as u64 <= img.width() as u64
        && crop.y as u64 + crop.height as u64 <= img.height() as u64;
    if fits {
        Ok(())
    } else {
        Err(TransformError::ProcessingFailed(format!(
            "crop {}x{}+{}+{} outside {}x{} canvas",
            crop.width,
            crop.height,
            crop.x,
            crop.y,
            img.width(),
            img.height()
        )))
    }
}

impl ImageBackend for RustBackend {
    fn identify(&self, path: &Path) -> Result<Dimensions, TransformError> {
        if is_vector(path) {
            let size = parse_svg(path)?.size().to_int_size();
            return Ok(Dimensions {
                width: size.width(),
                height: size.height(),
            });
        }
        let (width, height) = ImageReader::open(path)?
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|e| decode_error(path, e))?;
        Ok(Dimensions { width, height })
    }

    fn resize(&self, params: &ResizeParams) -> Result<(), TransformError> {
        let img = load_image(&params.source)?;
        let resized = img.resize_exact(params.width, params.height, FilterType::Lanczos3);
        save_image(&resized, &params.output, params.quality)
    }

    fn resize_crop(&self, params: &ResizeCropParams) -> Result<(), TransformError> {
        let img = load_image(&params.source)?;
        let scaled = img.resize_exact(
            params.resize_width,
            params.resize_height,
            FilterType::Lanczos3,
        );
        check_region(&scaled, &params.crop)?;
        let c = params.crop;
        let cropped = scaled.crop_imm(c.x, c.y, c.width, c.height);
        save_image(&cropped, &params.output, params.quality)
    }

    fn crop(&self, params: &CropParams) -> Result<(), TransformError> {
        let img = load_image(&params.source)?;
        check_region(&img, &params.crop)?;
        let c = params.crop;
        let cropped = img.crop_imm(c.x, c.y, c.width, c.height);
        save_image(&cropped, &params.output, params.quality)
    }
}
