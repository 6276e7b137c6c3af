//! Shared test utilities for the stowage test suite.
//!
//! Synthetic fixtures are generated on the fly with the `image` crate so the
//! tests never depend on binary files checked into the repository.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = tempfile::TempDir::new().unwrap();
//! let photo = tmp.path().join("photo.png");
//! create_test_png(&photo, 50, 50);
//! assert_eq!(image_dims(&photo), (50, 50));
//! ```

use image::{ImageEncoder, RgbImage};
use std::path::Path;

// =========================================================================
// Fixture creation
// =========================================================================

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    })
}

/// Create a small valid PNG file with the given dimensions.
pub fn create_test_png(path: &Path, width: u32, height: u32) {
    gradient(width, height).save(path).unwrap();
}

/// Create a small valid JPEG file with the given dimensions.
pub fn create_test_jpeg(path: &Path, width: u32, height: u32) {
    let img = gradient(width, height);
    let file = std::fs::File::create(path).unwrap();
    let writer = std::io::BufWriter::new(file);
    image::codecs::jpeg::JpegEncoder::new(writer)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
}

/// Encode a PNG in memory (for byte-stream and inline payload sources).
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = gradient(width, height);
    let mut out = Vec::new();
    image::codecs::png::PngEncoder::new(&mut out)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
    out
}

/// Minimal SVG document with a fixed canvas.
pub fn svg_document(width: u32, height: u32) -> String {
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}"><rect width="{width}" height="{height}" fill="#3366cc"/></svg>"##
    )
}

/// Write [`svg_document`] to disk.
pub fn create_test_svg(path: &Path, width: u32, height: u32) {
    std::fs::write(path, svg_document(width, height)).unwrap();
}

// =========================================================================
// Inspection
// =========================================================================

/// Dimensions of an image on disk. Panics if it cannot be read.
pub fn image_dims(path: &Path) -> (u32, u32) {
    image::image_dimensions(path)
        .unwrap_or_else(|e| panic!("cannot read dimensions of {}: {e}", path.display()))
}

/// Sorted list of file names directly inside `dir`.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}
