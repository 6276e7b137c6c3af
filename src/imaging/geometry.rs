//! Pure geometry for resize and crop planning.
//!
//! Nothing here touches the filesystem or decodes pixels, so every rule can be
//! unit tested with plain numbers.
//!
//! ## Dimensions
//!
//! A requested edge is a [`Dimension`]:
//!
//! | Token | Variant | Meaning |
//! |---|---|---|
//! | `300` | `Exact(300)` | exactly 300px |
//! | `300?` | `Cap(300)` | 300px, or the source edge if the source is smaller |
//! | *(empty)* | `Auto` | derive proportionally from the other edge |
//!
//! ## Gravity
//!
//! When a cover-resized image is larger than the requested box, the
//! [`Gravity`] anchor decides which part survives the crop. Each anchor splits
//! into one horizontal and one vertical alignment class; the offset on each
//! axis depends only on that class.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Vector formats the raster pipeline cannot crop or resize directly.
const VECTOR_EXTENSIONS: &[&str] = &["svg", "svgz"];

/// Raster format vector sources are converted to.
pub const RASTER_FALLBACK_EXTENSION: &str = "png";

/// A requested width or height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dimension {
    Exact(u32),
    /// Proportional cap: at most this value.
    Cap(u32),
    #[default]
    Auto,
}

impl Dimension {
    pub fn is_auto(self) -> bool {
        matches!(self, Dimension::Auto)
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Dimension::Auto);
        }
        let (digits, capped) = match s.strip_suffix('?') {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        let value: u32 = digits
            .parse()
            .map_err(|_| format!("invalid dimension '{s}'"))?;
        Ok(if capped {
            Dimension::Cap(value)
        } else {
            Dimension::Exact(value)
        })
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Exact(v) => write!(f, "{v}"),
            Dimension::Cap(v) => write!(f, "{v}?"),
            Dimension::Auto => Ok(()),
        }
    }
}

/// Resolve a requested edge against the source edge.
///
/// Caps become `min(original, cap)`, exact values pass through and `Auto`
/// stays unresolved (`None`) so the caller can derive it proportionally.
///
/// ```
/// # use stowage::imaging::{Dimension, resolve_relative_dimension};
/// assert_eq!(resolve_relative_dimension(200, Dimension::Cap(300)), Some(200));
/// assert_eq!(resolve_relative_dimension(800, Dimension::Cap(300)), Some(300));
/// assert_eq!(resolve_relative_dimension(800, Dimension::Exact(900)), Some(900));
/// assert_eq!(resolve_relative_dimension(800, Dimension::Auto), None);
/// ```
pub fn resolve_relative_dimension(original: u32, requested: Dimension) -> Option<u32> {
    match requested {
        Dimension::Exact(v) => Some(v),
        Dimension::Cap(v) => Some(original.min(v)),
        Dimension::Auto => None,
    }
}

/// Which edge binds a cover resize.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResizePlan {
    /// Scale to exactly `width`; the height follows the aspect ratio.
    FitWidth { width: u32, height: f64 },
    /// Scale to exactly `height`; the width follows the aspect ratio.
    FitHeight { height: u32, width: f64 },
}

impl ResizePlan {
    /// Integer canvas size after scaling.
    ///
    /// The free edge is rounded but never drops below the target, so a crop
    /// of `target` from this canvas cannot underflow.
    pub fn scaled_dimensions(&self, target: (u32, u32)) -> (u32, u32) {
        match *self {
            ResizePlan::FitWidth { width, height } => {
                (width, (height.round() as u32).max(target.1).max(1))
            }
            ResizePlan::FitHeight { height, width } => {
                ((width.round() as u32).max(target.0).max(1), height)
            }
        }
    }
}

/// Pick the binding edge so the scaled source covers the whole target box.
///
/// Uses the cross-multiplication test `original_w * target_h < original_h *
/// target_w`: when true the source is relatively taller than the box, so the
/// width binds and the height overflows; otherwise the height binds.
///
/// # Examples
/// ```
/// # use stowage::imaging::{ResizePlan, compute_proportional_resize};
/// // 1000x500 into 200x200: height binds, width overflows to 400
/// assert_eq!(
///     compute_proportional_resize(1000, 500, 200, 200),
///     ResizePlan::FitHeight { height: 200, width: 400.0 }
/// );
/// ```
pub fn compute_proportional_resize(
    original_w: u32,
    original_h: u32,
    target_w: u32,
    target_h: u32,
) -> ResizePlan {
    let width_binds = (original_w as u64) * (target_h as u64) < (original_h as u64) * (target_w as u64);

    if width_binds {
        ResizePlan::FitWidth {
            width: target_w,
            height: original_h as f64 * target_w as f64 / original_w as f64,
        }
    } else {
        ResizePlan::FitHeight {
            height: target_h,
            width: original_w as f64 * target_h as f64 / original_h as f64,
        }
    }
}

/// Scale one edge to keep the source aspect ratio (at least 1px).
pub fn proportional_edge(known_original: u32, known_target: u32, other_original: u32) -> u32 {
    let scaled = other_original as f64 * known_target as f64 / known_original as f64;
    (scaled.round() as u32).max(1)
}

/// Horizontal alignment class of an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HorizontalAlign {
    West,
    Center,
    East,
}

/// Vertical alignment class of an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerticalAlign {
    North,
    Center,
    South,
}

/// Compass anchor preserved by a crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gravity {
    NorthWest,
    North,
    NorthEast,
    West,
    #[default]
    Center,
    East,
    SouthWest,
    South,
    SouthEast,
}

impl Gravity {
    pub const ALL: [Gravity; 9] = [
        Gravity::NorthWest,
        Gravity::North,
        Gravity::NorthEast,
        Gravity::West,
        Gravity::Center,
        Gravity::East,
        Gravity::SouthWest,
        Gravity::South,
        Gravity::SouthEast,
    ];

    pub fn horizontal(self) -> HorizontalAlign {
        match self {
            Gravity::NorthWest | Gravity::West | Gravity::SouthWest => HorizontalAlign::West,
            Gravity::North | Gravity::Center | Gravity::South => HorizontalAlign::Center,
            Gravity::NorthEast | Gravity::East | Gravity::SouthEast => HorizontalAlign::East,
        }
    }

    pub fn vertical(self) -> VerticalAlign {
        match self {
            Gravity::NorthWest | Gravity::North | Gravity::NorthEast => VerticalAlign::North,
            Gravity::West | Gravity::Center | Gravity::East => VerticalAlign::Center,
            Gravity::SouthWest | Gravity::South | Gravity::SouthEast => VerticalAlign::South,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Gravity::NorthWest => "north_west",
            Gravity::North => "north",
            Gravity::NorthEast => "north_east",
            Gravity::West => "west",
            Gravity::Center => "center",
            Gravity::East => "east",
            Gravity::SouthWest => "south_west",
            Gravity::South => "south",
            Gravity::SouthEast => "south_east",
        }
    }
}

impl FromStr for Gravity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Gravity::ALL
            .into_iter()
            .find(|g| g.as_str() == normalized)
            .ok_or_else(|| format!("unknown gravity '{s}'"))
    }
}

impl fmt::Display for Gravity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-left corner of the crop window on the scaled canvas.
///
/// West/north anchors yield 0, east/south yield the full overflow and center
/// yields half of it (truncated). Offsets always lie in
/// `[0, scaled - target]`; a target larger than the canvas yields 0.
pub fn compute_crop_offset(gravity: Gravity, scaled: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let overflow_x = scaled.0.saturating_sub(target.0);
    let overflow_y = scaled.1.saturating_sub(target.1);

    let x = match gravity.horizontal() {
        HorizontalAlign::West => 0,
        HorizontalAlign::Center => overflow_x / 2,
        HorizontalAlign::East => overflow_x,
    };
    let y = match gravity.vertical() {
        VerticalAlign::North => 0,
        VerticalAlign::Center => overflow_y / 2,
        VerticalAlign::South => overflow_y,
    };
    (x, y)
}

/// Whether the path names a vector format.
pub fn is_vector(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| VECTOR_EXTENSIONS.iter().any(|v| e.eq_ignore_ascii_case(v)))
}

/// Rewrite a vector extension to the raster fallback; other paths pass through.
pub fn format_normalize(path: &Path) -> PathBuf {
    if is_vector(path) {
        path.with_extension(RASTER_FALLBACK_EXTENSION)
    } else {
        path.to_path_buf()
    }
}

/// [`format_normalize`] for storage keys (always `/`-separated).
pub fn format_normalize_key(key: &str) -> String {
    if is_vector(Path::new(key)) {
        match key.rfind('.') {
            Some(dot) => format!("{}.{}", &key[..dot], RASTER_FALLBACK_EXTENSION),
            None => key.to_string(),
        }
    } else {
        key.to_string()
    }
}
