//! Version specs: the `WIDTHxHEIGHT[xMODE]` grammar.
//!
//! A version list is comma-separated: `"300x300,505x350"`. Each token yields
//! one derived artifact.
//!
//! ```text
//! 300x200        crop to exactly 300x200 (cover-resize, then gravity crop)
//! 300?x200?      same, but never larger than the source on either edge
//! 300x           width 300, height proportional
//! x200           height 200, width proportional
//! 300            same as 300x
//! 300x200xresize straight resize to 300x200, no crop
//! 300x200xreplace crop, written over the primary artifact
//! 300x200xauto   crop, stored next to the primary as crop_<name>
//! ```
//!
//! The `x` separator is case-insensitive.

use crate::imaging::Dimension;
use std::fmt;
use std::str::FromStr;

/// How the pixels of a version are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionMode {
    /// Cover-resize, then crop at the gravity anchor.
    #[default]
    Crop,
    /// Straight resize to the requested box.
    Resize,
}

/// Where a version is written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VersionNaming {
    /// Key chosen by the storage backend's `version_path`.
    #[default]
    Derived,
    /// Replace the primary artifact.
    OverwritePrimary,
    /// Explicit file name in the primary's folder.
    Named(String),
    /// `crop_<name>` in the primary's folder, collision-free.
    AutoCrop,
}

/// One requested derived artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSpec {
    pub width: Dimension,
    pub height: Dimension,
    pub mode: VersionMode,
    pub naming: VersionNaming,
}

impl VersionSpec {
    pub fn new(width: Dimension, height: Dimension) -> Self {
        Self {
            width,
            height,
            mode: VersionMode::Crop,
            naming: VersionNaming::Derived,
        }
    }

    pub fn exact(width: u32, height: u32) -> Self {
        Self::new(Dimension::Exact(width), Dimension::Exact(height))
    }

    pub fn with_mode(mut self, mode: VersionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.naming = VersionNaming::Named(name.into());
        self
    }

    /// URL-safe token for version keys. A capped edge ends in `c`, and the
    /// mode is appended when it is not the default crop.
    pub fn token(&self) -> String {
        let edge = |d: Dimension| match d {
            Dimension::Exact(v) => v.to_string(),
            Dimension::Cap(v) => format!("{v}c"),
            Dimension::Auto => String::new(),
        };
        let mut token = format!("{}x{}", edge(self.width), edge(self.height));
        if self.mode == VersionMode::Resize {
            token.push_str("xresize");
        }
        token
    }
}

impl FromStr for VersionSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parts: Vec<&str> = s.split(['x', 'X']).collect();
        let (width, height, mode) = match parts.as_slice() {
            [w] => (*w, "", None),
            [w, h] => (*w, *h, None),
            [w, h, m] => (*w, *h, Some(*m)),
            _ => return Err(format!("invalid version spec '{s}'")),
        };

        let width: Dimension = width.parse()?;
        let height: Dimension = height.parse()?;
        if width.is_auto() && height.is_auto() {
            return Err(format!("version spec '{s}' needs a width or a height"));
        }
        for d in [width, height] {
            if matches!(d, Dimension::Exact(0) | Dimension::Cap(0)) {
                return Err(format!("version spec '{s}' has a zero dimension"));
            }
        }

        let mut spec = VersionSpec::new(width, height);
        match mode.map(|m| m.trim().to_ascii_lowercase()).as_deref() {
            None | Some("crop") => {}
            Some("resize") => spec.mode = VersionMode::Resize,
            Some("replace") => spec.naming = VersionNaming::OverwritePrimary,
            Some("auto") => spec.naming = VersionNaming::AutoCrop,
            Some(other) => return Err(format!("unknown version mode '{other}' in '{s}'")),
        }
        Ok(spec)
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)?;
        match (&self.mode, &self.naming) {
            (VersionMode::Resize, _) => f.write_str("xresize"),
            (_, VersionNaming::OverwritePrimary) => f.write_str("xreplace"),
            (_, VersionNaming::AutoCrop) => f.write_str("xauto"),
            _ => Ok(()),
        }
    }
}

/// Parse a comma-separated version list. Blank entries are skipped.
pub fn parse_versions(list: &str) -> Result<Vec<VersionSpec>, String> {
    list.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::parse)
        .collect()
}
