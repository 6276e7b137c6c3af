//! Format and size validation.
//!
//! An allow-list is written as a [`FormatRule`] string:
//!
//! | Rule | Accepts |
//! |---|---|
//! | `*` | everything, including extensionless names |
//! | `images`, `videos`, `audios`, `documents` | the fixed extension set of that group |
//! | `jpg,png,pdf` | exactly the listed extensions |
//!
//! Extension matching is case-insensitive. Format checks only look at names;
//! markup payloads additionally go through [`contains_active_content`].

use crate::error::UploadError;
use flate2::read::GzDecoder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff", "ico", "svg", "svgz",
];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "webm", "ogv", "mov", "avi", "mkv", "mpeg", "mpg"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "oga", "m4a", "flac", "aac", "opus"];
const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp", "txt", "csv",
    "rtf", "md",
];

/// Extensions whose payloads are scanned for active content.
const MARKUP_EXTENSIONS: &[&str] = &["svg", "svgz", "html", "htm", "xhtml", "xht", "xml"];

/// Ceiling on the inflated size of an `.svgz` payload.
const MAX_INFLATED_MARKUP: u64 = 32 * 1024 * 1024;

static ACTIVE_CONTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<\s*script\b|[\s/"']on[a-z]+\s*=|javascript\s*:"#).expect("static regex")
});

/// A semantic format group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatGroup {
    Images,
    Videos,
    Audios,
    Documents,
}

impl FormatGroup {
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            FormatGroup::Images => IMAGE_EXTENSIONS,
            FormatGroup::Videos => VIDEO_EXTENSIONS,
            FormatGroup::Audios => AUDIO_EXTENSIONS,
            FormatGroup::Documents => DOCUMENT_EXTENSIONS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FormatGroup::Images => "images",
            FormatGroup::Videos => "videos",
            FormatGroup::Audios => "audios",
            FormatGroup::Documents => "documents",
        }
    }
}

/// Allow-list of formats for one upload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FormatRule {
    #[default]
    Any,
    Group(FormatGroup),
    /// Lowercase extensions without the leading dot.
    Extensions(Vec<String>),
}

impl FormatRule {
    /// Whether `extension` (any case, no dot) is allowed.
    pub fn allows(&self, extension: Option<&str>) -> bool {
        match (self, extension) {
            (FormatRule::Any, _) => true,
            (_, None) => false,
            (FormatRule::Group(group), Some(ext)) => group
                .extensions()
                .iter()
                .any(|e| e.eq_ignore_ascii_case(ext)),
            (FormatRule::Extensions(list), Some(ext)) => {
                list.iter().any(|e| e.eq_ignore_ascii_case(ext))
            }
        }
    }

    /// Human-readable description of the allowed set, for error messages.
    pub fn describe(&self) -> String {
        match self {
            FormatRule::Any => "any format".to_string(),
            FormatRule::Group(group) => {
                format!("{} ({})", group.name(), group.extensions().join(", "))
            }
            FormatRule::Extensions(list) => list.join(", "),
        }
    }
}

impl FromStr for FormatRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "" | "*" => return Ok(FormatRule::Any),
            "images" => return Ok(FormatRule::Group(FormatGroup::Images)),
            "videos" => return Ok(FormatRule::Group(FormatGroup::Videos)),
            "audios" => return Ok(FormatRule::Group(FormatGroup::Audios)),
            "documents" => return Ok(FormatRule::Group(FormatGroup::Documents)),
            _ => {}
        }
        let list: Vec<String> = s
            .split(',')
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        if list.is_empty() {
            return Err(format!("invalid format list '{s}'"));
        }
        Ok(FormatRule::Extensions(list))
    }
}

impl TryFrom<String> for FormatRule {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FormatRule> for String {
    fn from(rule: FormatRule) -> Self {
        rule.to_string()
    }
}

impl fmt::Display for FormatRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatRule::Any => f.write_str("*"),
            FormatRule::Group(group) => f.write_str(group.name()),
            FormatRule::Extensions(list) => f.write_str(&list.join(",")),
        }
    }
}

/// Broad classification of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Video,
    Audio,
    Document,
    Other,
}

/// Lowercased extension of a file name or path, if any.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
}

/// Whether `name`'s extension is accepted by `allowed`.
pub fn validate_format(name: &str, allowed: &FormatRule) -> bool {
    allowed.allows(extension_of(name).as_deref())
}

/// [`validate_format`] converted into the user-facing error.
pub fn check_format(name: &str, allowed: &FormatRule) -> Result<(), UploadError> {
    if validate_format(name, allowed) {
        Ok(())
    } else {
        Err(UploadError::Format {
            format: extension_of(name).unwrap_or_else(|| "(none)".to_string()),
            allowed: allowed.describe(),
        })
    }
}

/// Upper-bound size check.
pub fn validate_size(size: u64, maximum: u64) -> Result<(), UploadError> {
    if size > maximum {
        Err(UploadError::Size { size, maximum })
    } else {
        Ok(())
    }
}

/// Classify a file by extension using the semantic groups.
pub fn classify(name: &str) -> FileKind {
    let Some(ext) = extension_of(name) else {
        return FileKind::Other;
    };
    let in_group = |group: FormatGroup| group.extensions().contains(&ext.as_str());
    if in_group(FormatGroup::Images) {
        FileKind::Image
    } else if in_group(FormatGroup::Videos) {
        FileKind::Video
    } else if in_group(FormatGroup::Audios) {
        FileKind::Audio
    } else if in_group(FormatGroup::Documents) {
        FileKind::Document
    } else {
        FileKind::Other
    }
}

/// Whether the payload of `name` should be scanned by [`contains_active_content`].
pub fn is_markup(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| MARKUP_EXTENSIONS.contains(&ext.as_str()))
}

/// Detect script tags, inline event handlers and `javascript:` URLs.
pub fn contains_active_content(bytes: &[u8]) -> bool {
    ACTIVE_CONTENT.is_match(&String::from_utf8_lossy(bytes))
}

/// Reject a markup payload carrying active content.
///
/// Non-markup names pass without looking at the bytes.
pub fn check_active_content(name: &str, bytes: &[u8]) -> Result<(), UploadError> {
    if !is_markup(name) {
        return Ok(());
    }
    let ext = extension_of(name).unwrap_or_default();
    let active = if ext == "svgz" {
        let inflated = inflate_markup(bytes).ok_or_else(|| UploadError::Format {
            format: ext.clone(),
            allowed: format!("compressed markup up to {}", format_size(MAX_INFLATED_MARKUP)),
        })?;
        contains_active_content(bytes) || contains_active_content(&inflated)
    } else {
        contains_active_content(bytes)
    };
    if active {
        return Err(UploadError::Format {
            format: ext,
            allowed: "markup without scripts or event handlers".to_string(),
        });
    }
    Ok(())
}

/// Gunzip a compressed markup payload for scanning.
///
/// A truncated or corrupt stream yields whatever inflated before the error.
/// `None` when the output exceeds [`MAX_INFLATED_MARKUP`].
fn inflate_markup(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut inflated = Vec::new();
    let mut decoder = GzDecoder::new(bytes).take(MAX_INFLATED_MARKUP + 1);
    let mut buf = [0u8; 8192];
    loop {
        match decoder.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => inflated.extend_from_slice(&buf[..n]),
        }
    }
    (inflated.len() as u64 <= MAX_INFLATED_MARKUP).then_some(inflated)
}

/// Render a byte count with binary units (`"100.0 MB"`).
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
