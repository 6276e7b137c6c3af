//! Uploader configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! serialized to a TOML table and the user's file is merged on top, so a
//! config file only needs the keys it wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [storage]
//! root = "uploads"               # Directory backing LocalStorage
//! # public_base_url = "https://cdn.example.com/uploads"
//! # temp_dir = "/var/tmp/stowage"
//!
//! [limits]
//! max_size = 104857600           # Bytes (100 MB)
//! formats = "*"                  # "*", a group name, or "jpg,png,pdf"
//!
//! [thumbnails]
//! enabled = true
//! size = [200, 200]              # [width, height]
//! gravity = "center"             # north_west ... south_east
//!
//! [images]
//! quality = 90                   # Lossy encoder quality (1-100)
//!
//! [fetch]
//! timeout_secs = 30              # Remote fetch timeout
//!
//! [security]
//! reject_active_content = true   # Scan svg/html/xml for scripts
//!
//! [processing]
//! max_processes = 4              # Version workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::Gravity;
use crate::validate::FormatRule;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Uploader configuration loaded from `config.toml`.
///
/// These are the site-level defaults; per-call [`UploadOptions`] override
/// them.
///
/// [`UploadOptions`]: crate::upload::UploadOptions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploaderConfig {
    /// Where files are persisted and where temp files go.
    pub storage: StorageConfig,
    /// Default size ceiling and format allow-list.
    pub limits: LimitsConfig,
    /// Default thumbnail settings.
    pub thumbnails: ThumbnailsConfig,
    /// Encoder settings for derived images.
    pub images: ImagesConfig,
    /// Remote fetch settings.
    pub fetch: FetchConfig,
    /// Content scanning.
    pub security: SecurityConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl UploaderConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.images.quality == 0 || self.images.quality > 100 {
            return Err(ConfigError::Validation(
                "images.quality must be 1-100".into(),
            ));
        }
        if self.thumbnails.size[0] == 0 || self.thumbnails.size[1] == 0 {
            return Err(ConfigError::Validation(
                "thumbnails.size values must be non-zero".into(),
            ));
        }
        if self.limits.max_size == 0 {
            return Err(ConfigError::Validation(
                "limits.max_size must be non-zero".into(),
            ));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "fetch.timeout_secs must be non-zero".into(),
            ));
        }
        if self.storage.root.trim().is_empty() {
            return Err(ConfigError::Validation(
                "storage.root must not be empty".into(),
            ));
        }
        if let Some(base) = &self.storage.public_base_url {
            let url = url::Url::parse(base).map_err(|e| {
                ConfigError::Validation(format!("storage.public_base_url: {e}"))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::Validation(
                    "storage.public_base_url must be an http(s) URL".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn thumb_size(&self) -> (u32, u32) {
        (self.thumbnails.size[0], self.thumbnails.size[1])
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    /// Temp directory for materialized files.
    pub fn temp_dir(&self) -> PathBuf {
        self.storage
            .temp_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Storage location settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Directory backing the local storage backend.
    pub root: String,
    /// Public URL prefix of `root`. Remote sources under it are read from
    /// disk instead of over the network.
    pub public_base_url: Option<String>,
    /// Directory for materialized temp files. Defaults to the OS temp dir.
    pub temp_dir: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "uploads".to_string(),
            public_base_url: None,
            temp_dir: None,
        }
    }
}

/// Default validation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum accepted size in bytes.
    pub max_size: u64,
    /// Format allow-list.
    pub formats: FormatRule,
}

pub const DEFAULT_MAX_SIZE: u64 = 100 * 1024 * 1024;

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            formats: FormatRule::Any,
        }
    }
}

/// Thumbnail generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailsConfig {
    /// Generate a thumbnail for image uploads unless the call says otherwise.
    pub enabled: bool,
    /// Thumbnail box as `[width, height]`.
    pub size: [u32; 2],
    /// Anchor kept when the thumbnail is cropped.
    pub gravity: Gravity,
}

impl Default for ThumbnailsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size: [200, 200],
            gravity: Gravity::Center,
        }
    }
}

/// Encoder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// Quality for lossy encoders (1-100).
    pub quality: u32,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self { quality: 90 }
    }
}

/// Remote fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// Content scanning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    /// Reject markup uploads (svg, html, htm, xml) that carry scripts, inline
    /// event handlers or `javascript:` URLs.
    pub reject_active_content: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            reject_active_content: true,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel version workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(UploaderConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a `config.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if no `config.toml` exists in the directory.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = path.join("config.toml");
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<UploaderConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: UploaderConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `config.toml` in the given directory.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(dir: &Path) -> Result<UploaderConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(dir)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Stowage Configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Per-upload command-line flags override these values.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Storage
# ---------------------------------------------------------------------------
[storage]
# Directory that holds uploaded files. Keys are relative to it.
root = "uploads"

# Public URL under which `root` is served. Remote sources below this URL are
# copied from disk instead of being downloaded again.
# public_base_url = "https://cdn.example.com/uploads"

# Directory for temporary files (downloads, decoded data URIs).
# Defaults to the system temp directory.
# temp_dir = "/var/tmp/stowage"

# ---------------------------------------------------------------------------
# Validation limits
# ---------------------------------------------------------------------------
[limits]
# Largest accepted upload, in bytes. 104857600 = 100 MB.
max_size = 104857600

# Accepted formats:
#   "*"                               anything
#   "images", "videos", "audios", "documents"   a semantic group
#   "jpg,png,pdf"                     an explicit extension list
formats = "*"

# ---------------------------------------------------------------------------
# Thumbnails
# ---------------------------------------------------------------------------
[thumbnails]
# Generate a thumbnail for every image upload.
enabled = true

# Thumbnail box as [width, height]. The image is scaled to cover the box and
# cropped around `gravity`.
size = [200, 200]

# One of: north_west, north, north_east, west, center, east,
#         south_west, south, south_east
gravity = "center"

# ---------------------------------------------------------------------------
# Derived images
# ---------------------------------------------------------------------------
[images]
# Quality for lossy encoders (JPEG, WebP), 1-100.
quality = 90

# ---------------------------------------------------------------------------
# Remote fetch
# ---------------------------------------------------------------------------
[fetch]
# Seconds before a remote download is abandoned.
timeout_secs = 30

# ---------------------------------------------------------------------------
# Security
# ---------------------------------------------------------------------------
[security]
# Reject svg/html/htm/xml uploads containing <script>, inline event handlers
# (onload=...) or javascript: URLs.
reject_active_content = true

# ---------------------------------------------------------------------------
# Parallel processing
# ---------------------------------------------------------------------------
[processing]
# Maximum number of parallel workers for version generation.
# Omit to auto-detect (uses all CPU cores). Values above core count are clamped.
# max_processes = 4
"##
}
