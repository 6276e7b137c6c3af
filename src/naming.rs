//! Path and file name resolution.
//!
//! Three concerns live here:
//!
//! - **Folder safety** ([`sanitize_folder`]): the security boundary for
//!   caller-supplied folders. Runs before anything is written.
//! - **Collision-free names** ([`resolve_unique_name`]): `photo.png`,
//!   `photo_1.png`, `photo_2.png`, ...
//! - **Cosmetic cleanup** ([`fix_filename`]): strips characters that are
//!   awkward in paths or URLs. Not a security control.
//!
//! ## Known race
//!
//! [`resolve_unique_name`] reads the directory and returns a name; it does not
//! reserve it. Two uploads racing for the same name can both see it free.
//! [`LocalStorage`](crate::storage::LocalStorage) closes the window with an
//! atomic create-if-absent and reports a lost race as
//! [`UploadError::NameResolutionConflict`](crate::error::UploadError).

use crate::error::UploadError;
use crate::imaging::format_normalize_key;
use std::collections::HashSet;
use std::io;
use std::path::Path;

/// Validate and normalize a storage folder.
///
/// - `\` is treated as `/`, `.` segments and one trailing `/` are dropped
/// - leading `/`, drive prefixes (`C:`), `..` segments, empty segments
///   (`a//b`) and control characters are rejected
///
/// An empty folder means the storage root.
pub fn sanitize_folder(path: &str) -> Result<String, UploadError> {
    let reject = || UploadError::PathTraversal {
        path: path.to_string(),
    };

    let normalized = path.trim().replace('\\', "/");
    if normalized.is_empty() {
        return Ok(String::new());
    }
    if normalized.starts_with('/') || has_drive_prefix(&normalized) {
        return Err(reject());
    }

    let trimmed = normalized.strip_suffix('/').unwrap_or(&normalized);
    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "." => continue,
            "" | ".." => return Err(reject()),
            s if s.chars().any(|c| c.is_control()) => return Err(reject()),
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Split `name` into stem and extension (without the dot).
///
/// Leading-dot names (`.env`) have no extension.
pub fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(0) | None => (name, None),
        Some(dot) => (&name[..dot], Some(&name[dot + 1..])),
    }
}

/// `stem` + `suffix` + `.ext`, e.g. `("photo.png", "_1")` → `photo_1.png`.
pub fn with_suffix(name: &str, suffix: &str) -> String {
    match split_name(name) {
        (stem, Some(ext)) => format!("{stem}{suffix}.{ext}"),
        (stem, None) => format!("{stem}{suffix}"),
    }
}

/// Return `desired` if no entry of that name exists in `directory`, else the
/// first free `stem_N.ext` for N = 1, 2, ...
///
/// A missing directory counts as empty. Not atomic; see the module docs.
pub fn resolve_unique_name(directory: &Path, desired: &str) -> io::Result<String> {
    let existing: HashSet<String> = match std::fs::read_dir(directory) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => HashSet::new(),
        Err(e) => return Err(e),
    };

    if !existing.contains(desired) {
        return Ok(desired.to_string());
    }
    let mut n: u32 = 1;
    loop {
        let candidate = with_suffix(desired, &format!("_{n}"));
        if !existing.contains(&candidate) {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// Strip characters unsafe in a path or URL and collapse redundant separators.
///
/// Only the final path component is kept. Whitespace becomes `-`; anything
/// outside `[A-Za-z0-9._-]` is dropped; runs of the same separator collapse.
/// An empty result becomes `file`.
pub fn fix_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let mut out = String::with_capacity(base.len());
    for c in base.trim().chars() {
        let mapped = if c.is_whitespace() { '-' } else { c };
        let keep = mapped.is_ascii_alphanumeric() || matches!(mapped, '.' | '_' | '-');
        if !keep {
            continue;
        }
        if matches!(mapped, '.' | '_' | '-') && out.ends_with(mapped) {
            continue;
        }
        out.push(mapped);
    }

    let cleaned = out.trim_matches(|c| c == '.' || c == '-').to_string();
    if cleaned.is_empty() || cleaned.starts_with('.') {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Join a folder and a file name into a storage key.
pub fn join_key(folder: &str, name: &str) -> String {
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder.trim_end_matches('/'), name)
    }
}

/// Split a key into its folder (possibly empty) and base name.
pub fn split_key(key: &str) -> (&str, &str) {
    match key.rfind('/') {
        Some(slash) => (&key[..slash], &key[slash + 1..]),
        None => ("", key),
    }
}

/// Thumbnail key: a `thumb/` segment before the basename, vector extension
/// normalized to raster.
///
/// `products/logo.svg` → `products/thumb/logo.png`
pub fn thumb_key(key: &str) -> String {
    let (folder, base) = split_key(key);
    format_normalize_key(&join_key(&join_key(folder, "thumb"), base))
}
