//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Upload
//!
//! ```text
//! products/cat.png (image, 12.3 KB)
//!     Checksum: 4f2a…
//!     20x20: products/cat-20x20.png
//!     thumbnail: products/thumb/cat.png
//!     warning: version 10x10: Image transform failed: …
//! ```
//!
//! A failed upload prints a single `error:` line. With `--json` the same
//! information is printed as one JSON document ([`upload_json`]).
//!
//! ## Fetch
//!
//! ```text
//! logo.png → /tmp/stowage/logo.png (remote, 3.1 KB)
//! ```
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::materialize::{Materialized, Provenance};
use crate::storage::StoredFile;
use crate::upload::UploadOutcome;
use crate::validate::{FileKind, format_size};
use serde_json::json;

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn kind_label(kind: FileKind) -> &'static str {
    match kind {
        FileKind::Image => "image",
        FileKind::Video => "video",
        FileKind::Audio => "audio",
        FileKind::Document => "document",
        FileKind::Other => "file",
    }
}

fn provenance_label(provenance: Provenance) -> &'static str {
    match provenance {
        Provenance::Remote => "remote",
        Provenance::Inline => "inline",
        Provenance::LocalCopy => "local copy",
    }
}

/// Header line for a stored file: `key (kind, size)`.
fn stored_header(stored: &StoredFile) -> String {
    format!(
        "{} ({}, {})",
        stored.key,
        kind_label(stored.kind),
        format_size(stored.size)
    )
}

// ============================================================================
// Upload
// ============================================================================

pub fn format_upload_outcome(outcome: &UploadOutcome) -> Vec<String> {
    if let Some(err) = &outcome.error {
        return vec![format!("error: {err}")];
    }
    let Some(stored) = &outcome.stored else {
        return vec!["error: nothing stored".to_string()];
    };

    let mut lines = vec![stored_header(stored)];
    lines.push(format!("{}Checksum: {}", indent(1), stored.checksum));
    for version in &outcome.versions {
        lines.push(format!("{}{}: {}", indent(1), version.spec, version.key));
    }
    if let Some(thumb) = &outcome.thumbnail {
        lines.push(format!("{}thumbnail: {thumb}", indent(1)));
    }
    for warning in &outcome.warnings {
        lines.push(format!("{}warning: {warning}", indent(1)));
    }
    lines
}

pub fn print_upload_outcome(outcome: &UploadOutcome) {
    for line in format_upload_outcome(outcome) {
        println!("{}", line);
    }
}

/// Machine-readable upload report.
pub fn upload_json(outcome: &UploadOutcome) -> serde_json::Value {
    let versions: Vec<serde_json::Value> = outcome
        .versions
        .iter()
        .map(|v| json!({ "spec": v.spec.to_string(), "key": v.key }))
        .collect();
    json!({
        "stored": outcome.stored,
        "versions": versions,
        "thumbnail": outcome.thumbnail,
        "warnings": outcome.warnings,
        "error": outcome.error.as_ref().map(|e| e.to_string()),
    })
}

pub fn print_upload_json(outcome: &UploadOutcome) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(&upload_json(outcome))?);
    Ok(())
}

// ============================================================================
// Fetch
// ============================================================================

pub fn format_materialized(result: &Materialized) -> Vec<String> {
    match (&result.file, &result.error) {
        (Some(file), _) => vec![format!(
            "{} → {} ({}, {})",
            file.name(),
            file.path().display(),
            provenance_label(file.provenance()),
            format_size(file.size())
        )],
        (None, Some(err)) => vec![format!("error: {err}")],
        (None, None) => vec!["error: no file produced".to_string()],
    }
}

pub fn print_materialized(result: &Materialized) {
    for line in format_materialized(result) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UploadError;
    use crate::upload::DerivedArtifact;
    use crate::versions::VersionSpec;

    fn stored(key: &str) -> StoredFile {
        StoredFile {
            key: key.to_string(),
            kind: FileKind::Image,
            has_thumb: true,
            size: 2048,
            checksum: "abc123".to_string(),
        }
    }

    // =========================================================================
    // Helper tests
    // =========================================================================

    #[test]
    fn indent_depth() {
        assert_eq!(indent(0), "");
        assert_eq!(indent(2), "        ");
    }

    #[test]
    fn stored_header_shows_kind_and_size() {
        assert_eq!(stored_header(&stored("a/cat.png")), "a/cat.png (image, 2.0 KB)");
    }

    // =========================================================================
    // Upload output
    // =========================================================================

    #[test]
    fn upload_lists_artifacts_in_order() {
        let outcome = UploadOutcome {
            stored: Some(stored("products/cat.png")),
            versions: vec![DerivedArtifact {
                spec: VersionSpec::exact(20, 20),
                key: "products/cat-20x20.png".into(),
            }],
            thumbnail: Some("products/thumb/cat.png".into()),
            warnings: vec!["version 10x10: boom".into()],
            error: None,
        };
        let lines = format_upload_outcome(&outcome);
        assert_eq!(
            lines,
            [
                "products/cat.png (image, 2.0 KB)",
                "    Checksum: abc123",
                "    20x20: products/cat-20x20.png",
                "    thumbnail: products/thumb/cat.png",
                "    warning: version 10x10: boom",
            ]
        );
    }

    #[test]
    fn failed_upload_is_one_error_line() {
        let outcome = UploadOutcome {
            error: Some(UploadError::EmptyInput("nothing".into())),
            ..UploadOutcome::default()
        };
        let lines = format_upload_outcome(&outcome);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("error: Empty input"));
    }

    #[test]
    fn upload_json_carries_keys_and_error() {
        let ok = UploadOutcome {
            stored: Some(stored("cat.png")),
            thumbnail: Some("thumb/cat.png".into()),
            ..UploadOutcome::default()
        };
        let value = upload_json(&ok);
        assert_eq!(value["stored"]["key"], "cat.png");
        assert_eq!(value["stored"]["kind"], "image");
        assert_eq!(value["thumbnail"], "thumb/cat.png");
        assert!(value["error"].is_null());

        let failed = UploadOutcome {
            error: Some(UploadError::Size {
                size: 2048,
                maximum: 1024,
            }),
            ..UploadOutcome::default()
        };
        let value = upload_json(&failed);
        assert!(value["stored"].is_null());
        assert_eq!(
            value["error"],
            "File too large: 2.0 KB exceeds the maximum of 1.0 KB"
        );
    }

    // =========================================================================
    // Fetch output
    // =========================================================================

    #[test]
    fn failed_materialization_shows_error() {
        let result = Materialized {
            file: None,
            error: Some(UploadError::Materialization("connection refused".into())),
        };
        assert_eq!(
            format_materialized(&result),
            ["error: Could not materialize temporary file: connection refused"]
        );
    }
}
