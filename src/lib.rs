//! # Stowage
//!
//! Upload ingestion with image derivation. A single call validates an
//! incoming file, stores it under a collision-free name, and for images
//! derives a thumbnail and any number of resized or cropped versions.
//!
//! # Architecture: One Pipeline, Pluggable Edges
//!
//! ```text
//! source ─▶ materialize ─▶ validate ─▶ store primary ─▶ versions ─▶ thumbnail ─▶ cleanup
//!  path       (url/data:)   path        StorageBackend    rayon pool
//!  bytes                    format
//!  url                      size
//! ```
//!
//! Validation happens before anything is persisted. Derived work runs after
//! the primary file is safe, and its failures become warnings rather than
//! errors. See [`upload`] for the stage-by-stage contract.
//!
//! The edges are traits: [`storage::StorageBackend`] decides where bytes go,
//! [`imaging::ImageBackend`] decodes and encodes pixels, and
//! [`scheduler::DeletionScheduler`] receives temporal uploads. [`hooks`]
//! lets a host observe and adjust the pipeline without subclassing it.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`upload`] | The orchestrator: stages, options, outcome |
//! | [`materialize`] | Turns URLs, `data:` URIs and local paths into temp files |
//! | [`validate`] | Format allow-lists, size ceilings, active-content scanning |
//! | [`naming`] | Folder sanitizing, filename cleanup, collision-free names |
//! | [`versions`] | The `WxH[xmode]` version grammar |
//! | [`imaging`] | Geometry planning plus the pure-Rust codec backend |
//! | [`storage`] | Storage contract and the local-disk implementation |
//! | [`scheduler`] | Deferred deletion for temporal uploads |
//! | [`hooks`] | Typed observer registry |
//! | [`config`] | `config.toml` loading, merging and validation |
//! | [`error`] | The error taxonomy |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Errors Are Data
//!
//! [`upload::Uploader::upload`] and [`materialize::Materializer::materialize`]
//! never return `Err` and never panic on bad input. The outcome carries the
//! error, so callers handle every failure in one place.
//!
//! ## Pure-Rust Imaging
//!
//! Raster codecs come from the `image` crate and SVG sources are rasterised
//! with `resvg`. There are no system dependencies: the binary is
//! self-contained.
//!
//! ## Vector Sources Derive Raster Artifacts
//!
//! Anything derived from an SVG is stored as PNG, and its key changes
//! extension to match. The primary upload keeps its original format.

pub mod config;
pub mod error;
pub mod hooks;
pub mod imaging;
pub mod materialize;
pub mod naming;
pub mod output;
pub mod scheduler;
pub mod storage;
pub mod upload;
pub mod validate;
pub mod versions;

#[cfg(test)]
pub(crate) mod test_helpers;
