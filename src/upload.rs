//! Upload orchestrator.
//!
//! One call to [`Uploader::upload`] runs the whole pipeline on the calling
//! thread:
//!
//! ```text
//! NormalizeInput → ValidatePath → ValidateFormat → ValidateSize
//!     → PersistPrimary → GenerateVersions → GenerateThumbnail → Cleanup → Done
//! ```
//!
//! Validation failures short-circuit to `Done` before anything is written to
//! storage. A failing version or thumbnail becomes a warning: the upload still
//! succeeds once the primary file is persisted. A requested `dimension` is
//! applied before persisting, so its failure is fatal.
//!
//! Versions are generated on the uploader's bounded rayon pool. Every derived
//! artifact is rendered from a staging copy of the input, which lives until
//! cleanup, after all derived work has finished.
//!
//! ## Known race
//!
//! Collision-free naming is read-then-write (see [`crate::naming`]). With
//! [`LocalStorage`] the write is an atomic create, so two uploads racing for
//! the same key fail one of them with
//! [`UploadError::NameResolutionConflict`] instead of losing an update.

use crate::config::{UploaderConfig, effective_threads};
use crate::error::UploadError;
use crate::hooks::{AfterUpload, BeforeUpload, Hooks, UploaderConstructed};
use crate::imaging::{
    Gravity, ImageBackend, OutputTarget, Quality, RustBackend, apply_version,
    format_normalize_key, generate_thumbnail,
};
use crate::materialize::{MaterializeOptions, Materializer, TempFile, TempSource};
use crate::naming::{fix_filename, join_key, sanitize_folder, split_key};
use crate::scheduler::{DeletionScheduler, NoScheduler};
use crate::storage::{AddOptions, FileSource, LocalStorage, StorageBackend, StoredFile};
use crate::validate::{
    FileKind, FormatRule, check_active_content, check_format, classify, is_markup, validate_size,
};
use crate::versions::{VersionNaming, VersionSpec};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the bytes of an upload come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    /// In-memory bytes with their original file name.
    Bytes { data: Vec<u8>, name: String },
    /// A local file.
    Path(PathBuf),
    /// An `http(s)://` URL, fetched through the temp materializer.
    Url(String),
    /// A `data:` URI. Needs [`UploadOptions::filename`].
    Inline(String),
}

impl UploadSource {
    /// Classify a command-line style source string.
    pub fn detect(source: &str) -> Self {
        match TempSource::detect(source) {
            TempSource::Remote(url) => UploadSource::Url(url),
            TempSource::Inline(uri) => UploadSource::Inline(uri),
            TempSource::Local(path) => UploadSource::Path(path),
        }
    }
}

/// Per-call options. Unset values fall back to [`UploaderConfig`].
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Target folder relative to the storage root; empty means the root.
    pub folder: String,
    /// Stored file name; defaults to the source's own name.
    pub filename: Option<String>,
    /// Overwrite an existing entry instead of picking a unique name.
    pub same_name: bool,
    pub formats: Option<FormatRule>,
    /// Size ceiling in bytes.
    pub maximum: Option<u64>,
    pub generate_thumb: Option<bool>,
    pub versions: Vec<VersionSpec>,
    pub thumb_size: Option<(u32, u32)>,
    /// Schedule deletion of everything stored after this long.
    pub temporal_time: Option<Duration>,
    /// Resize applied to the input before it is stored.
    pub dimension: Option<VersionSpec>,
    pub gravity: Option<Gravity>,
    /// Delete a local source file after a successful upload.
    pub remove_source: bool,
}

/// One upload call.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub source: UploadSource,
    pub options: UploadOptions,
}

impl UploadRequest {
    pub fn new(source: UploadSource) -> Self {
        Self {
            source,
            options: UploadOptions::default(),
        }
    }

    pub fn with_options(mut self, options: UploadOptions) -> Self {
        self.options = options;
        self
    }
}

/// Pipeline stage, logged on entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    NormalizeInput,
    ValidatePath,
    ValidateFormat,
    ValidateSize,
    PersistPrimary,
    GenerateVersions,
    GenerateThumbnail,
    Cleanup,
    Done,
}

impl UploadStage {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadStage::NormalizeInput => "normalize_input",
            UploadStage::ValidatePath => "validate_path",
            UploadStage::ValidateFormat => "validate_format",
            UploadStage::ValidateSize => "validate_size",
            UploadStage::PersistPrimary => "persist_primary",
            UploadStage::GenerateVersions => "generate_versions",
            UploadStage::GenerateThumbnail => "generate_thumbnail",
            UploadStage::Cleanup => "cleanup",
            UploadStage::Done => "done",
        }
    }
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedArtifact {
    pub spec: VersionSpec,
    pub key: String,
}

/// Everything an upload call produced. Check [`UploadOutcome::error`] first.
#[derive(Debug, Default)]
pub struct UploadOutcome {
    pub stored: Option<StoredFile>,
    pub versions: Vec<DerivedArtifact>,
    pub thumbnail: Option<String>,
    /// Skipped secondary work and cleanup problems.
    pub warnings: Vec<String>,
    pub error: Option<UploadError>,
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.stored.is_some()
    }

    /// Every key written by this upload, each listed once.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.stored.iter().map(|s| s.key.clone()).collect();
        for key in self.versions.iter().map(|v| &v.key).chain(self.thumbnail.iter()) {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }
}

/// Options after falling back to the uploader config.
#[derive(Debug, Clone)]
struct Effective {
    formats: FormatRule,
    maximum: u64,
    generate_thumb: bool,
    thumb_size: (u32, u32),
    gravity: Gravity,
}

/// Where a version is stored.
struct VersionTarget {
    key: String,
    /// Overwrite whatever is at `key` instead of picking a unique name.
    same_name: bool,
}

/// Input bytes between normalization and persistence.
enum Staged {
    Memory(Vec<u8>),
    File(PathBuf),
}

struct StagedInput {
    name: String,
    size: u64,
    data: Staged,
    /// Caller's own file, for `remove_source`.
    origin: Option<PathBuf>,
    /// Keeps a materialized download alive until the upload ends.
    _temp: Option<TempFile>,
}

/// Builder for [`Uploader`].
pub struct UploaderBuilder<B: ImageBackend = RustBackend> {
    config: UploaderConfig,
    backend: B,
    storage: Option<Arc<dyn StorageBackend>>,
    scheduler: Option<Arc<dyn DeletionScheduler>>,
    hooks: Hooks,
}

impl<B: ImageBackend> UploaderBuilder<B> {
    /// Replace the image codec backend.
    pub fn backend<B2: ImageBackend>(self, backend: B2) -> UploaderBuilder<B2> {
        UploaderBuilder {
            config: self.config,
            backend,
            storage: self.storage,
            scheduler: self.scheduler,
            hooks: self.hooks,
        }
    }

    /// Storage backend; defaults to [`LocalStorage`] at `storage.root`.
    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Scheduler for temporal uploads; defaults to [`NoScheduler`].
    pub fn scheduler(mut self, scheduler: Arc<dyn DeletionScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Build the uploader. Fires `uploader_constructed`, whose observers may
    /// swap the storage backend.
    pub fn build(self) -> Result<Uploader<B>, UploadError> {
        let storage: Arc<dyn StorageBackend> = match self.storage {
            Some(storage) => storage,
            None => Arc::new(LocalStorage::new(&self.config.storage.root)),
        };
        let mut ctx = UploaderConstructed { storage };
        self.hooks.uploader_constructed.fire(&mut ctx);

        let threads = effective_threads(&self.config.processing);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("stowage-version-{i}"))
            .build()
            .map_err(|e| UploadError::Setup(format!("Failed to build worker pool: {e}")))?;

        let backend = Arc::new(self.backend);
        let hooks = Arc::new(self.hooks);
        let materializer = Materializer::new(&self.config, Arc::clone(&backend), Arc::clone(&hooks))?;

        debug!(threads, root = %self.config.storage.root, "Uploader constructed");
        Ok(Uploader {
            config: self.config,
            storage: ctx.storage,
            backend,
            hooks,
            scheduler: self.scheduler.unwrap_or_else(|| Arc::new(NoScheduler)),
            materializer,
            pool,
        })
    }
}

/// The upload pipeline with its collaborators.
pub struct Uploader<B: ImageBackend = RustBackend> {
    config: UploaderConfig,
    storage: Arc<dyn StorageBackend>,
    backend: Arc<B>,
    hooks: Arc<Hooks>,
    scheduler: Arc<dyn DeletionScheduler>,
    materializer: Materializer<B>,
    pool: rayon::ThreadPool,
}

impl Uploader<RustBackend> {
    pub fn builder(config: UploaderConfig) -> UploaderBuilder<RustBackend> {
        UploaderBuilder {
            config,
            backend: RustBackend::new(),
            storage: None,
            scheduler: None,
            hooks: Hooks::new(),
        }
    }
}

impl<B: ImageBackend> Uploader<B> {
    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn materializer(&self) -> &Materializer<B> {
        &self.materializer
    }

    /// Run the pipeline. Never panics or returns `Err`: failures are carried
    /// in [`UploadOutcome::error`].
    pub fn upload(&self, request: UploadRequest) -> UploadOutcome {
        let mut outcome = UploadOutcome::default();
        if let Err(err) = self.run(request, &mut outcome) {
            warn!(error = %err, "Upload failed");
            stage(UploadStage::Done);
            outcome.error = Some(err);
        }
        outcome
    }

    fn effective(&self, options: &UploadOptions) -> Effective {
        Effective {
            formats: options
                .formats
                .clone()
                .unwrap_or_else(|| self.config.limits.formats.clone()),
            maximum: options.maximum.unwrap_or(self.config.limits.max_size),
            generate_thumb: options
                .generate_thumb
                .unwrap_or(self.config.thumbnails.enabled),
            thumb_size: options.thumb_size.unwrap_or_else(|| self.config.thumb_size()),
            gravity: options.gravity.unwrap_or(self.config.thumbnails.gravity),
        }
    }

    fn quality(&self) -> Quality {
        Quality::new(self.config.images.quality)
    }

    fn run(&self, request: UploadRequest, outcome: &mut UploadOutcome) -> Result<(), UploadError> {
        stage(UploadStage::NormalizeInput);
        fs::create_dir_all(self.materializer.temp_dir())?;
        let staging = tempfile::Builder::new()
            .prefix("stowage-")
            .tempdir_in(self.materializer.temp_dir())?;

        let mut options = request.options;
        let input = self.normalize_input(request.source, &options, staging.path())?;

        let mut before = BeforeUpload {
            filename: input.name.clone(),
            options,
        };
        self.hooks.before_upload.fire(&mut before);
        options = before.options;
        let mut input = StagedInput {
            name: before.filename,
            ..input
        };
        let effective = self.effective(&options);

        stage(UploadStage::ValidatePath);
        let folder = sanitize_folder(&options.folder)?;
        if !self.storage.valid_folder_path(&folder) {
            return Err(UploadError::PathTraversal {
                path: options.folder.clone(),
            });
        }

        stage(UploadStage::ValidateFormat);
        input.name = fix_filename(&input.name);
        check_format(&input.name, &effective.formats)?;
        if self.config.security.reject_active_content && is_markup(&input.name) {
            match &input.data {
                Staged::Memory(bytes) => check_active_content(&input.name, bytes)?,
                Staged::File(path) => check_active_content(&input.name, &fs::read(path)?)?,
            }
        }

        stage(UploadStage::ValidateSize);
        validate_size(input.size, effective.maximum)?;

        // Derived artifacts need the input on disk.
        let mut working = match &input.data {
            Staged::Memory(bytes) => {
                let path = staging.path().join(&input.name);
                fs::write(&path, bytes)?;
                path
            }
            Staged::File(path) => path.clone(),
        };
        let kind = classify(&input.name);

        if let Some(spec) = &options.dimension {
            if kind == FileKind::Image {
                if input.origin.as_deref() == Some(working.as_path()) {
                    let copy = staging.path().join(&input.name);
                    fs::copy(&working, &copy)?;
                    working = copy;
                }
                working = apply_version(
                    &*self.backend,
                    &self.hooks,
                    &working,
                    spec,
                    effective.gravity,
                    &OutputTarget::Overwrite,
                    self.quality(),
                )?;
                if let Some(name) = working.file_name() {
                    input.name = name.to_string_lossy().to_string();
                }
                debug!(spec = %spec, "Applied upload dimension");
            }
        }

        stage(UploadStage::PersistPrimary);
        let key = join_key(&folder, &input.name);
        let stored = self.storage.add_file(
            FileSource::Path(&working),
            &key,
            AddOptions {
                same_name: options.same_name,
                is_thumb: false,
            },
        )?;
        let primary_key = stored.key.clone();
        outcome.stored = Some(stored);

        if kind == FileKind::Image {
            stage(UploadStage::GenerateVersions);
            self.generate_versions(&working, &primary_key, &options, &effective, staging.path(), outcome);

            if effective.generate_thumb {
                stage(UploadStage::GenerateThumbnail);
                self.store_thumbnail(&working, &primary_key, &effective, staging.path(), outcome);
            }
        } else if !options.versions.is_empty() {
            debug!(key = %primary_key, kind = ?kind, "Skipping versions for non-image upload");
        }

        stage(UploadStage::Cleanup);
        if options.remove_source {
            if let Some(origin) = &input.origin {
                if let Err(e) = fs::remove_file(origin) {
                    warn!(path = %origin.display(), error = %e, "Failed to remove source file");
                    outcome
                        .warnings
                        .push(format!("could not remove {}: {e}", origin.display()));
                }
            }
        }
        if let Some(after) = options.temporal_time {
            for key in outcome.keys() {
                if let Err(e) = self.scheduler.schedule_deletion(&key, after) {
                    warn!(key = %key, error = %e, "Failed to schedule deletion");
                    outcome.warnings.push(format!("could not schedule deletion of {key}: {e}"));
                }
            }
        }
        drop(input);
        drop(staging);

        stage(UploadStage::Done);
        let mut after = AfterUpload {
            key: primary_key.clone(),
            kind,
            version_keys: outcome.versions.iter().map(|v| v.key.clone()).collect(),
            thumbnail_key: outcome.thumbnail.clone(),
        };
        self.hooks.after_upload.fire(&mut after);
        info!(
            key = %primary_key,
            versions = outcome.versions.len(),
            thumbnail = outcome.thumbnail.is_some(),
            warnings = outcome.warnings.len(),
            "Upload complete"
        );
        Ok(())
    }

    fn normalize_input(
        &self,
        source: UploadSource,
        options: &UploadOptions,
        staging: &Path,
    ) -> Result<StagedInput, UploadError> {
        match source {
            UploadSource::Bytes { data, name } => {
                if data.is_empty() {
                    return Err(UploadError::EmptyInput(format!("'{name}' has no content")));
                }
                let name = options.filename.clone().unwrap_or(name);
                Ok(StagedInput {
                    name,
                    size: data.len() as u64,
                    data: Staged::Memory(data),
                    origin: None,
                    _temp: None,
                })
            }
            UploadSource::Path(path) => {
                let metadata = fs::metadata(&path).map_err(|e| {
                    UploadError::EmptyInput(format!("cannot read {}: {e}", path.display()))
                })?;
                if !metadata.is_file() || metadata.len() == 0 {
                    return Err(UploadError::EmptyInput(format!(
                        "{} is not a non-empty file",
                        path.display()
                    )));
                }
                let name = options
                    .filename
                    .clone()
                    .or_else(|| path.file_name().map(|n| n.to_string_lossy().to_string()))
                    .ok_or_else(|| {
                        UploadError::EmptyInput(format!("{} has no file name", path.display()))
                    })?;
                Ok(StagedInput {
                    name,
                    size: metadata.len(),
                    data: Staged::File(path.clone()),
                    origin: Some(path),
                    _temp: None,
                })
            }
            UploadSource::Url(url) => self.materialize_input(TempSource::Remote(url), options, staging),
            UploadSource::Inline(uri) => {
                self.materialize_input(TempSource::Inline(uri), options, staging)
            }
        }
    }

    fn materialize_input(
        &self,
        source: TempSource,
        options: &UploadOptions,
        staging: &Path,
    ) -> Result<StagedInput, UploadError> {
        if matches!(&source, TempSource::Remote(s) | TempSource::Inline(s) if s.trim().is_empty()) {
            return Err(UploadError::EmptyInput("source is empty".into()));
        }
        let effective = self.effective(options);
        let materialize_options = MaterializeOptions {
            name: options.filename.clone(),
            formats: effective.formats,
            maximum: effective.maximum,
            dimension: None,
            transient: true,
            reject_active_content: self.config.security.reject_active_content,
        };
        let file = self
            .materializer
            .materialize_in(staging, source, &materialize_options)
            .into_result()?;
        if file.size() == 0 {
            return Err(UploadError::EmptyInput(format!("{} has no content", file.name())));
        }
        Ok(StagedInput {
            name: file.name().to_string(),
            size: file.size(),
            data: Staged::File(file.path().to_path_buf()),
            origin: None,
            _temp: Some(file),
        })
    }

    fn generate_versions(
        &self,
        source: &Path,
        primary_key: &str,
        options: &UploadOptions,
        effective: &Effective,
        staging: &Path,
        outcome: &mut UploadOutcome,
    ) {
        if options.versions.is_empty() {
            return;
        }

        // Overwriting keys must be unique, or parallel writers clobber each other.
        let mut claimed = HashSet::new();
        let mut planned = Vec::with_capacity(options.versions.len());
        for spec in &options.versions {
            let target = self.version_target(primary_key, spec);
            if target.same_name && !claimed.insert(target.key.clone()) {
                warn!(spec = %spec, key = %target.key, "Skipping version with duplicate key");
                outcome
                    .warnings
                    .push(format!("version {spec}: key {} already requested", target.key));
                continue;
            }
            planned.push((spec, target));
        }

        let results: Vec<(VersionSpec, Result<StoredFile, UploadError>)> =
            self.pool.install(|| {
                planned
                    .par_iter()
                    .enumerate()
                    .map(|(index, (spec, target))| {
                        let result = self.generate_version(
                            index,
                            source,
                            spec,
                            target,
                            effective.gravity,
                            staging,
                        );
                        ((*spec).clone(), result)
                    })
                    .collect()
            });

        for (spec, result) in results {
            match result {
                Ok(stored) => {
                    if let Some(primary) = outcome.stored.as_mut() {
                        if primary.key == stored.key {
                            primary.size = stored.size;
                            primary.checksum = stored.checksum.clone();
                        }
                    }
                    outcome.versions.push(DerivedArtifact {
                        spec,
                        key: stored.key,
                    });
                }
                Err(e) => {
                    warn!(spec = %spec, error = %e, "Skipping version");
                    outcome.warnings.push(format!("version {spec}: {e}"));
                }
            }
        }
    }

    fn version_target(&self, primary_key: &str, spec: &VersionSpec) -> VersionTarget {
        let (folder, base) = split_key(primary_key);
        let (key, same_name) = match &spec.naming {
            VersionNaming::Derived => (self.storage.version_path(primary_key, &spec.token()), true),
            VersionNaming::OverwritePrimary => (format_normalize_key(primary_key), true),
            VersionNaming::Named(name) => {
                (format_normalize_key(&join_key(folder, &fix_filename(name))), false)
            }
            VersionNaming::AutoCrop => {
                (format_normalize_key(&join_key(folder, &format!("crop_{base}"))), false)
            }
        };
        VersionTarget { key, same_name }
    }

    fn generate_version(
        &self,
        index: usize,
        source: &Path,
        spec: &VersionSpec,
        target: &VersionTarget,
        gravity: Gravity,
        staging: &Path,
    ) -> Result<StoredFile, UploadError> {
        let (_, key_base) = split_key(&target.key);
        let output = staging.join(format!("version-{index}-{key_base}"));
        let rendered = apply_version(
            &*self.backend,
            &self.hooks,
            source,
            spec,
            gravity,
            &OutputTarget::Named(output),
            self.quality(),
        )?;
        let stored = self.storage.add_file(
            FileSource::Path(&rendered),
            &target.key,
            AddOptions {
                same_name: target.same_name,
                is_thumb: false,
            },
        )?;
        Ok(stored)
    }

    fn store_thumbnail(
        &self,
        source: &Path,
        primary_key: &str,
        effective: &Effective,
        staging: &Path,
        outcome: &mut UploadOutcome,
    ) {
        let result = generate_thumbnail(
            &*self.backend,
            &self.hooks,
            source,
            primary_key,
            effective.thumb_size,
            effective.gravity,
            staging,
            self.quality(),
        )
        .map_err(UploadError::from)
        .and_then(|thumb| {
            self.storage
                .add_file(
                    FileSource::Path(&thumb.path),
                    &thumb.key,
                    AddOptions {
                        same_name: true,
                        is_thumb: true,
                    },
                )
                .map_err(UploadError::from)
        });

        match result {
            Ok(stored) => {
                outcome.thumbnail = Some(stored.key);
                if let Some(primary) = outcome.stored.as_mut() {
                    primary.has_thumb = true;
                }
            }
            Err(e) => {
                warn!(key = %primary_key, error = %e, "Skipping thumbnail");
                outcome.warnings.push(format!("thumbnail: {e}"));
            }
        }
    }
}

fn stage(stage: UploadStage) {
    debug!(stage = %stage, "Upload stage");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::Dimensions;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::scheduler::DeletionQueue;
    use crate::storage::calculate_checksum;
    use crate::test_helpers::{create_test_png, file_names, image_dims, png_bytes};
    use crate::versions::parse_versions;
    use tempfile::TempDir;

    struct Fixture {
        tmp: TempDir,
        config: UploaderConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let mut config = UploaderConfig::default();
            config.storage.root = tmp.path().join("uploads").to_string_lossy().to_string();
            config.storage.temp_dir = Some(tmp.path().join("tmp").to_string_lossy().to_string());
            config.processing.max_processes = Some(2);
            Self { tmp, config }
        }

        fn root(&self) -> PathBuf {
            self.tmp.path().join("uploads")
        }

        fn uploader(&self) -> Uploader {
            Uploader::builder(self.config.clone()).build().unwrap()
        }
    }

    fn png_request(name: &str, width: u32, height: u32) -> UploadRequest {
        UploadRequest::new(UploadSource::Bytes {
            data: png_bytes(width, height),
            name: name.to_string(),
        })
    }

    // =========================================================================
    // Happy path
    // =========================================================================

    #[test]
    fn primary_versions_and_thumbnail_are_stored() {
        let fx = Fixture::new();
        let outcome = fx.uploader().upload(png_request("cat.png", 50, 50).with_options(UploadOptions {
            folder: "products".into(),
            versions: parse_versions("20x20,10x10").unwrap(),
            ..UploadOptions::default()
        }));

        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
        let stored = outcome.stored.as_ref().unwrap();
        assert_eq!(stored.key, "products/cat.png");
        assert!(stored.has_thumb);

        let keys: Vec<&str> = outcome.versions.iter().map(|v| v.key.as_str()).collect();
        assert_eq!(keys, ["products/cat-20x20.png", "products/cat-10x10.png"]);
        assert_eq!(outcome.thumbnail.as_deref(), Some("products/thumb/cat.png"));

        let root = fx.root();
        assert_eq!(image_dims(&root.join("products/cat.png")), (50, 50));
        assert_eq!(image_dims(&root.join("products/cat-20x20.png")), (20, 20));
        assert_eq!(image_dims(&root.join("products/cat-10x10.png")), (10, 10));
        assert_eq!(image_dims(&root.join("products/thumb/cat.png")), (200, 200));
    }

    #[test]
    fn non_images_skip_derived_artifacts() {
        let fx = Fixture::new();
        let outcome = fx.uploader().upload(
            UploadRequest::new(UploadSource::Bytes {
                data: b"%PDF-1.4".to_vec(),
                name: "report.pdf".into(),
            })
            .with_options(UploadOptions {
                versions: parse_versions("20x20").unwrap(),
                ..UploadOptions::default()
            }),
        );

        assert!(outcome.is_success());
        assert_eq!(outcome.stored.as_ref().unwrap().kind, FileKind::Document);
        assert!(outcome.versions.is_empty());
        assert!(outcome.thumbnail.is_none());
    }

    #[test]
    fn collisions_get_unique_keys_unless_same_name() {
        let fx = Fixture::new();
        let uploader = fx.uploader();
        let options = UploadOptions {
            generate_thumb: Some(false),
            ..UploadOptions::default()
        };

        let first = uploader.upload(png_request("a.png", 4, 4).with_options(options.clone()));
        let second = uploader.upload(png_request("a.png", 4, 4).with_options(options.clone()));
        let third = uploader.upload(png_request("a.png", 8, 8).with_options(UploadOptions {
            same_name: true,
            ..options
        }));

        assert_eq!(first.stored.unwrap().key, "a.png");
        assert_eq!(second.stored.unwrap().key, "a_1.png");
        assert_eq!(third.stored.unwrap().key, "a.png");
        assert_eq!(image_dims(&fx.root().join("a.png")), (8, 8));
    }

    #[test]
    fn capped_and_exact_versions_get_distinct_keys() {
        let fx = Fixture::new();
        let outcome = fx.uploader().upload(png_request("cat.png", 10, 10).with_options(UploadOptions {
            versions: parse_versions("20?x20?,20x20").unwrap(),
            generate_thumb: Some(false),
            ..UploadOptions::default()
        }));

        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
        let keys: Vec<&str> = outcome.versions.iter().map(|v| v.key.as_str()).collect();
        assert_eq!(keys, ["cat-20cx20c.png", "cat-20x20.png"]);
        assert_eq!(image_dims(&fx.root().join("cat-20cx20c.png")), (10, 10));
        assert_eq!(image_dims(&fx.root().join("cat-20x20.png")), (20, 20));
    }

    #[test]
    fn repeated_version_is_stored_once() {
        let fx = Fixture::new();
        let outcome = fx.uploader().upload(png_request("cat.png", 30, 30).with_options(UploadOptions {
            versions: parse_versions("20x20,20x20").unwrap(),
            generate_thumb: Some(false),
            ..UploadOptions::default()
        }));

        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert_eq!(outcome.versions.len(), 1);
        assert_eq!(outcome.versions[0].key, "cat-20x20.png");
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("already requested"), "{:?}", outcome.warnings);
    }

    #[test]
    fn replace_version_refreshes_primary_metadata() {
        let fx = Fixture::new();
        let outcome = fx.uploader().upload(png_request("cat.png", 40, 40).with_options(UploadOptions {
            versions: parse_versions("20x20xreplace").unwrap(),
            generate_thumb: Some(false),
            ..UploadOptions::default()
        }));

        assert!(outcome.is_success(), "{:?}", outcome.error);
        let path = fx.root().join("cat.png");
        assert_eq!(image_dims(&path), (20, 20));
        let on_disk = fs::read(&path).unwrap();
        let stored = outcome.stored.as_ref().unwrap();
        assert_eq!(stored.size, on_disk.len() as u64);
        assert_eq!(stored.checksum, calculate_checksum(&on_disk));
        assert_eq!(outcome.keys(), ["cat.png"]);
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn validation_failures_persist_nothing() {
        let fx = Fixture::new();
        let uploader = fx.uploader();

        let cases = [
            UploadOptions {
                folder: "../../etc".into(),
                ..UploadOptions::default()
            },
            UploadOptions {
                formats: Some("documents".parse().unwrap()),
                ..UploadOptions::default()
            },
            UploadOptions {
                maximum: Some(16),
                ..UploadOptions::default()
            },
        ];
        for options in cases {
            let outcome = uploader.upload(png_request("a.png", 10, 10).with_options(options));
            let err = outcome.error.expect("upload should fail");
            assert!(err.is_validation(), "{err}");
            assert!(outcome.stored.is_none());
        }
        assert!(!fx.root().exists() || file_names(&fx.root()).is_empty());
    }

    #[test]
    fn empty_bytes_are_rejected() {
        let fx = Fixture::new();
        let outcome = fx.uploader().upload(UploadRequest::new(UploadSource::Bytes {
            data: Vec::new(),
            name: "a.png".into(),
        }));
        assert!(matches!(outcome.error, Some(UploadError::EmptyInput(_))));
    }

    #[test]
    fn active_markup_is_rejected() {
        let fx = Fixture::new();
        let outcome = fx.uploader().upload(UploadRequest::new(UploadSource::Bytes {
            data: b"<svg onload=\"steal()\"></svg>".to_vec(),
            name: "logo.svg".into(),
        }));
        assert!(matches!(outcome.error, Some(UploadError::Format { .. })));
    }

    // =========================================================================
    // Precondition + secondary failures
    // =========================================================================

    #[test]
    fn dimension_is_applied_before_persisting() {
        let fx = Fixture::new();
        let outcome = fx.uploader().upload(png_request("wide.png", 80, 40).with_options(UploadOptions {
            dimension: Some("40x".parse().unwrap()),
            generate_thumb: Some(false),
            ..UploadOptions::default()
        }));
        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert_eq!(image_dims(&fx.root().join("wide.png")), (40, 20));
    }

    #[test]
    fn failing_precondition_transform_is_fatal() {
        let fx = Fixture::new();
        let uploader = Uploader::builder(fx.config.clone())
            .backend(MockBackend::failing())
            .build()
            .unwrap();
        let outcome = uploader.upload(png_request("a.png", 10, 10).with_options(UploadOptions {
            dimension: Some("5x5".parse().unwrap()),
            ..UploadOptions::default()
        }));
        assert!(matches!(outcome.error, Some(UploadError::Transform(_))));
        assert!(outcome.stored.is_none());
    }

    #[test]
    fn failing_versions_are_warnings() {
        let fx = Fixture::new();
        let uploader = Uploader::builder(fx.config.clone())
            .backend(MockBackend::failing())
            .build()
            .unwrap();
        let outcome = uploader.upload(png_request("a.png", 10, 10).with_options(UploadOptions {
            versions: parse_versions("5x5").unwrap(),
            ..UploadOptions::default()
        }));

        assert!(outcome.is_success());
        assert!(outcome.versions.is_empty());
        assert!(outcome.thumbnail.is_none());
        assert_eq!(outcome.warnings.len(), 2);
        assert!(!outcome.stored.unwrap().has_thumb);
    }

    #[test]
    fn mock_backend_sees_version_plans() {
        let fx = Fixture::new();
        let backend = MockBackend::with_dimensions(vec![Dimensions {
            width: 100,
            height: 50,
        }]);
        let uploader = Uploader::builder(fx.config.clone())
            .backend(backend)
            .build()
            .unwrap();
        let outcome = uploader.upload(png_request("a.png", 10, 10).with_options(UploadOptions {
            versions: parse_versions("20x20").unwrap(),
            generate_thumb: Some(false),
            ..UploadOptions::default()
        }));
        // The mock writes nothing, so persisting the version fails.
        assert!(outcome.is_success());
        assert_eq!(outcome.warnings.len(), 1);
        let crops: Vec<_> = uploader
            .backend()
            .get_operations()
            .into_iter()
            .filter_map(|op| match op {
                RecordedOp::ResizeCrop { crop, .. } => Some((crop.width, crop.height)),
                _ => None,
            })
            .collect();
        assert_eq!(crops, [(20, 20)]);
    }

    // =========================================================================
    // Cleanup + hooks
    // =========================================================================

    #[test]
    fn remove_source_deletes_local_file_after_derivation() {
        let fx = Fixture::new();
        let src = fx.tmp.path().join("incoming.png");
        create_test_png(&src, 30, 30);

        let outcome = fx.uploader().upload(
            UploadRequest::new(UploadSource::Path(src.clone())).with_options(UploadOptions {
                versions: parse_versions("10x10").unwrap(),
                remove_source: true,
                ..UploadOptions::default()
            }),
        );
        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert_eq!(outcome.versions.len(), 1);
        assert!(outcome.thumbnail.is_some());
        assert!(!src.exists());
    }

    #[test]
    fn local_source_kept_by_default() {
        let fx = Fixture::new();
        let src = fx.tmp.path().join("keep.png");
        create_test_png(&src, 8, 8);
        let outcome = fx.uploader().upload(UploadRequest::new(UploadSource::Path(src.clone())));
        assert!(outcome.is_success());
        assert!(src.exists());
    }

    #[test]
    fn temporal_uploads_schedule_every_key() {
        let fx = Fixture::new();
        let queue = Arc::new(DeletionQueue::new());
        let uploader = Uploader::builder(fx.config.clone())
            .scheduler(queue.clone())
            .build()
            .unwrap();

        let outcome = uploader.upload(png_request("t.png", 30, 30).with_options(UploadOptions {
            folder: "temporal".into(),
            versions: parse_versions("10x10").unwrap(),
            temporal_time: Some(Duration::from_secs(3600)),
            ..UploadOptions::default()
        }));
        assert!(outcome.is_success());

        let mut scheduled: Vec<String> = queue.pending().into_iter().map(|p| p.key).collect();
        scheduled.sort();
        assert_eq!(
            scheduled,
            ["temporal/t-10x10.png", "temporal/t.png", "temporal/thumb/t.png"]
        );
        assert!(fx.root().join("temporal/t.png").exists());
    }

    #[test]
    fn hooks_can_rename_and_swap_storage() {
        let fx = Fixture::new();
        let alt_root = fx.tmp.path().join("alt");
        let alt_root_for_hook = alt_root.clone();

        let mut hooks = Hooks::new();
        hooks.uploader_constructed.register(move |ctx| {
            let storage: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(&alt_root_for_hook));
            ctx.storage = storage;
        });
        hooks
            .before_upload
            .register(|ctx| ctx.filename = format!("renamed-{}", ctx.filename));

        let uploader = Uploader::builder(fx.config.clone()).hooks(hooks).build().unwrap();
        let outcome = uploader.upload(png_request("a.png", 4, 4));

        assert_eq!(outcome.stored.unwrap().key, "renamed-a.png");
        assert!(alt_root.join("renamed-a.png").exists());
        assert!(!fx.root().join("renamed-a.png").exists());
    }

    #[test]
    fn stage_names() {
        assert_eq!(UploadStage::PersistPrimary.to_string(), "persist_primary");
        assert_eq!(UploadStage::Done.as_str(), "done");
    }
}
