//! Temp materializer: turn a remote URL, a `data:` URI or a local path into a
//! validated local file.
//!
//! | Source | Validation order |
//! |---|---|
//! | `data:` URI | name required, format checked before decoding, size on decoded bytes |
//! | `http(s)://` URL | format checked on the URL's file name before connecting, size on `Content-Length` and again on the bytes read |
//! | local path | format and size checked, then copied |
//!
//! URLs under `storage.public_base_url` point back into this system's own
//! storage and are copied from disk with no network round-trip.
//!
//! [`Materializer::materialize`] never returns `Err`: a failure produces a
//! [`Materialized`] with only its `error` set.

use crate::config::UploaderConfig;
use crate::error::UploadError;
use crate::hooks::Hooks;
use crate::imaging::{
    Gravity, ImageBackend, OutputTarget, Quality, RustBackend, apply_version,
};
use crate::naming::{fix_filename, resolve_unique_name, sanitize_folder, split_name};
use crate::validate::{
    FileKind, FormatRule, check_active_content, check_format, classify, extension_of,
    validate_size,
};
use crate::versions::VersionSpec;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use percent_encoding::percent_decode_str;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Where a temp file's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TempSource {
    /// `http://` or `https://` URL.
    Remote(String),
    /// A `data:` URI.
    Inline(String),
    /// A file on the local filesystem.
    Local(PathBuf),
}

impl TempSource {
    /// Classify a command-line style source string.
    pub fn detect(source: &str) -> Self {
        let lower = source.trim_start().to_ascii_lowercase();
        if lower.starts_with("data:") {
            TempSource::Inline(source.trim().to_string())
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            TempSource::Remote(source.trim().to_string())
        } else {
            TempSource::Local(PathBuf::from(source))
        }
    }
}

/// How a temp file was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Remote,
    Inline,
    LocalCopy,
}

/// A materialized local file.
///
/// Transient files delete themselves when dropped; other files stay until
/// [`TempFile::cleanup`] is called.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    name: String,
    provenance: Provenance,
    size: u64,
    transient: bool,
}

impl TempFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name the content was validated under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    /// Delete the file now. A file that is already gone is not an error.
    pub fn cleanup(mut self) -> io::Result<()> {
        self.transient = false;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.transient {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "Failed to remove temp file");
                }
            }
        }
    }
}

/// Result of a materialization: exactly one of `file` and `error` is set.
#[derive(Debug)]
pub struct Materialized {
    pub file: Option<TempFile>,
    pub error: Option<UploadError>,
}

impl Materialized {
    pub fn is_ok(&self) -> bool {
        self.file.is_some()
    }

    pub fn into_result(self) -> Result<TempFile, UploadError> {
        match (self.file, self.error) {
            (Some(file), _) => Ok(file),
            (None, Some(err)) => Err(err),
            (None, None) => Err(UploadError::Materialization("no file produced".into())),
        }
    }
}

/// Per-call materialization options.
#[derive(Debug, Clone)]
pub struct MaterializeOptions {
    /// File name to validate and store under. Required for `data:` URIs.
    pub name: Option<String>,
    pub formats: FormatRule,
    pub maximum: u64,
    /// Resize applied to image files after they land on disk.
    pub dimension: Option<VersionSpec>,
    pub transient: bool,
    pub reject_active_content: bool,
}

impl MaterializeOptions {
    pub fn from_config(config: &UploaderConfig) -> Self {
        Self {
            name: None,
            formats: config.limits.formats.clone(),
            maximum: config.limits.max_size,
            dimension: None,
            transient: false,
            reject_active_content: config.security.reject_active_content,
        }
    }
}

/// Produces local temp files from remote, inline and local sources.
pub struct Materializer<B: ImageBackend = RustBackend> {
    backend: Arc<B>,
    hooks: Arc<Hooks>,
    temp_dir: PathBuf,
    storage_root: PathBuf,
    public_base_url: Option<Url>,
    quality: Quality,
    gravity: Gravity,
    client: reqwest::blocking::Client,
}

impl<B: ImageBackend> Materializer<B> {
    pub fn new(config: &UploaderConfig, backend: Arc<B>, hooks: Arc<Hooks>) -> Result<Self, UploadError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.fetch_timeout())
            .connect_timeout(config.fetch_timeout().min(Duration::from_secs(10)))
            .build()
            .map_err(|e| UploadError::Setup(format!("Failed to create HTTP client: {e}")))?;
        let public_base_url = config
            .storage
            .public_base_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| UploadError::Setup(format!("storage.public_base_url: {e}")))?;

        Ok(Self {
            backend,
            hooks,
            temp_dir: config.temp_dir(),
            storage_root: PathBuf::from(&config.storage.root),
            public_base_url,
            quality: Quality::new(config.images.quality),
            gravity: config.thumbnails.gravity,
            client,
        })
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Materialize `source` into the configured temp dir. Failures are
    /// returned inside the result.
    pub fn materialize(&self, source: TempSource, options: &MaterializeOptions) -> Materialized {
        self.materialize_in(&self.temp_dir, source, options)
    }

    /// [`Materializer::materialize`] into an explicit directory.
    pub fn materialize_in(
        &self,
        dir: &Path,
        source: TempSource,
        options: &MaterializeOptions,
    ) -> Materialized {
        match self.try_materialize(dir, source, options) {
            Ok(file) => {
                info!(
                    path = %file.path.display(),
                    size = file.size,
                    provenance = ?file.provenance,
                    "Materialized temp file"
                );
                Materialized {
                    file: Some(file),
                    error: None,
                }
            }
            Err(err) => {
                warn!(error = %err, "Materialization failed");
                Materialized {
                    file: None,
                    error: Some(err),
                }
            }
        }
    }

    fn try_materialize(
        &self,
        dir: &Path,
        source: TempSource,
        options: &MaterializeOptions,
    ) -> Result<TempFile, UploadError> {
        fs::create_dir_all(dir)?;
        let mut file = match source {
            TempSource::Inline(uri) => self.from_inline(dir, &uri, options)?,
            TempSource::Remote(url) => self.from_remote(dir, &url, options)?,
            TempSource::Local(path) => {
                let name = options
                    .name
                    .clone()
                    .or_else(|| path.file_name().map(|n| n.to_string_lossy().to_string()))
                    .ok_or_else(|| {
                        UploadError::EmptyInput(format!("{} has no file name", path.display()))
                    })?;
                self.from_local(dir, &path, &name, Provenance::LocalCopy, options)?
            }
        };

        if let Some(spec) = &options.dimension {
            if classify(&file.name) == FileKind::Image {
                if let Err(err) = self.apply_dimension(&mut file, spec) {
                    if let Err(e) = file.cleanup() {
                        warn!(error = %e, "Failed to remove temp file");
                    }
                    return Err(err);
                }
            }
        }
        Ok(file)
    }

    fn apply_dimension(&self, file: &mut TempFile, spec: &VersionSpec) -> Result<(), UploadError> {
        let output = apply_version(
            &*self.backend,
            &self.hooks,
            &file.path,
            spec,
            self.gravity,
            &OutputTarget::Overwrite,
            self.quality,
        )?;
        if output != file.path {
            fs::remove_file(&file.path)?;
            file.name = output
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| file.name.clone());
            file.path = output;
        }
        file.size = fs::metadata(&file.path)?.len();
        debug!(path = %file.path.display(), spec = %spec, "Resized temp file");
        Ok(())
    }

    fn from_inline(
        &self,
        dir: &Path,
        uri: &str,
        options: &MaterializeOptions,
    ) -> Result<TempFile, UploadError> {
        let (mime, is_base64, payload) = parse_data_uri(uri)?;
        let name = options
            .name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| UploadError::EmptyInput("inline payload needs a file name".into()))?;
        let name = name_with_mime_extension(name, mime, &options.formats);

        // Reject before spending time on decoding.
        check_format(&name, &options.formats)?;

        let bytes = if is_base64 {
            let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
            STANDARD
                .decode(compact)
                .map_err(|e| UploadError::Materialization(format!("invalid base64 payload: {e}")))?
        } else {
            percent_decode_str(payload).collect()
        };
        self.check_bytes(&name, &bytes, options)?;
        write_temp(dir, bytes.as_slice(), &name, Provenance::Inline, options.transient)
    }

    fn from_remote(
        &self,
        dir: &Path,
        raw: &str,
        options: &MaterializeOptions,
    ) -> Result<TempFile, UploadError> {
        let url = Url::parse(raw)
            .map_err(|e| UploadError::Materialization(format!("invalid URL '{raw}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(UploadError::Materialization(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }

        let apparent = options.name.clone().unwrap_or_else(|| url_file_name(&url));
        if extension_of(&apparent).is_some() {
            check_format(&apparent, &options.formats)?;
        }

        if let Some(local) = self.self_storage_path(&url)? {
            debug!(url = %url, path = %local.display(), "URL points into own storage");
            return self.from_local(dir, &local, &apparent, Provenance::LocalCopy, options);
        }

        let mut response = self.client.get(url.clone()).send().map_err(|e| {
            if e.is_timeout() {
                UploadError::Materialization(format!("fetching {url} timed out"))
            } else {
                UploadError::Materialization(format!("fetching {url} failed: {e}"))
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Materialization(format!(
                "fetching {url} returned HTTP {status}"
            )));
        }
        if let Some(declared) = response.content_length() {
            validate_size(declared, options.maximum)?;
        }

        let name = if extension_of(&apparent).is_some() {
            apparent
        } else {
            let mime = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            let named = name_with_mime_extension(&apparent, mime, &options.formats);
            check_format(&named, &options.formats)?;
            named
        };

        let mut bytes = Vec::new();
        (&mut response)
            .take(options.maximum.saturating_add(1))
            .read_to_end(&mut bytes)
            .map_err(|e| UploadError::Materialization(format!("reading {url} failed: {e}")))?;
        self.check_bytes(&name, &bytes, options)?;
        write_temp(dir, bytes.as_slice(), &name, Provenance::Remote, options.transient)
    }

    fn from_local(
        &self,
        dir: &Path,
        path: &Path,
        name: &str,
        provenance: Provenance,
        options: &MaterializeOptions,
    ) -> Result<TempFile, UploadError> {
        check_format(name, &options.formats)?;
        let metadata = fs::metadata(path).map_err(|e| {
            UploadError::Materialization(format!("cannot read {}: {e}", path.display()))
        })?;
        validate_size(metadata.len(), options.maximum)?;
        let bytes = fs::read(path)?;
        self.check_bytes(name, &bytes, options)?;
        write_temp(dir, bytes.as_slice(), name, provenance, options.transient)
    }

    /// Local path for URLs under the public base URL.
    fn self_storage_path(&self, url: &Url) -> Result<Option<PathBuf>, UploadError> {
        let Some(base) = &self.public_base_url else {
            return Ok(None);
        };
        if url.scheme() != base.scheme()
            || url.host_str() != base.host_str()
            || url.port_or_known_default() != base.port_or_known_default()
        {
            return Ok(None);
        }
        let prefix = format!("{}/", base.path().trim_end_matches('/'));
        let Some(relative) = url.path().strip_prefix(&prefix) else {
            return Ok(None);
        };
        let decoded = percent_decode_str(relative).decode_utf8_lossy();
        let key = sanitize_folder(&decoded)?;
        if key.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.storage_root.join(key)))
    }

    fn check_bytes(
        &self,
        name: &str,
        bytes: &[u8],
        options: &MaterializeOptions,
    ) -> Result<(), UploadError> {
        validate_size(bytes.len() as u64, options.maximum)?;
        if options.reject_active_content {
            check_active_content(name, bytes)?;
        }
        Ok(())
    }
}

/// Copy `source` to a collision-free name in `dir`. A failed copy leaves
/// nothing behind.
fn write_temp(
    dir: &Path,
    mut source: impl Read,
    name: &str,
    provenance: Provenance,
    transient: bool,
) -> Result<TempFile, UploadError> {
    let clean = fix_filename(name);
    let unique = resolve_unique_name(dir, &clean)?;
    let path = dir.join(&unique);
    let mut out = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(out) => out,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(UploadError::NameResolutionConflict { key: unique });
        }
        Err(e) => return Err(e.into()),
    };
    let size = match io::copy(&mut source, &mut out).and_then(|n| out.flush().map(|_| n)) {
        Ok(size) => size,
        Err(e) => {
            drop(out);
            if let Err(cleanup) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %cleanup, "Failed to remove partial temp file");
            }
            return Err(e.into());
        }
    };
    Ok(TempFile {
        path,
        name: unique,
        provenance,
        size,
        transient,
    })
}

/// Split a `data:` URI into media type, base64 flag and payload.
fn parse_data_uri(uri: &str) -> Result<(&str, bool, &str), UploadError> {
    let rest = uri
        .get(..5)
        .filter(|p| p.eq_ignore_ascii_case("data:"))
        .map(|_| &uri[5..])
        .ok_or_else(|| UploadError::Materialization("not a data: URI".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| UploadError::Materialization("data: URI has no payload".into()))?;
    if payload.trim().is_empty() {
        return Err(UploadError::EmptyInput("data: URI payload is empty".into()));
    }
    let mut params = header.split(';');
    let mime = params.next().unwrap_or("").trim();
    let is_base64 = params.any(|p| p.trim().eq_ignore_ascii_case("base64"));
    Ok((mime, is_base64, payload))
}

/// Append an extension derived from `mime` when `name` has none, preferring
/// one the allow-list accepts.
fn name_with_mime_extension(name: &str, mime: &str, formats: &FormatRule) -> String {
    if split_name(name).1.is_some() {
        return name.to_string();
    }
    let essence = mime.split(';').next().unwrap_or("").trim();
    let Some(candidates) = mime_guess::get_mime_extensions_str(essence) else {
        return name.to_string();
    };
    let ext = candidates
        .iter()
        .find(|ext| formats.allows(Some(**ext)))
        .or_else(|| candidates.first());
    match ext {
        Some(ext) => format!("{name}.{ext}"),
        None => name.to_string(),
    }
}

/// Last non-empty path segment of `url`, percent-decoded.
fn url_file_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(|s| percent_decode_str(s).decode_utf8_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "download".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{create_test_png, image_dims, png_bytes};
    use std::net::TcpListener;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        _tmp: TempDir,
        temp_dir: PathBuf,
        storage_root: PathBuf,
        config: UploaderConfig,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let temp_dir = tmp.path().join("tmp");
        let storage_root = tmp.path().join("uploads");
        fs::create_dir_all(&storage_root).unwrap();

        let mut config = UploaderConfig::default();
        config.storage.root = storage_root.to_string_lossy().to_string();
        config.storage.temp_dir = Some(temp_dir.to_string_lossy().to_string());
        config.storage.public_base_url = Some("http://files.example.test/uploads".into());
        config.fetch.timeout_secs = 5;

        Fixture {
            _tmp: tmp,
            temp_dir,
            storage_root,
            config,
        }
    }

    fn materializer(config: &UploaderConfig) -> Materializer {
        Materializer::new(config, Arc::new(RustBackend::new()), Arc::new(Hooks::new())).unwrap()
    }

    fn options(config: &UploaderConfig, name: Option<&str>) -> MaterializeOptions {
        MaterializeOptions {
            name: name.map(String::from),
            ..MaterializeOptions::from_config(config)
        }
    }

    /// Mock HTTP server answering `GET route`. The runtime must outlive the
    /// requests made against the server.
    fn serve(route: &str, response: ResponseTemplate) -> (tokio::runtime::Runtime, MockServer) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let server = runtime.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(response)
                .mount(&server)
                .await;
            server
        });
        (runtime, server)
    }

    /// One-shot HTTP/1.0 server that sends `body` without a Content-Length,
    /// so the client only learns the size by reading to EOF.
    fn serve_unsized(body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => return,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let head = "HTTP/1.0 200 OK\r\nContent-Type: image/png\r\nConnection: close\r\n\r\n";
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
        });
        format!("http://{addr}/stream.png")
    }

    fn png_data_uri(width: u32, height: u32) -> String {
        format!("data:image/png;base64,{}", STANDARD.encode(png_bytes(width, height)))
    }

    // =========================================================================
    // Inline payloads
    // =========================================================================

    #[test]
    fn inline_png_is_decoded_to_temp_dir() {
        let fx = fixture();
        let m = materializer(&fx.config);
        let file = m
            .materialize(TempSource::Inline(png_data_uri(12, 8)), &options(&fx.config, Some("dot.png")))
            .into_result()
            .unwrap();

        assert_eq!(file.provenance(), Provenance::Inline);
        assert_eq!(file.path(), fx.temp_dir.join("dot.png"));
        assert_eq!(image_dims(file.path()), (12, 8));
    }

    #[test]
    fn inline_requires_a_name() {
        let fx = fixture();
        let result = materializer(&fx.config)
            .materialize(TempSource::Inline(png_data_uri(2, 2)), &options(&fx.config, None));
        assert!(result.file.is_none());
        assert!(matches!(result.error, Some(UploadError::EmptyInput(_))));
    }

    #[test]
    fn inline_name_without_extension_uses_mime() {
        let fx = fixture();
        let file = materializer(&fx.config)
            .materialize(TempSource::Inline(png_data_uri(2, 2)), &options(&fx.config, Some("avatar")))
            .into_result()
            .unwrap();
        assert_eq!(file.name(), "avatar.png");
    }

    #[test]
    fn inline_format_checked_before_decoding() {
        let fx = fixture();
        let mut opts = options(&fx.config, Some("setup.exe"));
        opts.formats = "images".parse().unwrap();
        let result = materializer(&fx.config)
            .materialize(TempSource::Inline("data:;base64,!!not-base64!!".into()), &opts);
        assert!(matches!(result.error, Some(UploadError::Format { .. })));
    }

    #[test]
    fn inline_bad_base64_is_materialization_error() {
        let fx = fixture();
        let result = materializer(&fx.config).materialize(
            TempSource::Inline("data:image/png;base64,!!!".into()),
            &options(&fx.config, Some("x.png")),
        );
        assert!(matches!(result.error, Some(UploadError::Materialization(_))));
    }

    #[test]
    fn inline_oversized_payload_is_size_error() {
        let fx = fixture();
        let mut opts = options(&fx.config, Some("big.png"));
        opts.maximum = 10;
        let result = materializer(&fx.config).materialize(TempSource::Inline(png_data_uri(20, 20)), &opts);
        assert!(matches!(result.error, Some(UploadError::Size { maximum: 10, .. })));
        assert!(!fx.temp_dir.join("big.png").exists());
    }

    #[test]
    fn inline_svg_with_script_is_rejected() {
        let fx = fixture();
        let svg = "<svg xmlns=\"http://www.w3.org/2000/svg\"><script>alert(1)</script></svg>";
        let uri = format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg));
        let result = materializer(&fx.config)
            .materialize(TempSource::Inline(uri), &options(&fx.config, Some("x.svg")));
        assert!(matches!(result.error, Some(UploadError::Format { .. })));
    }

    #[test]
    fn inline_percent_encoded_text() {
        let fx = fixture();
        let file = materializer(&fx.config)
            .materialize(
                TempSource::Inline("data:text/plain,hello%20world".into()),
                &options(&fx.config, Some("note.txt")),
            )
            .into_result()
            .unwrap();
        assert_eq!(fs::read(file.path()).unwrap(), b"hello world");
    }

    // =========================================================================
    // Local sources + lifecycle
    // =========================================================================

    #[test]
    fn local_copy_gets_unique_name() {
        let fx = fixture();
        let src = fx.storage_root.join("cat.png");
        create_test_png(&src, 4, 4);
        let m = materializer(&fx.config);
        let opts = options(&fx.config, None);

        let first = m.materialize(TempSource::Local(src.clone()), &opts).into_result().unwrap();
        let second = m.materialize(TempSource::Local(src), &opts).into_result().unwrap();
        assert_eq!(first.name(), "cat.png");
        assert_eq!(second.name(), "cat_1.png");
        assert_eq!(second.provenance(), Provenance::LocalCopy);
    }

    #[test]
    fn transient_file_is_removed_on_drop() {
        let fx = fixture();
        let src = fx.storage_root.join("a.txt");
        fs::write(&src, "x").unwrap();
        let mut opts = options(&fx.config, None);
        opts.transient = true;

        let file = materializer(&fx.config)
            .materialize(TempSource::Local(src), &opts)
            .into_result()
            .unwrap();
        let path = file.path().to_path_buf();
        assert!(path.exists());
        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn non_transient_file_survives_drop_until_cleanup() {
        let fx = fixture();
        let src = fx.storage_root.join("a.txt");
        fs::write(&src, "x").unwrap();

        let m = materializer(&fx.config);
        let opts = options(&fx.config, None);
        let path = {
            let file = m.materialize(TempSource::Local(src.clone()), &opts).into_result().unwrap();
            file.path().to_path_buf()
        };
        assert!(path.exists());

        let file = m.materialize(TempSource::Local(src), &opts).into_result().unwrap();
        let second = file.path().to_path_buf();
        file.cleanup().unwrap();
        assert!(!second.exists());
    }

    #[test]
    fn dimension_resizes_image_after_materialization() {
        let fx = fixture();
        let mut opts = options(&fx.config, Some("p.png"));
        opts.dimension = Some("20x10".parse().unwrap());
        let file = materializer(&fx.config)
            .materialize(TempSource::Inline(png_data_uri(50, 50)), &opts)
            .into_result()
            .unwrap();
        assert_eq!(image_dims(file.path()), (20, 10));
        assert_eq!(file.size(), fs::metadata(file.path()).unwrap().len());
    }

    // =========================================================================
    // Remote sources
    // =========================================================================

    #[test]
    fn remote_format_rejected_before_fetch() {
        let fx = fixture();
        let mut opts = options(&fx.config, None);
        opts.formats = "images".parse().unwrap();
        let result = materializer(&fx.config)
            .materialize(TempSource::Remote("http://127.0.0.1:9/setup.exe".into()), &opts);
        assert!(matches!(result.error, Some(UploadError::Format { .. })));
    }

    #[test]
    fn remote_connection_failure_is_materialization_error() {
        let fx = fixture();
        let result = materializer(&fx.config).materialize(
            TempSource::Remote("http://127.0.0.1:9/photo.png".into()),
            &options(&fx.config, None),
        );
        assert!(result.file.is_none());
        assert!(matches!(result.error, Some(UploadError::Materialization(_))));
    }

    #[test]
    fn remote_image_is_fetched_into_temp_dir() {
        let fx = fixture();
        let (_runtime, server) = serve(
            "/photos/cat.png",
            ResponseTemplate::new(200).set_body_raw(png_bytes(9, 7), "image/png"),
        );

        let file = materializer(&fx.config)
            .materialize(
                TempSource::Remote(format!("{}/photos/cat.png", server.uri())),
                &options(&fx.config, None),
            )
            .into_result()
            .unwrap();
        assert_eq!(file.provenance(), Provenance::Remote);
        assert_eq!(file.name(), "cat.png");
        assert!(file.path().starts_with(&fx.temp_dir));
        assert_eq!(image_dims(file.path()), (9, 7));
    }

    #[test]
    fn remote_error_status_is_materialization_error() {
        let fx = fixture();
        let (_runtime, server) = serve("/gone.png", ResponseTemplate::new(404));
        let result = materializer(&fx.config).materialize(
            TempSource::Remote(format!("{}/gone.png", server.uri())),
            &options(&fx.config, None),
        );
        match result.error {
            Some(UploadError::Materialization(msg)) => assert!(msg.contains("404"), "{msg}"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn remote_declared_length_over_maximum_is_size_error() {
        let fx = fixture();
        let (_runtime, server) = serve(
            "/big.png",
            ResponseTemplate::new(200).set_body_raw(vec![0u8; 2000], "image/png"),
        );
        let mut opts = options(&fx.config, None);
        opts.maximum = 1000;

        let result = materializer(&fx.config)
            .materialize(TempSource::Remote(format!("{}/big.png", server.uri())), &opts);
        // The declared length is rejected before the body is read.
        match result.error {
            Some(UploadError::Size { size, maximum }) => {
                assert_eq!(size, 2000);
                assert_eq!(maximum, 1000);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(!fx.temp_dir.exists() || fs::read_dir(&fx.temp_dir).unwrap().next().is_none());
    }

    #[test]
    fn remote_body_without_length_is_bounded() {
        let fx = fixture();
        let url = serve_unsized(vec![7u8; 5000]);
        let mut opts = options(&fx.config, None);
        opts.maximum = 1000;

        let result = materializer(&fx.config).materialize(TempSource::Remote(url), &opts);
        // Reading stops one byte past the ceiling.
        match result.error {
            Some(UploadError::Size { size, .. }) => assert_eq!(size, 1001),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(result.file.is_none());
    }

    #[test]
    fn remote_extensionless_name_takes_content_type() {
        let fx = fixture();
        let (_runtime, server) = serve(
            "/avatar",
            ResponseTemplate::new(200).set_body_raw(png_bytes(4, 4), "image/png"),
        );
        let mut opts = options(&fx.config, None);
        opts.formats = "images".parse().unwrap();

        let file = materializer(&fx.config)
            .materialize(TempSource::Remote(format!("{}/avatar", server.uri())), &opts)
            .into_result()
            .unwrap();
        assert_eq!(file.name(), "avatar.png");
        assert_eq!(image_dims(file.path()), (4, 4));
    }

    #[test]
    fn remote_content_type_outside_allow_list_is_rejected() {
        let fx = fixture();
        let (_runtime, server) = serve(
            "/avatar",
            ResponseTemplate::new(200).set_body_raw(b"<html></html>".to_vec(), "text/html"),
        );
        let mut opts = options(&fx.config, None);
        opts.formats = "images".parse().unwrap();

        let result = materializer(&fx.config)
            .materialize(TempSource::Remote(format!("{}/avatar", server.uri())), &opts);
        assert!(matches!(result.error, Some(UploadError::Format { .. })), "{:?}", result.error);
        assert!(result.file.is_none());
    }

    #[test]
    fn self_storage_url_is_copied_from_disk() {
        let fx = fixture();
        fs::create_dir_all(fx.storage_root.join("products")).unwrap();
        create_test_png(&fx.storage_root.join("products/my cat.png"), 6, 6);

        let file = materializer(&fx.config)
            .materialize(
                TempSource::Remote("http://files.example.test/uploads/products/my%20cat.png".into()),
                &options(&fx.config, None),
            )
            .into_result()
            .unwrap();
        assert_eq!(file.provenance(), Provenance::LocalCopy);
        assert_eq!(file.name(), "my-cat.png");
        assert_eq!(image_dims(file.path()), (6, 6));
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Yields a few bytes, then fails.
    struct BrokenReader {
        sent: bool,
    }

    impl Read for BrokenReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                return Err(io::Error::other("connection reset"));
            }
            self.sent = true;
            let n = buf.len().min(4);
            buf[..n].fill(b'x');
            Ok(n)
        }
    }

    #[test]
    fn failed_temp_write_leaves_no_file() {
        let tmp = TempDir::new().unwrap();
        let result = write_temp(
            tmp.path(),
            BrokenReader { sent: false },
            "partial.png",
            Provenance::Remote,
            true,
        );
        assert!(matches!(result, Err(UploadError::Io(_))), "{result:?}");
        assert!(!tmp.path().join("partial.png").exists());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn temp_write_records_copied_size() {
        let tmp = TempDir::new().unwrap();
        let file = write_temp(tmp.path(), &b"hello"[..], "a.txt", Provenance::Inline, false).unwrap();
        assert_eq!(file.size(), 5);
        assert_eq!(fs::read(file.path()).unwrap(), b"hello");
    }

    #[test]
    fn detect_source_kinds() {
        assert!(matches!(TempSource::detect("data:text/plain,x"), TempSource::Inline(_)));
        assert!(matches!(TempSource::detect("HTTPS://a.test/x.png"), TempSource::Remote(_)));
        assert!(matches!(TempSource::detect("./x.png"), TempSource::Local(_)));
    }

    #[test]
    fn url_file_name_decodes_last_segment() {
        let url = Url::parse("https://a.test/dir/my%20file.jpg?x=1").unwrap();
        assert_eq!(url_file_name(&url), "my file.jpg");
        let url = Url::parse("https://a.test/").unwrap();
        assert_eq!(url_file_name(&url), "download");
    }

    #[test]
    fn parse_data_uri_parts() {
        let (mime, b64, payload) = parse_data_uri("DATA:image/png;base64,AAAA").unwrap();
        assert_eq!((mime, b64, payload), ("image/png", true, "AAAA"));
        assert!(parse_data_uri("data:image/png;base64,").is_err());
        assert!(parse_data_uri("image/png,AAAA").is_err());
    }
}
