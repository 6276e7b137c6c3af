use clap::{Parser, Subcommand};
use stowage::config::{self, UploaderConfig};
use stowage::imaging::Gravity;
use stowage::materialize::{MaterializeOptions, TempSource};
use stowage::output;
use stowage::upload::{UploadOptions, UploadRequest, UploadSource, Uploader};
use stowage::validate::FormatRule;
use stowage::versions::{VersionSpec, parse_versions};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Validation overrides shared by commands that accept a file.
#[derive(clap::Args, Clone)]
struct LimitArgs {
    /// Allowed formats: "*", images, videos, audios, documents, or "jpg,png"
    #[arg(long)]
    formats: Option<FormatRule>,

    /// Maximum size in bytes
    #[arg(long)]
    max_size: Option<u64>,

    /// Resize images before they are stored, e.g. "1200x" or "800x600"
    #[arg(long)]
    dimension: Option<VersionSpec>,
}

#[derive(Parser)]
#[command(name = "stowage")]
#[command(about = "Validate, store and derive image versions from uploads")]
#[command(long_about = "\
Validate, store and derive image versions from uploads

A source is a local path, an http(s) URL or a data: URI. Every upload is
checked against a format allow-list and a size ceiling, stored under a
collision-free name, and (for images) gets a thumbnail plus any requested
versions.

Version grammar (comma-separated):

  300x200          crop to exactly 300x200 around the gravity anchor
  300x             300 wide, height follows the aspect ratio
  x200             200 high, width follows the aspect ratio
  300?x200?        at most 300x200, never larger than the source
  300x200xresize   straight resize without cropping
  300x200xreplace  overwrite the stored file with this version
  300x200xauto     store as crop_<name> next to the original

Run 'stowage gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Directory containing config.toml
    #[arg(long, default_value = ".", global = true)]
    config: PathBuf,

    /// Print upload results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate and store a file, then derive its versions and thumbnail
    Upload {
        /// Local path, http(s) URL or data: URI
        source: String,

        /// Target folder relative to the storage root
        #[arg(long, default_value = "")]
        folder: String,

        /// Store under this name instead of the source's
        #[arg(long)]
        name: Option<String>,

        /// Versions to derive, e.g. "300x200,150x"
        #[arg(long)]
        versions: Option<String>,

        /// Skip the thumbnail
        #[arg(long)]
        no_thumb: bool,

        /// Overwrite an existing file instead of picking a unique name
        #[arg(long)]
        same_name: bool,

        /// Anchor kept when cropping
        #[arg(long)]
        gravity: Option<Gravity>,

        /// Delete the local source file after a successful upload
        #[arg(long)]
        remove_source: bool,

        #[command(flatten)]
        limits: LimitArgs,
    },
    /// Materialize a source into the temp directory without storing it
    Fetch {
        /// Local path, http(s) URL or data: URI
        source: String,

        /// File name for the temp file (required for data: URIs)
        #[arg(long)]
        name: Option<String>,

        #[command(flatten)]
        limits: LimitArgs,
    },
    /// Validate config.toml and print the effective settings
    Check,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Command::Upload {
            source,
            folder,
            name,
            versions,
            no_thumb,
            same_name,
            gravity,
            remove_source,
            limits,
        } => {
            let config = config::load_config(&cli.config)?;
            let uploader = Uploader::builder(config).build()?;
            let options = UploadOptions {
                folder,
                filename: name,
                same_name,
                formats: limits.formats,
                maximum: limits.max_size,
                generate_thumb: no_thumb.then_some(false),
                versions: match versions {
                    Some(list) => parse_versions(&list)?,
                    None => Vec::new(),
                },
                dimension: limits.dimension,
                gravity,
                remove_source,
                ..UploadOptions::default()
            };
            let request = UploadRequest::new(UploadSource::detect(&source)).with_options(options);
            let outcome = uploader.upload(request);
            if cli.json {
                output::print_upload_json(&outcome)?;
            } else {
                output::print_upload_outcome(&outcome);
            }
            if !outcome.is_success() {
                std::process::exit(1);
            }
        }
        Command::Fetch {
            source,
            name,
            limits,
        } => {
            let config = config::load_config(&cli.config)?;
            let uploader = Uploader::builder(config.clone()).build()?;
            let mut options = MaterializeOptions::from_config(&config);
            options.name = name;
            if let Some(formats) = limits.formats {
                options.formats = formats;
            }
            if let Some(max_size) = limits.max_size {
                options.maximum = max_size;
            }
            options.dimension = limits.dimension;

            std::fs::create_dir_all(uploader.materializer().temp_dir())?;
            let result = uploader
                .materializer()
                .materialize(TempSource::detect(&source), &options);
            output::print_materialized(&result);
            if !result.is_ok() {
                std::process::exit(1);
            }
        }
        Command::Check => {
            let config = config::load_config(&cli.config)?;
            print_effective_config(&config)?;
            println!("==> Config is valid");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Log to stderr so command output on stdout stays parseable.
///
/// Honors `RUST_LOG`; defaults to `info`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_effective_config(config: &UploaderConfig) -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
