//! Simstore CLI - snapshot inspection and maintenance
//!
//! Reads store directories written by `EmbeddingStore::save`, prints their
//! headers, exports records as JSON lines and re-packs them.

#![allow(clippy::print_stdout)] // CLI program intentionally uses stdout

mod config;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use config::{CliConfig, ConfigError, config_path, load_config_from, render_config};
use serde_json::Value;
use simstore::factory::BACKEND_KEY;
use simstore::persist::{Compression, SnapshotHeader, read_header, snapshot_path};
use simstore::prelude::*;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Error type for CLI commands.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Store or snapshot failure.
    #[error(transparent)]
    Store(#[from] simstore::Error),
    /// Defaults file failure.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// Output failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

type CliResult<T> = std::result::Result<T, CliError>;

/// Simstore - inspect, export and re-pack embedding store snapshots
#[derive(Parser)]
#[command(name = "simstore")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, env = "SIMSTORE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the header of a saved store
    Info(InfoArgs),

    /// Write records of a saved store as JSON lines
    Export(ExportArgs),

    /// Load a saved store and save it again
    Repack(RepackArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the info command
#[derive(Args)]
struct InfoArgs {
    /// Store directory or snapshot file
    dir: PathBuf,
}

/// Arguments for the export command
#[derive(Args)]
struct ExportArgs {
    /// Store directory or snapshot file
    dir: PathBuf,

    /// Maximum rows to write, 0 for all (overrides config)
    #[arg(short, long)]
    limit: Option<usize>,

    /// Output file, stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,
}

/// Arguments for the repack command
#[derive(Args)]
struct RepackArgs {
    /// Source store directory or snapshot file
    src: PathBuf,

    /// Destination directory
    dst: PathBuf,

    /// Gzip the body (overrides config)
    #[arg(long, value_enum)]
    compression: Option<Switch>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl From<Switch> for bool {
    fn from(value: Switch) -> Self {
        matches!(value, Switch::On)
    }
}

/// Arguments for the config command
#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Show configuration file path
    Path,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with the given verbosity level.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("simstore={level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .with_writer(io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> CliResult<()> {
    let config_file = cli.config.unwrap_or_else(config_path);

    match cli.command {
        Commands::Info(args) => cmd_info(&args),
        Commands::Export(args) => {
            let config = load_config_from(&config_file).await?;
            cmd_export(args, &config).await
        }
        Commands::Repack(args) => {
            let config = load_config_from(&config_file).await?;
            cmd_repack(args, &config).await
        }
        Commands::Config(args) => cmd_config(&args, &config_file).await,
    }
}

/// Print a snapshot header.
fn cmd_info(args: &InfoArgs) -> CliResult<()> {
    let header = read_header(&args.dir)?;
    let config = serde_json::to_string(&header.config).map_err(simstore::Error::from)?;

    println!("Snapshot: {}", snapshot_path(&args.dir).display());
    println!("  Format:      {} v{}", header.format, header.version);
    println!("  Backend:     {}", header.backend);
    println!("  Compression: {}", compression_name(header.compression));
    println!("  Records:     {}", header.count);
    println!("  Config:      {config}");

    Ok(())
}

/// Export records as JSON lines.
async fn cmd_export(args: ExportArgs, config: &CliConfig) -> CliResult<()> {
    let header = read_header(&args.dir)?;
    let name = header.config["name"].as_str().unwrap_or(FALLBACK_NAME);
    let store = MemoryStore::new(name);
    store.load(&args.dir).await?;

    let limit = args.limit.unwrap_or(config.export.limit);
    let frame = store.to_data_frame(limit).await?;

    match args.output {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(&path)?);
            frame.write_json_lines(&mut writer)?;
            writer.flush()?;
            tracing::info!(rows = frame.len(), path = %path.display(), "exported records");
        }
        None => {
            let mut writer = BufWriter::new(io::stdout().lock());
            frame.write_json_lines(&mut writer)?;
            writer.flush()?;
        }
    }

    Ok(())
}

/// Load `src` into a scratch store of the same backend and save it to `dst`.
async fn cmd_repack(args: RepackArgs, config: &CliConfig) -> CliResult<()> {
    let header = read_header(&args.src)?;
    let store = scratch_store(&header)?;
    let count = store.load(&args.src).await?;

    let compression = args.compression.map_or(config.save.compression, bool::from);
    store.save(&args.dst, compression).await?;

    println!(
        "Repacked {count} records: {} -> {} ({})",
        snapshot_path(&args.src).display(),
        snapshot_path(&args.dst).display(),
        compression_name(Compression::from_flag(compression)),
    );

    Ok(())
}

/// Configuration management.
async fn cmd_config(args: &ConfigArgs, config_file: &Path) -> CliResult<()> {
    match args.command {
        ConfigCommands::Path => {
            println!("{}", config_file.display());
        }
        ConfigCommands::Show => {
            let config = load_config_from(config_file).await?;
            print!("{}", render_config(&config)?);
        }
    }

    Ok(())
}

/// Name used when a snapshot header carries no store name.
const FALLBACK_NAME: &str = "snapshot";

/// An empty ephemeral store matching the backend and config in `header`.
///
/// On-disk locations are dropped so that loading never touches the store
/// the snapshot came from.
fn scratch_store(header: &SnapshotHeader) -> simstore::Result<Box<dyn EmbeddingStore>> {
    let mut config = header.config.clone();
    if let Value::Object(map) = &mut config {
        map.remove("path");
        map.insert(BACKEND_KEY.to_owned(), Value::from(header.backend.as_str()));
    }
    open_store(config)
}

const fn compression_name(compression: Compression) -> &'static str {
    match compression {
        Compression::Gzip => "gzip",
        Compression::None => "none",
    }
}
