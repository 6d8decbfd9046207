//! Command line interface for the `papyrus` paper ingestion pipeline.
//!
//! The binary wraps the [`papyrus`] library: it loads the configuration, opens the ledger and
//! runs the orchestrator with the candidate source that matches the chosen command.
//!
//! # Usage
//!
//! ```bash
//! # Write a configuration file
//! papyrus init --pdf-dir ~/Papers --markdown-dir ~/Vault/literature
//!
//! # Process every new PDF once
//! papyrus run
//!
//! # Keep processing PDFs as they are dropped into the directory
//! papyrus watch
//!
//! # Keep processing new Zotero items
//! papyrus poll
//!
//! # Finish everything the ledger still has open
//! papyrus gap-fill
//!
//! # Inspect and repair the ledger
//! papyrus status --all
//! papyrus reset remote:ABCD1234 --to analysis
//! ```
//!
//! Long-running commands (`watch`, `poll`) also log to a daily file under the platform data
//! directory. Ctrl-C finishes the paper in progress, saves the ledger and exits.

#![warn(missing_docs, clippy::missing_docs_in_private_items)]

use std::path::{Path, PathBuf};

use clap::{builder::ArgAction, Args, Parser, Subcommand};
use console::style;
use papyrus::{
  config::{Config, RunMode},
  error::PapyrusError,
  record::{Identity, PaperRecord, Stage},
  store::RecordStore,
  CancelFlag,
};
use tracing::{debug, warn};
use tracing_appender::{
  non_blocking::{NonBlocking, WorkerGuard},
  rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub mod commands;
pub mod error;
pub mod interaction;

use crate::{commands::*, error::*, interaction::*};

/// Command line interface configuration and argument parsing
#[derive(Parser)]
#[command(author, version, about = "Deduplicated, resumable ingestion of academic papers")]
pub struct Cli {
  /// Verbose mode (-v, -vv, -vvv) for different levels of logging detail
  #[arg(
        short,
        long,
        action = ArgAction::Count,
        global = true,
        help = "Increase logging verbosity"
    )]
  pub verbose: u8,

  /// Path to the configuration file. If not specified, uses the default platform-specific
  /// configuration directory.
  #[arg(long, short, global = true)]
  pub config: Option<PathBuf>,

  /// The subcommand to execute
  #[command(subcommand)]
  pub command: Commands,

  /// Skip all prompts and accept defaults (mostly for testing)
  #[arg(long, hide = true, global = true)]
  pub accept_defaults: bool,
}

impl Cli {
  /// Location of the configuration file.
  pub fn config_path(&self) -> PathBuf { self.config.clone().unwrap_or_else(Config::default_path) }

  /// Loads the configuration, with environment overrides applied.
  pub fn load_config(&self) -> Result<Config> {
    let path = self.config_path();
    debug!("Using configuration at {}", path.display());
    Ok(Config::load(path)?)
  }
}

/// Directory of the rolling log files.
fn log_dir() -> PathBuf {
  dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("papyrus").join("logs")
}

/// Opens the daily rolling `papyrus.log` in `dir`.
fn file_writer(dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
  std::fs::create_dir_all(dir)?;
  let appender = RollingFileAppender::builder()
    .rotation(Rotation::DAILY)
    .filename_prefix("papyrus.log")
    .build(dir)?;
  Ok(tracing_appender::non_blocking(appender))
}

/// Configures the logging system based on the verbosity level
///
/// The verbosity levels are:
/// - 0: warn (default)
/// - 1: info
/// - 2: debug
/// - 3+: trace
///
/// `RUST_LOG` overrides the level. When `log_dir` is given, everything at `info` and above is
/// also written to the rolling log file there; keep the returned guard alive until exit so
/// buffered lines are flushed.
fn setup_logging(verbosity: u8, log_dir: Option<&Path>) -> Option<WorkerGuard> {
  let level = match verbosity {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
  let stderr = fmt::layer()
    .with_writer(std::io::stderr)
    .with_file(verbosity > 2)
    .with_line_number(verbosity > 2)
    .with_target(true)
    .with_filter(filter);

  let (writer, guard, failure) = match log_dir.map(file_writer).transpose() {
    Ok(Some((writer, guard))) => (Some(writer), Some(guard), None),
    Ok(None) => (None, None, None),
    Err(e) => (None, None, Some(e)),
  };
  let file = writer.map(|writer| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::layer().with_ansi(false).with_writer(writer).with_filter(filter)
  });

  tracing_subscriber::registry().with(stderr).with(file).init();
  if let Some(e) = failure {
    warn!("Logging to a file is disabled: {e}");
  }
  guard
}

/// Entry point for the papyrus CLI application
///
/// Parses the command line, sets up logging and runs the requested command. Failures are
/// printed as a styled diagnostic and the process exits with status 1.
#[tokio::main]
async fn main() {
  let cli = Cli::parse();

  let log_dir = cli.command.is_long_running().then(log_dir);
  let guard = setup_logging(cli.verbose, log_dir.as_deref());

  let result = match cli.command.clone() {
    Commands::Init(options) => init(&cli, options),
    Commands::Run => pipeline(&cli, RunMode::Batch).await,
    Commands::Watch => pipeline(&cli, RunMode::Watch).await,
    Commands::Poll => pipeline(&cli, RunMode::Poll).await,
    Commands::GapFill => pipeline(&cli, RunMode::GapFill).await,
    Commands::Status(options) => status(&cli, options),
    Commands::Reset(options) => reset(&cli, options),
  };

  if let Err(e) = result {
    cli.reply(ResponseContent::Error(&e));
    drop(guard);
    std::process::exit(1);
  }
}
