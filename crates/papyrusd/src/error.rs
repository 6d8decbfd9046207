//! Error types for the papyrus CLI.

use thiserror::Error;

use super::*;

/// Errors that can occur while running a command.
#[derive(Error, Debug)]
pub enum PapyrusdError {
  /// An error from the pipeline library.
  #[error(transparent)]
  Papyrus(#[from] PapyrusError),

  /// An interactive prompt failed.
  #[error(transparent)]
  Dialog(#[from] dialoguer::Error),

  /// A file system operation failed.
  #[error(transparent)]
  Io(#[from] std::io::Error),

  /// The rolling log file could not be opened.
  #[error("could not open the log file: {0}")]
  Logging(#[from] tracing_appender::rolling::InitError),
}

/// Result type of the CLI.
pub type Result<T> = core::result::Result<T, PapyrusdError>;
