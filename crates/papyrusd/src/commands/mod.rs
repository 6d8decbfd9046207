use super::*;

pub mod init;
pub mod pipeline;
pub mod reset;
pub mod status;

pub use init::{init, InitOptions};
pub use pipeline::pipeline;
pub use reset::{reset, ResetOptions};
pub use status::{status, StatusOptions};

/// Available commands for the CLI
#[derive(Subcommand, Clone)]
pub enum Commands {
  /// Write a configuration file
  Init(InitOptions),

  /// Process every new PDF in the PDF directory once
  Run,

  /// Watch the PDF directory and process PDFs as they appear
  Watch,

  /// Poll the Zotero library and process new items
  Poll,

  /// Finish every incomplete record in the ledger
  GapFill,

  /// Show what the ledger knows
  Status(StatusOptions),

  /// Rewind a record so a stage runs again
  Reset(ResetOptions),
}

impl Commands {
  /// Whether the command keeps running until interrupted.
  pub fn is_long_running(&self) -> bool { matches!(self, Commands::Watch | Commands::Poll) }
}
