//! Error types for the papyrus library.
//!
//! Errors fall into two groups, and the orchestrator treats them very differently:
//!
//! - **Per-candidate** failures (an unreadable PDF, a failed or slow LLM call, a rejected remote
//!   write) are caught at the orchestrator boundary, stored in the record's `last_error` and
//!   retried on the next run.
//! - **Fatal** failures (an unreadable ledger, bad configuration, a ledger that cannot be
//!   written) abort the whole run, since continuing would risk duplicate work or silently lost
//!   history.
//!
//! [`PapyrusError::is_fatal`] encodes that split.
//!
//! # Examples
//!
//! ```
//! use papyrus::error::PapyrusError;
//!
//! let err = PapyrusError::Timeout { secs: 120 };
//! assert!(!err.is_fatal());
//!
//! let err = PapyrusError::Config("missing pdf_dir".into());
//! assert!(err.is_fatal());
//! ```

use std::path::PathBuf;

use thiserror::Error;

/// Error type alias used for the [`papyrus`](crate) crate.
pub type Result<T> = core::result::Result<T, PapyrusError>;

/// Errors that can occur while ingesting papers.
#[derive(Error, Debug)]
pub enum PapyrusError {
  /// Text could not be pulled out of a PDF.
  ///
  /// This happens for malformed files and for scanned, image-only papers that carry no text
  /// layer. OCR is out of scope, so such papers stay at their current stage.
  #[error("Could not extract text from {path:?}: {reason}")]
  Extraction {
    /// The PDF that failed.
    path:   PathBuf,
    /// What went wrong.
    reason: String,
  },

  /// No local PDF is available for a record that needs its text.
  ///
  /// Typical for reference-manager items whose attachment was never synced to local storage.
  #[error("No local PDF available for {0}")]
  MissingPdf(String),

  /// The LLM API (or another external API) returned an error response.
  #[error("API error: {0}")]
  Api(String),

  /// An external call exceeded its configured deadline.
  #[error("Request timed out after {secs}s")]
  Timeout {
    /// The configured deadline in seconds.
    secs: u64,
  },

  /// Writing a note back to the reference manager failed.
  ///
  /// Recorded independently from markdown success so only the failed write is repeated.
  #[error("Remote sync failed: {0}")]
  RemoteSync(String),

  /// The persisted ledger could not be understood.
  ///
  /// The run refuses to continue rather than starting from an empty ledger and redoing (and
  /// paying for) every paper again.
  #[error("Record store at {path:?} is corrupt: {reason}")]
  CorruptStore {
    /// Location of the ledger.
    path:   PathBuf,
    /// Why it was rejected.
    reason: String,
  },

  /// Configuration is missing or invalid.
  #[error("{0}")]
  Config(String),

  /// A record was asked to make a transition its current state does not allow.
  #[error("Invalid record state: {0}")]
  InvalidState(String),

  /// A model was not specified for the LLM request.
  #[error("No model was chosen for the LLM.")]
  LLMMissingModel,

  /// No messages were provided in the LLM request.
  #[error("No messages were supplied to send to the LLM.")]
  LLMMissingMessage,

  /// A network request failed.
  #[error(transparent)]
  Network(#[from] reqwest::Error),

  /// A file system operation failed.
  #[error(transparent)]
  Io(#[from] std::io::Error),

  /// JSON (de)serialisation failed.
  #[error(transparent)]
  Json(#[from] serde_json::Error),

  /// The configuration file is not valid TOML for [`Config`](crate::config::Config).
  #[error(transparent)]
  TomlDe(#[from] toml::de::Error),

  /// The default configuration could not be serialised.
  #[error(transparent)]
  TomlSer(#[from] toml::ser::Error),

  /// A PDF directory pattern could not be built.
  #[error(transparent)]
  Pattern(#[from] glob::PatternError),
}

impl PapyrusError {
  /// Whether this error must abort the whole run instead of just the current candidate.
  pub fn is_fatal(&self) -> bool {
    matches!(self, Self::CorruptStore { .. } | Self::Config(_) | Self::TomlDe(_) | Self::Pattern(_))
  }

  /// Short, single-line form stored in a record's `last_error`.
  pub fn summary(&self) -> String {
    let message = self.to_string();
    message.lines().next().unwrap_or_default().to_string()
  }
}
