//! Deduplicated, resumable ingestion of academic papers into structured notes.
//!
//! `papyrus` turns PDF papers into markdown notes by extracting their text, asking an LLM for
//! bibliographic data (Stage 1) and a deep analysis (Stage 2), and writing the result to a
//! markdown vault and, optionally, back to a reference manager as an item note.
//!
//! The interesting part is the ledger-driven pipeline around those calls:
//!
//! - **Record store**: a JSON ledger keyed by paper identity, rewritten atomically after every
//!   completed stage so a killed process resumes exactly where it stopped.
//! - **Stage runner**: runs only the stages a record is still missing, so external calls happen
//!   at most once per paper.
//! - **Source adapters**: a one-shot directory scan, a directory watcher, a reference-manager
//!   poller and a gap-fill pass over the ledger, all behind one trait.
//! - **Orchestrator**: drives one candidate at a time, records per-candidate failures in the
//!   ledger and keeps going.
//!
//! # Getting Started
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use papyrus::{
//!   config::Config, llm::GeminiAnalyzer, markdown::MarkdownWriter, pdf::PdfExtractor,
//!   pipeline::Orchestrator, prelude::*, source::BatchScan, store::RecordStore, CancelFlag,
//! };
//!
//! # async fn example() -> Result<()> {
//! let config = Config::load(Config::default_path())?;
//! let store = RecordStore::load(config.store_path())?;
//!
//! let mut orchestrator = Orchestrator::builder()
//!   .with_store(store)
//!   .with_extractor(Arc::new(PdfExtractor::new()))
//!   .with_analyzer(Arc::new(GeminiAnalyzer::from_config(&config.llm)?))
//!   .with_writer(MarkdownWriter::new(&config.markdown_dir))
//!   .with_settings(config.pipeline_settings())
//!   .build()?;
//!
//! let mut source = BatchScan::new(&config.pdf_dir);
//! let report = orchestrator.run(&mut source, &CancelFlag::new()).await?;
//! println!("published {} papers", report.published);
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`record`]: identities, stages and the per-paper ledger entry
//! - [`paper`]: bibliographic and analysis payloads
//! - [`store`]: the persisted ledger
//! - [`pdf`]: text extraction from PDF files
//! - [`llm`]: the Gemini client and the [`llm::Analyzer`] seam
//! - [`remote`]: the Zotero client and the [`remote::RemoteLibrary`] seam
//! - [`markdown`]: note rendering and exactly-once writing
//! - [`source`]: candidate producers
//! - [`pipeline`]: the orchestrator and stage runner
//! - [`config`]: configuration loading

#![warn(missing_docs, clippy::missing_docs_in_private_items)]

use std::{
  collections::{BTreeMap, HashSet, VecDeque},
  fmt::Display,
  path::{Path, PathBuf},
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
  time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;
#[cfg(test)]
use {tempfile::tempdir, tracing_test::traced_test};

pub mod config;
pub mod error;
pub mod llm;
pub mod markdown;
pub mod paper;
pub mod pdf;
pub mod pipeline;
pub mod prompt;
pub mod record;
pub mod remote;
pub mod source;
pub mod store;

use crate::{error::*, paper::*, record::*};

/// Cooperative cancellation shared between the CLI signal handler and the pipeline.
///
/// Cancellation is only ever observed between candidates and while waiting for new ones, so a
/// paper that is being processed always finishes and gets persisted first.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<CancelState>);

/// State behind a [`CancelFlag`].
#[derive(Debug, Default)]
struct CancelState {
  /// Set once, never cleared.
  cancelled: AtomicBool,
  /// Wakes sleepers when `cancelled` is set.
  notify:    Notify,
}

impl CancelFlag {
  /// Creates a flag that is not cancelled.
  pub fn new() -> Self { Self::default() }

  /// Requests cancellation.
  pub fn cancel(&self) {
    self.0.cancelled.store(true, Ordering::SeqCst);
    self.0.notify.notify_waiters();
  }

  /// Whether cancellation has been requested.
  pub fn is_cancelled(&self) -> bool { self.0.cancelled.load(Ordering::SeqCst) }

  /// Sleeps for `duration`, waking as soon as the flag is cancelled.
  ///
  /// Returns `false` if the sleep was cut short by cancellation.
  pub async fn sleep(&self, duration: Duration) -> bool {
    let notified = self.0.notify.notified();
    tokio::pin!(notified);
    // Registered before the check, so a cancel in between still wakes us.
    notified.as_mut().enable();
    if self.is_cancelled() {
      return false;
    }
    tokio::select! {
      () = tokio::time::sleep(duration) => !self.is_cancelled(),
      () = &mut notified => false,
    }
  }
}

/// Common traits and types for ergonomic imports.
///
/// ```no_run
/// use papyrus::prelude::*;
///
/// fn handle(err: PapyrusError) -> bool { err.is_fatal() }
/// ```
pub mod prelude {
  pub use crate::{
    error::{PapyrusError, Result},
    llm::Analyzer,
    pdf::TextExtractor,
    remote::RemoteLibrary,
    source::CandidateSource,
  };
}
