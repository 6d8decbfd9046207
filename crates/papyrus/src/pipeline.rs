//! The orchestrator and its stage runner.
//!
//! The [`Orchestrator`] owns the [`RecordStore`] for the duration of a run. It pulls candidates
//! from a [`CandidateSource`] one at a time and moves each record through
//!
//! ```text
//! New -> BiblioDone -> AnalysisDone -> Published
//! ```
//!
//! as far as the record's inputs allow. The store is saved after every completed transition
//! and after every write, so a process that dies mid-candidate resumes at the exact step it
//! stopped at, and no model call or write is ever repeated for a step that already succeeded.
//!
//! Failures of one candidate are stored in its `last_error` and the run moves on; the paper is
//! tried again on the next run. Only store failures abort the run.

use tokio::time::Instant;

use super::*;
use crate::{
  llm::Analyzer,
  markdown::{self, MarkdownWriter, WriteOutcome},
  pdf::{PdfExtractor, PdfText, TextExtractor},
  remote::{note_html, RemoteLibrary},
  source::{Candidate, CandidateSource},
  store::RecordStore,
};

/// Knobs of the stage runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
  /// Minimum time between the starts of two model calls.
  pub request_delay: Duration,
  /// Whether published records also need a note in the reference manager.
  pub remote_sync:   bool,
  /// Whether theses skip the model and get a heuristic analysis.
  pub skip_theses:   bool,
}

impl Default for PipelineSettings {
  fn default() -> Self {
    Self { request_delay: Duration::from_secs(4), remote_sync: false, skip_theses: true }
  }
}

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  /// Every required output exists.
  Published,
  /// The record moved forward but stopped short of publication.
  Partial {
    /// Stage the record ended at.
    stage: Stage,
    /// Why it stopped.
    error: String,
  },
  /// Nothing could be done this run.
  Failed {
    /// Stage the record is stuck at.
    stage: Stage,
    /// Why it failed.
    error: String,
  },
  /// A published record took citation fields from the library that it was missing.
  Refreshed,
  /// The candidate needed no work.
  Skipped {
    /// Why it was skipped.
    reason: String,
  },
}

/// Summary of one [`Orchestrator::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
  /// Candidates handed out by the source.
  pub candidates: usize,
  /// Candidates that ended published.
  pub published:  usize,
  /// Candidates that progressed but were not published.
  pub partial:    usize,
  /// Candidates that made no progress.
  pub failed:     usize,
  /// Published candidates whose citation was completed.
  pub refreshed:  usize,
  /// Candidates that needed no work.
  pub skipped:    usize,
  /// Whether the run ended because it was cancelled.
  pub cancelled:  bool,
}

impl RunReport {
  /// Counts `outcome`.
  fn record(&mut self, outcome: &Outcome) {
    match outcome {
      Outcome::Published => self.published += 1,
      Outcome::Partial { .. } => self.partial += 1,
      Outcome::Failed { .. } => self.failed += 1,
      Outcome::Refreshed => self.refreshed += 1,
      Outcome::Skipped { .. } => self.skipped += 1,
    }
  }
}

impl std::fmt::Display for RunReport {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "{} candidates: {} published, {} partial, {} failed, {} skipped",
      self.candidates, self.published, self.partial, self.failed, self.skipped
    )?;
    if self.refreshed > 0 {
      write!(f, ", {} refreshed", self.refreshed)?;
    }
    if self.cancelled {
      write!(f, " (cancelled)")?;
    }
    Ok(())
  }
}

/// Drives candidates through the stages and keeps the ledger current.
pub struct Orchestrator {
  /// The ledger.
  store:     RecordStore,
  /// PDF text extraction.
  extractor: Arc<dyn TextExtractor>,
  /// Stage 1 and Stage 2 model calls.
  analyzer:  Arc<dyn Analyzer>,
  /// Markdown output.
  writer:    MarkdownWriter,
  /// Reference manager, for PDF lookup and note upload.
  remote:    Option<Arc<dyn RemoteLibrary>>,
  /// Stage runner knobs.
  settings:  PipelineSettings,
  /// Start of the most recent model call.
  last_call: Option<Instant>,
}

/// Builder for [`Orchestrator`].
#[derive(Default)]
pub struct OrchestratorBuilder {
  /// See [`Orchestrator`].
  store:     Option<RecordStore>,
  /// See [`Orchestrator`].
  extractor: Option<Arc<dyn TextExtractor>>,
  /// See [`Orchestrator`].
  analyzer:  Option<Arc<dyn Analyzer>>,
  /// See [`Orchestrator`].
  writer:    Option<MarkdownWriter>,
  /// See [`Orchestrator`].
  remote:    Option<Arc<dyn RemoteLibrary>>,
  /// See [`Orchestrator`].
  settings:  PipelineSettings,
}

impl OrchestratorBuilder {
  /// Sets the ledger.
  pub fn with_store(mut self, store: RecordStore) -> Self {
    self.store = Some(store);
    self
  }

  /// Sets the text extractor. Defaults to [`PdfExtractor`].
  pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
    self.extractor = Some(extractor);
    self
  }

  /// Sets the analyzer.
  pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
    self.analyzer = Some(analyzer);
    self
  }

  /// Sets the markdown writer.
  pub fn with_writer(mut self, writer: MarkdownWriter) -> Self {
    self.writer = Some(writer);
    self
  }

  /// Sets the reference manager.
  pub fn with_remote(mut self, remote: Arc<dyn RemoteLibrary>) -> Self {
    self.remote = Some(remote);
    self
  }

  /// Sets the stage runner knobs.
  pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
    self.settings = settings;
    self
  }

  /// Builds the orchestrator.
  ///
  /// # Errors
  ///
  /// Returns [`PapyrusError::Config`] if the store, analyzer or writer is missing, or if note
  /// sync is enabled without a reference manager.
  pub fn build(self) -> Result<Orchestrator> {
    let missing = |what: &str| PapyrusError::Config(format!("orchestrator needs {what}"));
    if self.settings.remote_sync && self.remote.is_none() {
      return Err(missing("a remote library when note sync is enabled"));
    }
    Ok(Orchestrator {
      store:     self.store.ok_or_else(|| missing("a record store"))?,
      extractor: self.extractor.unwrap_or_else(|| Arc::new(PdfExtractor::new())),
      analyzer:  self.analyzer.ok_or_else(|| missing("an analyzer"))?,
      writer:    self.writer.ok_or_else(|| missing("a markdown writer"))?,
      remote:    self.remote,
      settings:  self.settings,
      last_call: None,
    })
  }
}

/// Stage and write flags of a record, used to tell whether a candidate made progress.
type Progress = (Stage, bool, bool);

impl Orchestrator {
  /// Starts building an orchestrator.
  pub fn builder() -> OrchestratorBuilder { OrchestratorBuilder::default() }

  /// The ledger.
  pub fn store(&self) -> &RecordStore { &self.store }

  /// Gives the ledger back.
  pub fn into_store(self) -> RecordStore { self.store }

  /// Stage runner knobs.
  pub fn settings(&self) -> PipelineSettings { self.settings }

  /// Processes candidates from `source` until it is exhausted or `cancel` is raised.
  ///
  /// # Errors
  ///
  /// Only errors that make continuing pointless are returned: failing to save the ledger, a
  /// source that cannot start, or any other [fatal](PapyrusError::is_fatal) error. Everything
  /// else is stored in the affected record and counted in the report.
  pub async fn run<S>(&mut self, source: &mut S, cancel: &CancelFlag) -> Result<RunReport>
  where S: CandidateSource + ?Sized {
    info!("Starting {} run over {} known records", source.name(), self.store.len());
    let mut report = RunReport::default();

    while !cancel.is_cancelled() {
      let Some(candidate) = source.next(&mut self.store, cancel).await? else {
        break;
      };
      report.candidates += 1;
      let outcome = self.process(candidate).await?;
      report.record(&outcome);
    }

    report.cancelled = cancel.is_cancelled();
    info!("Finished {} run: {report}", source.name());
    Ok(report)
  }

  /// Moves one candidate as far as it can go.
  #[instrument(skip_all, fields(candidate = %candidate))]
  async fn process(&mut self, candidate: Candidate) -> Result<Outcome> {
    let remote_sync = self.settings.remote_sync;
    let identity = candidate.identity();
    let mut refreshed = false;
    let mut record = match candidate {
      Candidate::File { path, .. } => {
        let mut record = self.store.get_or_create(&identity);
        record.source_path = Some(path);
        record
      },
      Candidate::Remote(item) => {
        let mut record = self.store.get_or_create(&identity);
        let citation = item.to_biblio();
        match record.biblio().cloned() {
          // Remote items come with their citation; Stage 1 never runs for them.
          None => record.set_biblio(citation),
          Some(mut biblio) =>
            if biblio.fill_missing_from(&citation) {
              debug!("Library citation fills gaps in the ledger");
              record.refresh_biblio(biblio);
              refreshed = true;
            },
        }
        record
      },
      Candidate::Known(_) => match self.store.get(&identity) {
        Some(record) => record.clone(),
        None => {
          let reason = format!("{identity} is not in the ledger");
          return Ok(Outcome::Skipped { reason });
        },
      },
    };

    if record.is_published(remote_sync) {
      if refreshed {
        return self.refresh(record);
      }
      debug!("Already published");
      return Ok(Outcome::Skipped { reason: "already published".into() });
    }
    if self.store.get(&identity) != Some(&record) {
      self.commit(&record)?;
    }
    let start = progress(&record, remote_sync);

    if record.analysis().is_none() {
      let (path, pdf) = match self.load_text(&mut record).await {
        Ok(loaded) => loaded,
        Err(e) => return self.fail(record, e, start),
      };

      if self.settings.skip_theses && is_thesis(&pdf, &path) {
        info!("Treating {} as a thesis; skipping model calls", path.display());
        if record.biblio().is_none() {
          record.set_biblio(Biblio::from_metadata(&pdf, &path));
          self.commit(&record)?;
        }
        record.set_analysis(Analysis::heuristic(&pdf.text))?;
        self.commit(&record)?;
      } else {
        if record.biblio().is_none() {
          match self.extract_biblio(&pdf, &path).await {
            Ok(biblio) => {
              info!("Stage 1 done: {}", biblio.title);
              record.set_biblio(biblio);
              self.commit(&record)?;
            },
            Err(e) => return self.fail(record, e, start),
          }
        }
        match self.analyze(&pdf, &record).await {
          Ok(analysis) => {
            record.set_analysis(analysis)?;
            info!("Stage 2 done");
            self.commit(&record)?;
          },
          Err(e) => return self.fail(record, e, start),
        }
      }
    }

    let mut first_error = None;

    if !record.markdown_written {
      match self.writer.write(&record) {
        Ok(outcome) => {
          if let WriteOutcome::AlreadyExists(path) = &outcome {
            info!("Keeping existing note {}", path.display());
          }
          record.mark_markdown_written(outcome.path().to_path_buf());
          self.commit(&record)?;
        },
        Err(e) => {
          warn!("Markdown write failed: {}", e.summary());
          first_error.get_or_insert(e);
        },
      }
    }

    if record.remote_note_required(remote_sync) && !record.remote_note_written {
      match self.upload_note(&record).await {
        Ok(()) => {
          info!("Uploaded note to the remote library");
          record.mark_remote_note_written();
          self.commit(&record)?;
        },
        Err(e) => {
          warn!("Remote note upload failed: {}", e.summary());
          first_error.get_or_insert(e);
        },
      }
    }

    match first_error {
      Some(e) => self.fail(record, e, start),
      None => {
        info!("Published {}", record.title().unwrap_or(record.identity.as_str()));
        Ok(Outcome::Published)
      },
    }
  }

  /// Saves the completed citation of a published record and fills the gaps in its note.
  ///
  /// A note that cannot be updated is left alone; the ledger keeps the new citation either way.
  fn refresh(&mut self, record: PaperRecord) -> Result<Outcome> {
    self.commit(&record)?;
    let (Some(path), Some(biblio)) = (record.markdown_path.as_deref(), record.biblio()) else {
      return Ok(Outcome::Refreshed);
    };
    if path.is_file() {
      match markdown::refresh_citation(path, biblio) {
        Ok(true) => info!("Filled citation gaps in {}", path.display()),
        Ok(false) => debug!("Note {} needed no changes", path.display()),
        Err(e) => warn!("Could not refresh {}: {}", path.display(), e.summary()),
      }
    }
    Ok(Outcome::Refreshed)
  }

  /// Finds the record's PDF and extracts its text off the async runtime.
  async fn load_text(&self, record: &mut PaperRecord) -> Result<(PathBuf, PdfText)> {
    let path = match &record.source_path {
      Some(path) if path.is_file() => path.clone(),
      _ => {
        let found = match (&self.remote, record.remote_id.as_deref()) {
          (Some(remote), Some(key)) => remote.find_pdf(key).await?,
          _ => None,
        };
        let path = found.ok_or_else(|| PapyrusError::MissingPdf(record.identity.to_string()))?;
        debug!("Using PDF {}", path.display());
        record.source_path = Some(path.clone());
        path
      },
    };

    let extractor = Arc::clone(&self.extractor);
    let target = path.clone();
    let pdf = tokio::task::spawn_blocking(move || extractor.extract(&target))
      .await
      .map_err(|e| PapyrusError::Extraction { path: path.clone(), reason: e.to_string() })??;
    Ok((path, pdf))
  }

  /// Stage 1, with gaps filled from the PDF metadata.
  async fn extract_biblio(&mut self, pdf: &PdfText, path: &Path) -> Result<Biblio> {
    self.throttle().await;
    let mut biblio = self.analyzer.extract_biblio(&pdf.text).await?;
    biblio.fill_missing_from(&Biblio::from_metadata(pdf, path));
    Ok(biblio)
  }

  /// Stage 2.
  async fn analyze(&mut self, pdf: &PdfText, record: &PaperRecord) -> Result<Analysis> {
    let Some(biblio) = record.biblio() else {
      return Err(PapyrusError::InvalidState(format!("{} has no biblio", record.identity)));
    };
    self.throttle().await;
    self.analyzer.analyze(&pdf.text, biblio).await
  }

  /// Attaches the analysis to the remote item.
  async fn upload_note(&self, record: &PaperRecord) -> Result<()> {
    let (Some(remote), Some(key), Some(analysis)) =
      (&self.remote, record.remote_id.as_deref(), record.analysis())
    else {
      return Err(PapyrusError::InvalidState(format!(
        "{} cannot be uploaded without a remote library and an analysis",
        record.identity
      )));
    };
    remote.upload_note(key, &note_html(analysis)).await
  }

  /// Waits until the configured delay has passed since the previous model call.
  async fn throttle(&mut self) {
    if let Some(last) = self.last_call {
      let elapsed = last.elapsed();
      if elapsed < self.settings.request_delay {
        let wait = self.settings.request_delay - elapsed;
        trace!("Waiting {wait:?} before the next model call");
        tokio::time::sleep(wait).await;
      }
    }
    self.last_call = Some(Instant::now());
  }

  /// Stores `record` and saves the ledger.
  fn commit(&mut self, record: &PaperRecord) -> Result<()> {
    self.store.upsert(record.clone());
    self.store.save()
  }

  /// Records a per-candidate failure, or passes a fatal one up.
  fn fail(
    &mut self,
    mut record: PaperRecord,
    error: PapyrusError,
    start: Progress,
  ) -> Result<Outcome> {
    if error.is_fatal() {
      return Err(error);
    }
    let summary = error.summary();
    warn!("Giving up on {} for this run: {summary}", record.identity);
    record.record_error(&error);
    record.attempts += 1;
    self.commit(&record)?;

    let remote_sync = self.settings.remote_sync;
    let stage = record.stage(remote_sync);
    Ok(if progress(&record, remote_sync) != start {
      Outcome::Partial { stage, error: summary }
    } else {
      Outcome::Failed { stage, error: summary }
    })
  }
}

/// Snapshot of how far `record` has come.
fn progress(record: &PaperRecord, remote_sync: bool) -> Progress {
  (record.stage(remote_sync), record.markdown_written, record.remote_note_written)
}
