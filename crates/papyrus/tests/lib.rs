use std::{
  collections::{HashMap, VecDeque},
  error::Error,
  path::{Path, PathBuf},
  sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
  },
  time::Duration,
};

use async_trait::async_trait;
use papyrus::{
  markdown::MarkdownWriter,
  paper::{Analysis, AnalysisOrigin, Biblio},
  pdf::{PdfMetadata, PdfText},
  pipeline::{Orchestrator, PipelineSettings, RunReport},
  prelude::*,
  record::{Identity, Stage},
  remote::{ItemBatch, ItemData, RemoteItem},
  source::{BatchScan, Candidate, GapFill},
  store::RecordStore,
  CancelFlag,
};
use tempfile::{tempdir, TempDir};
use tracing_test::traced_test;

mod pipeline;

pub type TestResult<T> = std::result::Result<T, Box<dyn Error>>;

/// Treats every file as a plain-text "PDF" whose first line is the title.
#[derive(Default)]
pub struct FakeExtractor {
  pub calls:      AtomicUsize,
  pub page_count: usize,
}

impl TextExtractor for FakeExtractor {
  fn extract(&self, path: &Path) -> papyrus::error::Result<PdfText> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let text = std::fs::read_to_string(path)?;
    Ok(PdfText { text, page_count: self.page_count.max(1), metadata: PdfMetadata::default() })
  }
}

/// Answers both stages from the paper text and counts its calls.
#[derive(Default)]
pub struct FakeAnalyzer {
  pub biblio_calls:   AtomicUsize,
  pub analysis_calls: AtomicUsize,
  pub fail_biblio:    AtomicBool,
  pub fail_analysis:  AtomicBool,
}

#[async_trait]
impl Analyzer for FakeAnalyzer {
  async fn extract_biblio(&self, text: &str) -> papyrus::error::Result<Biblio> {
    self.biblio_calls.fetch_add(1, Ordering::SeqCst);
    if self.fail_biblio.load(Ordering::SeqCst) {
      return Err(PapyrusError::Api("fake-lite is rate limited (HTTP 429)".into()));
    }
    Ok(Biblio {
      title: text.lines().next().unwrap_or_default().to_string(),
      authors: vec!["Doe, Jane".into()],
      year: Some(2021),
      ..Default::default()
    })
  }

  async fn analyze(&self, _text: &str, biblio: &Biblio) -> papyrus::error::Result<Analysis> {
    self.analysis_calls.fetch_add(1, Ordering::SeqCst);
    if self.fail_analysis.load(Ordering::SeqCst) {
      return Err(PapyrusError::Timeout { secs: 120 });
    }
    Ok(Analysis {
      abstract_text: format!("About {}.", biblio.title),
      key_claims: vec!["Ledgers make runs resumable.".into()],
      method: "Fault injection.".into(),
      findings: vec!["1. No duplicate writes.".into()],
      excerpts: "### Core analysis\n- excerpt".into(),
      tags: vec!["ledger".into()],
      origin: AnalysisOrigin::Model { model: "fake".into() },
    })
  }
}

/// In-memory reference manager.
#[derive(Default)]
pub struct FakeRemote {
  pub items:        Mutex<Vec<RemoteItem>>,
  pub pdfs:         Mutex<HashMap<String, PathBuf>>,
  pub notes:        Mutex<Vec<(String, String)>>,
  pub fail_uploads: AtomicBool,
}

impl FakeRemote {
  pub fn note_count(&self) -> usize { self.notes.lock().unwrap().len() }
}

#[async_trait]
impl RemoteLibrary for FakeRemote {
  async fn list_items_since(&self, version: u64) -> papyrus::error::Result<ItemBatch> {
    let items: Vec<RemoteItem> =
      self.items.lock().unwrap().iter().filter(|item| item.version > version).cloned().collect();
    let library_version = items.iter().map(|item| item.version).max().unwrap_or(version);
    Ok(ItemBatch { items, library_version })
  }

  async fn find_pdf(&self, item_key: &str) -> papyrus::error::Result<Option<PathBuf>> {
    Ok(self.pdfs.lock().unwrap().get(item_key).cloned())
  }

  async fn upload_note(&self, item_key: &str, html: &str) -> papyrus::error::Result<()> {
    if self.fail_uploads.load(Ordering::SeqCst) {
      return Err(PapyrusError::RemoteSync("HTTP 503".into()));
    }
    self.notes.lock().unwrap().push((item_key.to_string(), html.to_string()));
    Ok(())
  }
}

/// Hands out a fixed list of candidates.
pub struct ListSource(pub VecDeque<Candidate>);

#[async_trait]
impl CandidateSource for ListSource {
  async fn next(
    &mut self,
    _store: &mut RecordStore,
    _cancel: &CancelFlag,
  ) -> papyrus::error::Result<Option<Candidate>> {
    Ok(self.0.pop_front())
  }

  fn name(&self) -> &'static str { "list" }
}

/// Directories and fakes shared by one test.
pub struct Harness {
  pub pdf_dir:   TempDir,
  pub notes_dir: TempDir,
  pub extractor: Arc<FakeExtractor>,
  pub analyzer:  Arc<FakeAnalyzer>,
  pub remote:    Arc<FakeRemote>,
}

impl Harness {
  pub fn new() -> Self {
    Self {
      pdf_dir:   tempdir().unwrap(),
      notes_dir: tempdir().unwrap(),
      extractor: Arc::new(FakeExtractor::default()),
      analyzer:  Arc::new(FakeAnalyzer::default()),
      remote:    Arc::new(FakeRemote::default()),
    }
  }

  pub fn store_path(&self) -> PathBuf { self.pdf_dir.path().join(".papyrus-ledger.json") }

  /// Writes a paper whose first line is `title`.
  pub fn add_pdf(&self, file_name: &str, title: &str) -> PathBuf {
    let path = self.pdf_dir.path().join(file_name);
    std::fs::write(&path, format!("{title}\n\nBody of {title}.")).unwrap();
    path
  }

  /// Builds an orchestrator over the ledger currently on disk.
  pub fn orchestrator(&self, remote_sync: bool) -> Orchestrator {
    let settings =
      PipelineSettings { request_delay: Duration::ZERO, remote_sync, skip_theses: true };
    let mut builder = Orchestrator::builder()
      .with_store(RecordStore::load(self.store_path()).unwrap())
      .with_extractor(self.extractor.clone())
      .with_analyzer(self.analyzer.clone())
      .with_writer(MarkdownWriter::new(self.notes_dir.path()))
      .with_settings(settings);
    if remote_sync {
      builder = builder.with_remote(self.remote.clone());
    }
    builder.build().unwrap()
  }

  /// One batch run over the PDF directory.
  pub async fn run_batch(&self) -> RunReport {
    let mut source = BatchScan::new(self.pdf_dir.path());
    self.orchestrator(false).run(&mut source, &CancelFlag::new()).await.unwrap()
  }

  pub fn store(&self) -> RecordStore { RecordStore::load(self.store_path()).unwrap() }

  pub fn notes(&self) -> Vec<PathBuf> {
    let mut notes: Vec<PathBuf> = std::fs::read_dir(self.notes_dir.path())
      .unwrap()
      .map(|entry| entry.unwrap().path())
      .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
      .collect();
    notes.sort();
    notes
  }

  pub fn biblio_calls(&self) -> usize { self.analyzer.biblio_calls.load(Ordering::SeqCst) }

  pub fn analysis_calls(&self) -> usize { self.analyzer.analysis_calls.load(Ordering::SeqCst) }
}

pub fn remote_item(key: &str, version: u64, title: &str) -> RemoteItem {
  RemoteItem {
    key: key.into(),
    version,
    data: ItemData {
      item_type: "journalArticle".into(),
      title: title.into(),
      date: "2019-03-01".into(),
      publication_title: "Journal of Ledgers".into(),
      ..Default::default()
    },
  }
}
