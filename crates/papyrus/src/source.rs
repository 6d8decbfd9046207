//! Producers of candidate papers.
//!
//! Every run mode is a [`CandidateSource`]: the orchestrator pulls one candidate at a time and
//! processes it to completion before asking for the next, so a source can assume everything it
//! yielded earlier has been persisted by the time [`CandidateSource::next`] is called again.
//!
//! - [`BatchScan`] hashes the PDFs in a directory once and ends.
//! - [`DirectoryWatch`] yields PDFs that appear in a directory after start-up.
//! - [`RemotePoll`] yields reference-manager items changed since the last checkpoint.
//! - [`GapFill`] yields every record of the ledger that is not published yet.

use glob::MatchOptions;

use super::*;
use crate::{
  remote::{RemoteItem, RemoteLibrary},
  store::RecordStore,
};

/// Something the orchestrator should process.
#[derive(Debug, Clone)]
pub enum Candidate {
  /// A local PDF and the identity of its contents.
  File {
    /// Location of the PDF.
    path:     PathBuf,
    /// SHA-256 identity of the file.
    identity: Identity,
  },
  /// A reference-manager item.
  Remote(RemoteItem),
  /// A record already in the ledger.
  Known(Identity),
}

impl Candidate {
  /// Identity of the record this candidate maps to.
  pub fn identity(&self) -> Identity {
    match self {
      Candidate::File { identity, .. } | Candidate::Known(identity) => identity.clone(),
      Candidate::Remote(item) => Identity::from_remote(&item.key),
    }
  }
}

impl std::fmt::Display for Candidate {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Candidate::File { path, .. } => write!(f, "{}", path.display()),
      Candidate::Remote(item) => {
        write!(f, "{} ({})", Identity::from_remote(&item.key), item.data.title)
      },
      Candidate::Known(identity) => write!(f, "{identity}"),
    }
  }
}

/// A producer of candidates for one run mode.
#[async_trait]
pub trait CandidateSource: Send {
  /// The next candidate, or `None` when the source is exhausted or `cancel` was raised.
  ///
  /// Sources get mutable access to the store so that they can skip published records and
  /// commit their own progress markers.
  async fn next(
    &mut self,
    store: &mut RecordStore,
    cancel: &CancelFlag,
  ) -> Result<Option<Candidate>>;

  /// Name of the run mode, for logs.
  fn name(&self) -> &'static str;
}

/// PDFs directly under `dir`, sorted by path. The extension is matched case-insensitively.
pub fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
  if !dir.is_dir() {
    return Err(PapyrusError::Config(format!("{} is not a directory", dir.display())));
  }
  let pattern = format!("{}/*.pdf", glob::Pattern::escape(&dir.to_string_lossy()));
  let options = MatchOptions { case_sensitive: false, ..Default::default() };
  let mut paths: Vec<PathBuf> = glob::glob_with(&pattern, options)?
    .filter_map(std::result::Result::ok)
    .filter(|path| path.is_file())
    .collect();
  paths.sort();
  Ok(paths)
}

/// Hashes `path` and wraps it as a candidate unless its record is already published.
///
/// Files that cannot be read are logged and skipped; the next scan sees them again.
async fn file_candidate(path: PathBuf, store: &RecordStore) -> Option<Candidate> {
  let identity = match Identity::from_file(&path).await {
    Ok(identity) => identity,
    Err(e) => {
      warn!("Skipping unreadable file {}: {e}", path.display());
      return None;
    },
  };
  // Local identities never carry a remote id, so note sync does not matter here.
  if store.get(&identity).is_some_and(|record| record.is_published(false)) {
    trace!("{} is already published as {identity}", path.display());
    return None;
  }
  Some(Candidate::File { path, identity })
}

/// One pass over the PDFs of a directory.
#[derive(Debug)]
pub struct BatchScan {
  /// Directory to scan.
  dir:   PathBuf,
  /// Files not yet handed out; `None` until the first call.
  queue: Option<VecDeque<PathBuf>>,
}

impl BatchScan {
  /// A scan of the PDFs directly under `dir`.
  pub fn new(dir: impl AsRef<Path>) -> Self {
    Self { dir: dir.as_ref().to_path_buf(), queue: None }
  }
}

#[async_trait]
impl CandidateSource for BatchScan {
  async fn next(
    &mut self,
    store: &mut RecordStore,
    cancel: &CancelFlag,
  ) -> Result<Option<Candidate>> {
    if self.queue.is_none() {
      let paths = list_pdfs(&self.dir)?;
      info!("Found {} PDF files in {}", paths.len(), self.dir.display());
      self.queue = Some(paths.into());
    }

    while let Some(path) = self.queue.as_mut().and_then(VecDeque::pop_front) {
      if cancel.is_cancelled() {
        return Ok(None);
      }
      if let Some(candidate) = file_candidate(path, store).await {
        return Ok(Some(candidate));
      }
    }
    Ok(None)
  }

  fn name(&self) -> &'static str { "batch" }
}

/// Polls a directory for PDFs that appear after start-up.
#[derive(Debug)]
pub struct DirectoryWatch {
  /// Directory to watch.
  dir:      PathBuf,
  /// Time between directory scans.
  interval: Duration,
  /// Time a file's size must stay unchanged before it is picked up.
  settle:   Duration,
  /// Files already seen; `None` until the first call.
  seen:     Option<HashSet<PathBuf>>,
  /// New files waiting to settle.
  queue:    VecDeque<PathBuf>,
}

impl DirectoryWatch {
  /// A watcher of `dir` scanning every `interval`.
  pub fn new(dir: impl AsRef<Path>, interval: Duration, settle: Duration) -> Self {
    Self {
      dir: dir.as_ref().to_path_buf(),
      interval,
      settle,
      seen: None,
      queue: VecDeque::new(),
    }
  }

  /// Whether the file's size is non-zero and unchanged across one settle period.
  ///
  /// Returns `None` when cancelled while waiting.
  async fn settled(&self, path: &Path, cancel: &CancelFlag) -> Option<bool> {
    let size = |path: &Path| std::fs::metadata(path).map(|m| m.len()).ok();
    let before = size(path);
    if !cancel.sleep(self.settle).await {
      return None;
    }
    let after = size(path);
    Some(before.is_some_and(|len| len > 0) && before == after)
  }
}

#[async_trait]
impl CandidateSource for DirectoryWatch {
  async fn next(
    &mut self,
    store: &mut RecordStore,
    cancel: &CancelFlag,
  ) -> Result<Option<Candidate>> {
    if self.seen.is_none() {
      let existing = list_pdfs(&self.dir)?;
      info!(
        "Watching {} every {}s ({} existing files ignored)",
        self.dir.display(),
        self.interval.as_secs(),
        existing.len()
      );
      self.seen = Some(existing.into_iter().collect());
    }

    loop {
      while let Some(path) = self.queue.pop_front() {
        match self.settled(&path, cancel).await {
          None => return Ok(None),
          Some(false) => {
            // Still being written; forget it so the next scan picks it up again.
            debug!("{} is still changing", path.display());
            if let Some(seen) = self.seen.as_mut() {
              seen.remove(&path);
            }
          },
          Some(true) => {
            info!("New file {}", path.display());
            if let Some(candidate) = file_candidate(path, store).await {
              return Ok(Some(candidate));
            }
          },
        }
      }

      if !cancel.sleep(self.interval).await {
        return Ok(None);
      }
      let paths = match list_pdfs(&self.dir) {
        Ok(paths) => paths,
        Err(e) => {
          warn!("Could not scan {}: {e}", self.dir.display());
          continue;
        },
      };
      if let Some(seen) = self.seen.as_mut() {
        for path in paths {
          if seen.insert(path.clone()) {
            self.queue.push_back(path);
          }
        }
      }
    }
  }

  fn name(&self) -> &'static str { "watch" }
}

/// Polls a reference-manager library for changed items.
pub struct RemotePoll {
  /// The library.
  remote:     Arc<dyn RemoteLibrary>,
  /// Time between polls.
  interval:   Duration,
  /// Whether publishing requires a note in the library.
  note_sync:  bool,
  /// Whether the ledger's unfinished remote records were queued yet.
  resumed:    bool,
  /// Whether the next fetch must wait for the interval first.
  wait:       bool,
  /// Candidates of the current batch not yet handed out.
  queue:      VecDeque<Candidate>,
  /// Library version to commit once `queue` has drained.
  pending:    Option<u64>,
  /// Everything handed out so far in this run.
  handed_out: HashSet<Identity>,
}

impl RemotePoll {
  /// A poller of `remote` fetching every `interval`.
  pub fn new(remote: Arc<dyn RemoteLibrary>, interval: Duration) -> Self {
    Self {
      remote,
      interval,
      note_sync: true,
      resumed: false,
      wait: false,
      queue: VecDeque::new(),
      pending: None,
      handed_out: HashSet::new(),
    }
  }

  /// Sets whether publishing requires a note in the library.
  pub fn with_note_sync(mut self, note_sync: bool) -> Self {
    self.note_sync = note_sync;
    self
  }

  /// Queues the changed items that still need work.
  ///
  /// Unpublished items are handed out at most once per run, so a failure is retried on the
  /// next run and not on the next poll. Published items are only queued when the library has
  /// citation fields their record is missing.
  fn enqueue(&mut self, items: Vec<RemoteItem>, store: &RecordStore) {
    let mut titles = HashSet::new();
    for item in items {
      let identity = Identity::from_remote(&item.key);
      if item.is_skippable() {
        trace!("Skipping {identity}: {} item", item.data.item_type);
        continue;
      }
      if self.queue.iter().any(|queued| queued.identity() == identity) {
        debug!("Skipping {identity}: already queued");
        continue;
      }
      match store.get(&identity).filter(|record| record.is_published(self.note_sync)) {
        Some(record) => {
          let mut biblio = record.biblio().cloned().unwrap_or_default();
          if !biblio.fill_missing_from(&item.to_biblio()) {
            trace!("Skipping {identity}: already published");
            continue;
          }
          debug!("Queueing {identity} to complete its citation");
        },
        None if self.handed_out.contains(&identity) => {
          debug!("Skipping {identity}: already handed out in this run");
          continue;
        },
        None => {},
      }
      let title = normalize_title(&item.data.title);
      if let Some(other) = store.find_by_title(&title).filter(|other| other.identity != identity) {
        debug!("Skipping {identity}: same title as {}", other.identity);
        continue;
      }
      if !title.is_empty() && !titles.insert(title) {
        debug!("Skipping {identity}: duplicate title in this batch");
        continue;
      }
      self.queue.push_back(Candidate::Remote(item));
    }
  }
}

impl std::fmt::Debug for RemotePoll {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RemotePoll")
      .field("interval", &self.interval)
      .field("note_sync", &self.note_sync)
      .field("queued", &self.queue.len())
      .field("pending", &self.pending)
      .field("handed_out", &self.handed_out.len())
      .finish()
  }
}

#[async_trait]
impl CandidateSource for RemotePoll {
  async fn next(
    &mut self,
    store: &mut RecordStore,
    cancel: &CancelFlag,
  ) -> Result<Option<Candidate>> {
    if !self.resumed {
      self.resumed = true;
      let unfinished: Vec<Candidate> = store
        .records()
        .filter(|record| record.remote_id.is_some() && !record.is_published(self.note_sync))
        .map(|record| Candidate::Known(record.identity.clone()))
        .collect();
      if !unfinished.is_empty() {
        info!("Resuming {} unfinished remote items", unfinished.len());
      }
      self.queue.extend(unfinished);
    }

    loop {
      if cancel.is_cancelled() {
        return Ok(None);
      }
      if let Some(candidate) = self.queue.pop_front() {
        self.handed_out.insert(candidate.identity());
        return Ok(Some(candidate));
      }

      // Everything handed out so far has been processed and saved.
      if let Some(version) = self.pending.take() {
        store.set_checkpoint(version);
        store.save()?;
        debug!("Committed library version {version}");
      }

      if self.wait && !cancel.sleep(self.interval).await {
        return Ok(None);
      }
      self.wait = true;

      let since = store.checkpoint().library_version;
      match self.remote.list_items_since(since).await {
        Ok(batch) => {
          if !batch.items.is_empty() {
            info!("{} items changed since version {since}", batch.items.len());
          }
          self.enqueue(batch.items, store);
          if batch.library_version > since {
            self.pending = Some(batch.library_version);
          }
        },
        Err(e) => warn!("Polling the remote library failed, retrying later: {}", e.summary()),
      }
    }
  }

  fn name(&self) -> &'static str { "poll" }
}

/// Yields every record of the ledger that is not published.
#[derive(Debug)]
pub struct GapFill {
  /// Whether publishing requires a note in the reference manager.
  remote_sync: bool,
  /// Records not yet handed out; `None` until the first call.
  queue:       Option<VecDeque<Identity>>,
}

impl GapFill {
  /// A pass over the ledger.
  pub fn new(remote_sync: bool) -> Self { Self { remote_sync, queue: None } }
}

#[async_trait]
impl CandidateSource for GapFill {
  async fn next(
    &mut self,
    store: &mut RecordStore,
    cancel: &CancelFlag,
  ) -> Result<Option<Candidate>> {
    let remote_sync = self.remote_sync;
    let queue = self.queue.get_or_insert_with(|| {
      let gaps: VecDeque<Identity> = store
        .records()
        .filter(|record| !record.is_published(remote_sync))
        .map(|record| record.identity.clone())
        .collect();
      info!("{} of {} records are incomplete", gaps.len(), store.len());
      gaps
    });

    if cancel.is_cancelled() {
      return Ok(None);
    }
    Ok(queue.pop_front().map(Candidate::Known))
  }

  fn name(&self) -> &'static str { "gap-fill" }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use super::*;
  use crate::remote::{ItemBatch, ItemData};

  fn store_in(dir: &Path) -> RecordStore { RecordStore::load(dir.join("ledger.json")).unwrap() }

  fn published(identity: Identity, title: &str) -> PaperRecord {
    let mut record = PaperRecord::new(identity);
    record.set_biblio(Biblio { title: title.into(), ..Default::default() });
    record.set_analysis(Analysis::default()).unwrap();
    record.mark_markdown_written("note.md".into());
    record.mark_remote_note_written();
    record
  }

  fn item(key: &str, item_type: &str, title: &str) -> RemoteItem {
    RemoteItem {
      key:     key.into(),
      version: 1,
      data:    ItemData { item_type: item_type.into(), title: title.into(), ..Default::default() },
    }
  }

  /// Serves one scripted batch per call, then empty batches.
  struct ScriptedRemote {
    batches: Mutex<VecDeque<Result<ItemBatch>>>,
    calls:   Mutex<Vec<u64>>,
  }

  impl ScriptedRemote {
    fn new(batches: Vec<Result<ItemBatch>>) -> Arc<Self> {
      Arc::new(Self { batches: Mutex::new(batches.into()), calls: Mutex::new(Vec::new()) })
    }
  }

  #[async_trait]
  impl RemoteLibrary for ScriptedRemote {
    async fn list_items_since(&self, version: u64) -> Result<ItemBatch> {
      self.calls.lock().unwrap().push(version);
      self
        .batches
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(Ok(ItemBatch { items: Vec::new(), library_version: version }))
    }

    async fn find_pdf(&self, _item_key: &str) -> Result<Option<PathBuf>> { Ok(None) }

    async fn upload_note(&self, _item_key: &str, _html: &str) -> Result<()> { Ok(()) }
  }

  #[tokio::test]
  async fn test_list_pdfs_is_sorted_and_case_insensitive() {
    let dir = tempdir().unwrap();
    for name in ["b.pdf", "A.PDF", "notes.txt", "c.Pdf"] {
      std::fs::write(dir.path().join(name), name).unwrap();
    }
    std::fs::create_dir(dir.path().join("nested.pdf")).unwrap();

    let names: Vec<String> = list_pdfs(dir.path())
      .unwrap()
      .iter()
      .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
      .collect();
    assert_eq!(names, ["A.PDF", "b.pdf", "c.Pdf"]);

    assert!(matches!(list_pdfs(&dir.path().join("missing")), Err(PapyrusError::Config(_))));
  }

  #[traced_test]
  #[tokio::test]
  async fn test_batch_scan_skips_published() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("done.pdf"), b"done").unwrap();
    std::fs::write(dir.path().join("todo.pdf"), b"todo").unwrap();

    let mut store = store_in(dir.path());
    store.upsert(published(Identity::from_bytes(b"done"), "Done"));

    let cancel = CancelFlag::new();
    let mut scan = BatchScan::new(dir.path());
    let Some(Candidate::File { path, identity }) = scan.next(&mut store, &cancel).await.unwrap()
    else {
      panic!("expected a file candidate");
    };
    assert!(path.ends_with("todo.pdf"));
    assert_eq!(identity, Identity::from_bytes(b"todo"));
    assert!(scan.next(&mut store, &cancel).await.unwrap().is_none());
    assert!(logs_contain("Found 2 PDF files"));
  }

  #[tokio::test]
  async fn test_batch_scan_stops_when_cancelled() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("a.pdf"), b"a").unwrap();
    let mut store = store_in(dir.path());

    let cancel = CancelFlag::new();
    cancel.cancel();
    assert!(BatchScan::new(dir.path()).next(&mut store, &cancel).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_directory_watch_yields_only_new_files() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("old.pdf"), b"old").unwrap();
    let mut store = store_in(dir.path());
    let cancel = CancelFlag::new();

    let mut watch =
      DirectoryWatch::new(dir.path(), Duration::from_millis(50), Duration::from_millis(10));
    let writer = {
      let path = dir.path().join("new.pdf");
      tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(path, b"new").unwrap();
      })
    };

    let candidate = tokio::time::timeout(Duration::from_secs(5), watch.next(&mut store, &cancel))
      .await
      .unwrap()
      .unwrap();
    writer.await.unwrap();
    assert_eq!(candidate.unwrap().identity(), Identity::from_bytes(b"new"));
  }

  #[tokio::test]
  async fn test_directory_watch_ends_on_cancel() {
    let dir = tempdir().unwrap();
    let mut store = store_in(dir.path());
    let cancel = CancelFlag::new();
    let mut watch = DirectoryWatch::new(dir.path(), Duration::from_secs(60), Duration::ZERO);

    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(50)).await;
      trigger.cancel();
    });
    let next = tokio::time::timeout(Duration::from_secs(5), watch.next(&mut store, &cancel));
    assert!(next.await.unwrap().unwrap().is_none());
  }

  #[traced_test]
  #[tokio::test]
  async fn test_remote_poll_filters_and_commits_after_drain() {
    let dir = tempdir().unwrap();
    let mut store = store_in(dir.path());
    store.upsert(published(Identity::from_remote("DONE"), "Already Done"));
    store.upsert(published(Identity::from_bytes(b"pdf"), "Known Local Title"));

    let remote = ScriptedRemote::new(vec![Ok(ItemBatch {
      items:           vec![
        item("ATT", "attachment", "scan.pdf"),
        item("THESIS", "thesis", "A Thesis"),
        item("DONE", "journalArticle", "Already Done"),
        item("DUP", "journalArticle", "known  local title"),
        item("NEW", "journalArticle", "Fresh Paper"),
      ],
      library_version: 42,
    })]);
    let cancel = CancelFlag::new();
    let mut poll = RemotePoll::new(remote.clone(), Duration::from_millis(10));

    let Some(Candidate::Remote(first)) = poll.next(&mut store, &cancel).await.unwrap() else {
      panic!("expected a remote candidate");
    };
    assert_eq!(first.key, "NEW");
    assert_eq!(store.checkpoint().library_version, 0);

    // Asking again means the item was processed; the batch is committed before the next fetch.
    let cancel_later = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(100)).await;
      cancel_later.cancel();
    });
    assert!(poll.next(&mut store, &cancel).await.unwrap().is_none());
    assert_eq!(store.checkpoint().library_version, 42);
    assert_eq!(RecordStore::load(store.path()).unwrap().checkpoint().library_version, 42);
    assert_eq!(remote.calls.lock().unwrap()[..2], [0, 42]);
    assert!(logs_contain("same title as"));
  }

  #[traced_test]
  #[tokio::test]
  async fn test_remote_poll_survives_fetch_errors() {
    let dir = tempdir().unwrap();
    let mut store = store_in(dir.path());
    let remote = ScriptedRemote::new(vec![
      Err(PapyrusError::Api("HTTP 503".into())),
      Ok(ItemBatch { items: vec![item("NEW", "book", "A Book")], library_version: 7 }),
    ]);
    let mut poll = RemotePoll::new(remote, Duration::from_millis(10));

    let candidate = poll.next(&mut store, &CancelFlag::new()).await.unwrap().unwrap();
    assert_eq!(candidate.identity(), Identity::from_remote("NEW"));
    assert!(logs_contain("retrying later"));
  }

  #[tokio::test]
  async fn test_remote_poll_resumes_unfinished_records() {
    let dir = tempdir().unwrap();
    let mut store = store_in(dir.path());
    let mut stalled = PaperRecord::new(Identity::from_remote("STALLED"));
    stalled.set_biblio(Biblio { title: "Stalled".into(), ..Default::default() });
    store.upsert(stalled);

    let mut poll = RemotePoll::new(ScriptedRemote::new(Vec::new()), Duration::from_secs(60));
    let candidate = poll.next(&mut store, &CancelFlag::new()).await.unwrap().unwrap();
    assert!(matches!(candidate, Candidate::Known(id) if id == Identity::from_remote("STALLED")));
  }

  #[traced_test]
  #[tokio::test]
  async fn test_remote_poll_hands_out_each_item_once() {
    let dir = tempdir().unwrap();
    let mut store = store_in(dir.path());
    let mut stalled = PaperRecord::new(Identity::from_remote("STALLED"));
    stalled.set_biblio(Biblio { title: "Stalled".into(), ..Default::default() });
    store.upsert(stalled);

    // The library reports the stalled item as changed too.
    let remote = ScriptedRemote::new(vec![Ok(ItemBatch {
      items:           vec![
        item("STALLED", "journalArticle", "Stalled"),
        item("NEW", "journalArticle", "Fresh Paper"),
        item("NEW", "journalArticle", "Fresh Paper"),
      ],
      library_version: 5,
    })]);
    let cancel = CancelFlag::new();
    let mut poll = RemotePoll::new(remote, Duration::from_millis(10));

    let mut yielded = Vec::new();
    while yielded.len() < 2 {
      yielded.push(poll.next(&mut store, &cancel).await.unwrap().unwrap().identity());
    }
    assert_eq!(yielded, [Identity::from_remote("STALLED"), Identity::from_remote("NEW")]);

    let cancel_later = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(100)).await;
      cancel_later.cancel();
    });
    assert!(poll.next(&mut store, &cancel).await.unwrap().is_none());
    assert!(logs_contain("already handed out in this run"));
    assert!(logs_contain("already queued"));
  }

  #[tokio::test]
  async fn test_remote_poll_queues_published_items_with_new_citation() {
    let dir = tempdir().unwrap();
    let mut store = store_in(dir.path());
    store.upsert(published(Identity::from_remote("DONE"), "Done"));
    store.upsert(published(Identity::from_remote("SAME"), "Same"));

    let mut with_doi = item("DONE", "journalArticle", "Done");
    with_doi.data.doi = "10.1000/done".into();
    let remote = ScriptedRemote::new(vec![Ok(ItemBatch {
      items:           vec![item("SAME", "journalArticle", "Same"), with_doi],
      library_version: 9,
    })]);
    let mut poll = RemotePoll::new(remote, Duration::from_secs(60));

    let Some(Candidate::Remote(refresh)) =
      poll.next(&mut store, &CancelFlag::new()).await.unwrap()
    else {
      panic!("expected a remote candidate");
    };
    assert_eq!(refresh.key, "DONE");
    assert!(poll.queue.is_empty());
  }

  #[tokio::test]
  async fn test_gap_fill_yields_unpublished_records() {
    let dir = tempdir().unwrap();
    let mut store = store_in(dir.path());
    store.upsert(published(Identity::from_bytes(b"done"), "Done"));
    let mut pending = published(Identity::from_remote("KEY"), "Pending");
    pending.remote_note_written = false;
    store.upsert(pending);
    store.upsert(PaperRecord::new(Identity::from_bytes(b"new")));

    let cancel = CancelFlag::new();
    let mut gaps = GapFill::new(true);
    let mut yielded = Vec::new();
    while let Some(candidate) = gaps.next(&mut store, &cancel).await.unwrap() {
      yielded.push(candidate.identity());
    }
    assert_eq!(yielded.len(), 2);
    assert!(yielded.contains(&Identity::from_remote("KEY")));

    // Without note sync the remote record counts as published.
    let mut gaps = GapFill::new(false);
    let only = gaps.next(&mut store, &cancel).await.unwrap().unwrap();
    assert_eq!(only.identity(), Identity::from_bytes(b"new"));
    assert!(gaps.next(&mut store, &cancel).await.unwrap().is_none());
  }
}
