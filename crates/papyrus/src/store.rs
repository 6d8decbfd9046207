//! The persisted ledger of paper records.
//!
//! The [`RecordStore`] is the single source of truth for "has this paper been done". It is one
//! pretty-printed JSON document holding every [`PaperRecord`] keyed by identity, plus the
//! remote-poll checkpoint:
//!
//! ```json
//! {
//!   "version": 1,
//!   "checkpoint": { "library_version": 0, "committed_at": null },
//!   "records": { "sha256:...": { "identity": "sha256:...", ... } }
//! }
//! ```
//!
//! Saves write the whole document to a temporary file next to the ledger, fsync it and rename
//! it over the target, so the ledger on disk is always either the previous or the new version.
//! A ledger that cannot be understood is reported as [`PapyrusError::CorruptStore`] and is
//! never silently replaced by an empty one.

use tempfile::NamedTempFile;

use super::*;

/// Format version written to and accepted from disk.
pub const STORE_VERSION: u32 = 1;

/// Progress marker of the remote-library poller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollCheckpoint {
  /// Library version up to which every item has been processed.
  pub library_version: u64,
  /// When `library_version` was last committed.
  pub committed_at:    Option<DateTime<Utc>>,
}

/// On-disk form of the ledger.
#[derive(Deserialize)]
struct Ledger {
  /// Format version.
  version:    u32,
  /// Remote-poll checkpoint.
  #[serde(default)]
  checkpoint: PollCheckpoint,
  /// Records keyed by identity.
  #[serde(default)]
  records:    BTreeMap<Identity, PaperRecord>,
}

/// Borrowed on-disk form of the ledger, used when saving.
#[derive(Serialize)]
struct LedgerRef<'a> {
  /// Format version.
  version:    u32,
  /// Remote-poll checkpoint.
  checkpoint: &'a PollCheckpoint,
  /// Records keyed by identity.
  records:    &'a BTreeMap<Identity, PaperRecord>,
}

/// Durable map from identity to [`PaperRecord`].
#[derive(Debug, Clone)]
pub struct RecordStore {
  /// Location of the ledger file.
  path:       PathBuf,
  /// Records keyed by identity.
  records:    BTreeMap<Identity, PaperRecord>,
  /// Remote-poll checkpoint.
  checkpoint: PollCheckpoint,
}

impl RecordStore {
  /// Loads the ledger at `path`, or starts an empty one if the file does not exist.
  ///
  /// # Errors
  ///
  /// Returns [`PapyrusError::CorruptStore`] if the file cannot be parsed, has an unknown
  /// version or breaks a record invariant.
  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    let corrupt = |reason: String| PapyrusError::CorruptStore { path: path.clone(), reason };

    let contents = match std::fs::read_to_string(&path) {
      Ok(contents) => contents,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        info!("No ledger at {}, starting empty", path.display());
        return Ok(Self { path, records: BTreeMap::new(), checkpoint: PollCheckpoint::default() });
      },
      Err(e) => return Err(e.into()),
    };

    let ledger: Ledger = serde_json::from_str(&contents).map_err(|e| corrupt(e.to_string()))?;
    if ledger.version != STORE_VERSION {
      return Err(corrupt(format!(
        "unsupported format version {} (expected {STORE_VERSION})",
        ledger.version
      )));
    }
    for (key, record) in &ledger.records {
      if *key != record.identity {
        return Err(corrupt(format!("entry {key} holds the record of {}", record.identity)));
      }
      record.validate().map_err(corrupt)?;
    }

    debug!("Loaded {} records from {}", ledger.records.len(), path.display());
    Ok(Self { path, records: ledger.records, checkpoint: ledger.checkpoint })
  }

  /// Atomically writes the whole ledger to disk.
  pub fn save(&self) -> Result<()> {
    let parent = match self.path.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => parent,
      _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let ledger =
      LedgerRef { version: STORE_VERSION, checkpoint: &self.checkpoint, records: &self.records };
    let mut temp = NamedTempFile::new_in(parent)?;
    serde_json::to_writer_pretty(&mut temp, &ledger)?;
    temp.as_file().sync_all()?;
    temp.persist(&self.path).map_err(|e| e.error)?;

    trace!("Saved {} records to {}", self.records.len(), self.path.display());
    Ok(())
  }

  /// A copy of the record for `identity`, or a fresh one. Nothing is persisted.
  pub fn get_or_create(&self, identity: &Identity) -> PaperRecord {
    self.records.get(identity).cloned().unwrap_or_else(|| PaperRecord::new(identity.clone()))
  }

  /// Merges `record` into the ledger. Call [`save`](Self::save) to persist.
  pub fn upsert(&mut self, record: PaperRecord) {
    match self.records.get_mut(&record.identity) {
      Some(existing) => existing.merge(record),
      None => {
        self.records.insert(record.identity.clone(), record);
      },
    }
  }

  /// The record for `identity`, if any.
  pub fn get(&self, identity: &Identity) -> Option<&PaperRecord> { self.records.get(identity) }

  /// All records in identity order.
  pub fn records(&self) -> impl Iterator<Item = &PaperRecord> { self.records.values() }

  /// Number of records.
  pub fn len(&self) -> usize { self.records.len() }

  /// Whether the ledger has no records.
  pub fn is_empty(&self) -> bool { self.records.is_empty() }

  /// The first record whose title matches `title` after normalisation.
  pub fn find_by_title(&self, title: &str) -> Option<&PaperRecord> {
    let wanted = normalize_title(title);
    if wanted.is_empty() {
      return None;
    }
    self.records().find(|record| record.title().is_some_and(|t| normalize_title(t) == wanted))
  }

  /// The remote-poll checkpoint.
  pub fn checkpoint(&self) -> PollCheckpoint { self.checkpoint }

  /// Commits `library_version` as fully processed. Call [`save`](Self::save) to persist.
  pub fn set_checkpoint(&mut self, library_version: u64) {
    self.checkpoint = PollCheckpoint { library_version, committed_at: Some(Utc::now()) };
  }

  /// Rewinds the record for `identity` so `stage` runs again on the next pass.
  pub fn reset(&mut self, identity: &Identity, stage: Stage) -> Result<()> {
    let record = self
      .records
      .get_mut(identity)
      .ok_or_else(|| PapyrusError::InvalidState(format!("{identity} is not in the ledger")))?;
    record.reset_to(stage)
  }

  /// Location of the ledger file.
  pub fn path(&self) -> &Path { &self.path }
}
