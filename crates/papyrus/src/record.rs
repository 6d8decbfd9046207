//! Paper identities, processing stages and the per-paper ledger entry.
//!
//! A [`PaperRecord`] is everything the ledger knows about one paper: where it came from, which
//! stage outputs exist and which outputs were written. The [`Stage`] is never stored; it is
//! derived from those fields every time it is needed, so the two can never disagree.
//!
//! # Examples
//!
//! ```
//! use papyrus::{
//!   paper::{Analysis, Biblio},
//!   record::{Identity, PaperRecord, Stage},
//! };
//!
//! let mut record = PaperRecord::new(Identity::from_bytes(b"%PDF-1.7 ..."));
//! assert_eq!(record.stage(false), Stage::New);
//!
//! record.set_biblio(Biblio { title: "A Paper".into(), ..Default::default() });
//! record.set_analysis(Analysis::default()).unwrap();
//! assert_eq!(record.stage(false), Stage::AnalysisDone);
//! ```

use std::str::FromStr;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use super::*;

lazy_static! {
  static ref HTML_TAG: Regex = Regex::new(r"<[^>]+>").unwrap();
  static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Prefix of identities derived from file contents.
const HASH_PREFIX: &str = "sha256:";
/// Prefix of identities derived from reference-manager item keys.
const REMOTE_PREFIX: &str = "remote:";
/// Read size when hashing files.
const HASH_CHUNK_BYTES: usize = 64 * 1024;

/// Stable deduplication key of a paper.
///
/// Local files are identified by the SHA-256 digest of their bytes, so renaming or moving a
/// PDF does not make it a new paper. Reference-manager items are identified by their item key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
  /// Identity of a document with the given contents.
  pub fn from_bytes(bytes: &[u8]) -> Self {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Self(format!("{HASH_PREFIX}{:x}", hasher.finalize()))
  }

  /// Identity of the file at `path`, hashing its full contents.
  ///
  /// The file is streamed through the hasher, so memory use does not grow with its size.
  pub async fn from_file(path: &Path) -> Result<Self> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0; HASH_CHUNK_BYTES];
    loop {
      let read = file.read(&mut buf).await?;
      if read == 0 {
        break;
      }
      hasher.update(&buf[..read]);
    }
    Ok(Self(format!("{HASH_PREFIX}{:x}", hasher.finalize())))
  }

  /// Identity of a reference-manager item.
  pub fn from_remote(key: &str) -> Self { Self(format!("{REMOTE_PREFIX}{key}")) }

  /// The reference-manager item key, for remote identities.
  pub fn remote_key(&self) -> Option<&str> { self.0.strip_prefix(REMOTE_PREFIX) }

  /// String form as stored in the ledger.
  pub fn as_str(&self) -> &str { &self.0 }
}

impl FromStr for Identity {
  type Err = PapyrusError;

  fn from_str(s: &str) -> Result<Self> {
    let valid = match (s.strip_prefix(HASH_PREFIX), s.strip_prefix(REMOTE_PREFIX)) {
      (Some(digest), _) => digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()),
      (_, Some(key)) => !key.is_empty(),
      _ => false,
    };
    if !valid {
      return Err(PapyrusError::InvalidState(format!(
        "'{s}' is not an identity (expected sha256:<digest> or remote:<key>)"
      )));
    }
    Ok(Self(s.to_string()))
  }
}

impl Display for Identity {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

/// How far a paper has progressed through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
  /// Nothing has been produced yet.
  New,
  /// Bibliographic data exists.
  BiblioDone,
  /// The analysis exists but at least one required output is missing.
  AnalysisDone,
  /// Every required output has been written.
  Published,
}

impl Display for Stage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Stage::New => write!(f, "new"),
      Stage::BiblioDone => write!(f, "biblio"),
      Stage::AnalysisDone => write!(f, "analysis"),
      Stage::Published => write!(f, "published"),
    }
  }
}

impl FromStr for Stage {
  type Err = PapyrusError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_lowercase().as_str() {
      "new" => Ok(Stage::New),
      "biblio" | "biblio-done" => Ok(Stage::BiblioDone),
      "analysis" | "analysis-done" => Ok(Stage::AnalysisDone),
      "published" => Ok(Stage::Published),
      other => Err(PapyrusError::InvalidState(format!("unknown stage '{other}'"))),
    }
  }
}

/// Ledger entry for one paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
  /// Deduplication key; equals the ledger key.
  pub identity:            Identity,
  /// Last known local PDF.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_path:         Option<PathBuf>,
  /// Reference-manager item key.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub remote_id:           Option<String>,
  /// Stage 1 output.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  biblio:                  Option<Biblio>,
  /// Stage 2 output.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  analysis:                Option<Analysis>,
  /// Whether the markdown note exists.
  #[serde(default)]
  pub markdown_written:    bool,
  /// Where the markdown note was written or found.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub markdown_path:       Option<PathBuf>,
  /// Whether the note was uploaded to the reference manager.
  #[serde(default)]
  pub remote_note_written: bool,
  /// Most recent failure; never blocks a retry.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_error:          Option<String>,
  /// Runs that touched this record without publishing it.
  #[serde(default)]
  pub attempts:            u32,
  /// When the record was created.
  pub created_at:          DateTime<Utc>,
  /// When the record last changed.
  pub updated_at:          DateTime<Utc>,
}

impl PaperRecord {
  /// A fresh record at [`Stage::New`].
  pub fn new(identity: Identity) -> Self {
    let now = Utc::now();
    let remote_id = identity.remote_key().map(String::from);
    Self {
      identity,
      source_path: None,
      remote_id,
      biblio: None,
      analysis: None,
      markdown_written: false,
      markdown_path: None,
      remote_note_written: false,
      last_error: None,
      attempts: 0,
      created_at: now,
      updated_at: now,
    }
  }

  /// Stage 1 output, if any.
  pub fn biblio(&self) -> Option<&Biblio> { self.biblio.as_ref() }

  /// Stage 2 output, if any.
  pub fn analysis(&self) -> Option<&Analysis> { self.analysis.as_ref() }

  /// Best known title.
  pub fn title(&self) -> Option<&str> {
    self.biblio.as_ref().map(|b| b.title.as_str()).filter(|t| !t.trim().is_empty())
  }

  /// Whether publishing this record requires a note in the reference manager.
  pub fn remote_note_required(&self, remote_sync: bool) -> bool {
    remote_sync && self.remote_id.is_some()
  }

  /// The current stage, derived from the stored fields.
  pub fn stage(&self, remote_sync: bool) -> Stage {
    match (&self.biblio, &self.analysis) {
      (None, _) => Stage::New,
      (Some(_), None) => Stage::BiblioDone,
      (Some(_), Some(_)) => {
        let remote_done = !self.remote_note_required(remote_sync) || self.remote_note_written;
        if self.markdown_written && remote_done {
          Stage::Published
        } else {
          Stage::AnalysisDone
        }
      },
    }
  }

  /// Shorthand for `stage(remote_sync) == Stage::Published`.
  pub fn is_published(&self, remote_sync: bool) -> bool {
    self.stage(remote_sync) == Stage::Published
  }

  /// Stores Stage 1 output.
  pub fn set_biblio(&mut self, biblio: Biblio) {
    self.biblio = Some(biblio);
    self.succeeded();
  }

  /// Replaces the bibliographic data with a more complete copy of it.
  ///
  /// Unlike [`set_biblio`](Self::set_biblio) this is not a stage transition, so `last_error`
  /// is kept.
  pub fn refresh_biblio(&mut self, biblio: Biblio) {
    self.biblio = Some(biblio);
    self.touch();
  }

  /// Stores Stage 2 output.
  ///
  /// # Errors
  ///
  /// Returns [`PapyrusError::InvalidState`] if the record has no bibliographic data yet.
  pub fn set_analysis(&mut self, analysis: Analysis) -> Result<()> {
    if self.biblio.is_none() {
      return Err(PapyrusError::InvalidState(format!(
        "{} has no bibliographic data; analysis must come after Stage 1",
        self.identity
      )));
    }
    self.analysis = Some(analysis);
    self.succeeded();
    Ok(())
  }

  /// Marks the markdown note as present at `path`.
  pub fn mark_markdown_written(&mut self, path: PathBuf) {
    self.markdown_written = true;
    self.markdown_path = Some(path);
    self.touch();
  }

  /// Marks the reference-manager note as uploaded.
  pub fn mark_remote_note_written(&mut self) {
    self.remote_note_written = true;
    self.touch();
  }

  /// Stores `error` as the most recent failure.
  pub fn record_error(&mut self, error: &PapyrusError) {
    self.last_error = Some(error.summary());
    self.touch();
  }

  /// Folds `other` into `self`.
  ///
  /// Fields `other` has set overwrite ours, write flags never go back to `false` and the most
  /// recent `last_error` wins.
  pub fn merge(&mut self, other: PaperRecord) {
    if other.source_path.is_some() {
      self.source_path = other.source_path;
    }
    if other.remote_id.is_some() {
      self.remote_id = other.remote_id;
    }
    if other.biblio.is_some() {
      self.biblio = other.biblio;
    }
    if other.analysis.is_some() {
      self.analysis = other.analysis;
    }
    if other.markdown_path.is_some() {
      self.markdown_path = other.markdown_path;
    }
    self.markdown_written |= other.markdown_written;
    self.remote_note_written |= other.remote_note_written;
    if other.updated_at >= self.updated_at {
      self.last_error = other.last_error;
      self.attempts = other.attempts;
      self.updated_at = other.updated_at;
    }
  }

  /// Rewinds the record so the given stage is run again.
  ///
  /// `Stage::New` drops everything, `Stage::BiblioDone` keeps only the bibliographic data and
  /// `Stage::AnalysisDone` keeps both payloads but forgets that the outputs were written.
  pub fn reset_to(&mut self, stage: Stage) -> Result<()> {
    match stage {
      Stage::New => {
        self.biblio = None;
        self.analysis = None;
      },
      Stage::BiblioDone if self.biblio.is_some() => self.analysis = None,
      Stage::AnalysisDone if self.analysis.is_some() => {},
      _ => {
        return Err(PapyrusError::InvalidState(format!(
          "cannot reset {} to {stage}; it is currently at {}",
          self.identity,
          self.stage(true)
        )))
      },
    }
    self.markdown_written = false;
    self.markdown_path = None;
    self.remote_note_written = false;
    self.last_error = None;
    self.attempts = 0;
    self.touch();
    Ok(())
  }

  /// Checks the invariants a persisted record must satisfy.
  pub fn validate(&self) -> core::result::Result<(), String> {
    if self.analysis.is_some() && self.biblio.is_none() {
      return Err(format!("{} has an analysis but no bibliographic data", self.identity));
    }
    if self.identity.remote_key().is_some() && self.remote_id.is_none() {
      return Err(format!("{} is a remote identity without a remote id", self.identity));
    }
    Ok(())
  }

  /// Clears the last error after a successful transition.
  fn succeeded(&mut self) {
    self.last_error = None;
    self.touch();
  }

  /// Bumps `updated_at`.
  fn touch(&mut self) { self.updated_at = Utc::now(); }
}

/// Normalises a title for duplicate detection.
///
/// HTML tags are stripped, whitespace runs collapsed, and the result is trimmed and lowercased.
///
/// ```
/// use papyrus::record::normalize_title;
///
/// assert_eq!(normalize_title("  The <i>Rust</i>\n Book "), "the rust book");
/// ```
pub fn normalize_title(title: &str) -> String {
  let stripped = HTML_TAG.replace_all(title, "");
  WHITESPACE.replace_all(&stripped, " ").trim().to_lowercase()
}
