//! Markdown note rendering and exactly-once writing.
//!
//! Every published paper gets one note named `@{year}_{title}.md` in the markdown directory.
//! The writer never overwrites: if the target exists, or a note for the same year whose name
//! contains the start of the same title exists, the paper counts as already written and the
//! existing path is reported instead. Notes are written to a temporary file and moved into
//! place so a crash never leaves a half-written note behind.
//!
//! A written note is only ever touched again by [`refresh_citation`], which fills citation lines
//! that were left empty and leaves every other line as it is.

use chrono::NaiveDate;
use tempfile::NamedTempFile;

use super::*;
use crate::remote::normalize_tag;

/// Maximum length of the title part of a file name.
const MAX_TITLE_CHARS: usize = 80;

/// Length of the title prefix used to spot existing notes for the same paper.
const SIMILAR_PREFIX_CHARS: usize = 30;

/// Written in place of a missing year.
const UNKNOWN: &str = "unknown";

lazy_static! {
  static ref FORBIDDEN: Regex = Regex::new(r#"[<>:"/\\|?*\n\r\t]"#).unwrap();
  static ref HYPHENS: Regex = Regex::new(r"-{2,}").unwrap();
  static ref NUMBERED: Regex = Regex::new(r"^\d+[.)]\s").unwrap();
}

/// Result of [`MarkdownWriter::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
  /// A new note was written.
  Created(PathBuf),
  /// A note for this paper was already there and was left alone.
  AlreadyExists(PathBuf),
}

impl WriteOutcome {
  /// Path of the note.
  pub fn path(&self) -> &Path {
    match self {
      Self::Created(path) | Self::AlreadyExists(path) => path,
    }
  }
}

/// Writes notes into one directory.
#[derive(Debug, Clone)]
pub struct MarkdownWriter {
  /// Target directory, created on first write.
  dir: PathBuf,
}

impl MarkdownWriter {
  /// A writer targeting `dir`.
  pub fn new(dir: impl AsRef<Path>) -> Self { Self { dir: dir.as_ref().to_path_buf() } }

  /// Target directory.
  pub fn dir(&self) -> &Path { &self.dir }

  /// Writes the note for `record` unless one already exists.
  ///
  /// # Errors
  ///
  /// Returns [`PapyrusError::InvalidState`] if the record has no analysis yet, or an I/O error
  /// if the directory cannot be written.
  pub fn write(&self, record: &PaperRecord) -> Result<WriteOutcome> {
    let (Some(biblio), Some(_)) = (record.biblio(), record.analysis()) else {
      return Err(missing_payload(record));
    };
    let target = self.dir.join(file_name(biblio));

    if target.exists() {
      debug!("Note {} already exists", target.display());
      return Ok(WriteOutcome::AlreadyExists(target));
    }
    if let Some(similar) = self.find_similar(biblio) {
      debug!("Found existing note {} for {}", similar.display(), record.identity);
      return Ok(WriteOutcome::AlreadyExists(similar));
    }

    let content = render(record, Utc::now().date_naive())?;
    std::fs::create_dir_all(&self.dir)?;
    let mut temp = NamedTempFile::new_in(&self.dir)?;
    std::io::Write::write_all(&mut temp, content.as_bytes())?;
    temp.as_file().sync_all()?;
    match temp.persist_noclobber(&target) {
      Ok(_) => {},
      Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists =>
        return Ok(WriteOutcome::AlreadyExists(target)),
      Err(e) => return Err(e.error.into()),
    }

    info!("Wrote {}", target.display());
    Ok(WriteOutcome::Created(target))
  }

  /// An existing `@{year}_*.md` note whose name contains the start of this title.
  fn find_similar(&self, biblio: &Biblio) -> Option<PathBuf> {
    let year = biblio.year?;
    let title_part: String =
      sanitize_file_name(&biblio.title).chars().take(SIMILAR_PREFIX_CHARS).collect();
    let title_part = title_part.to_lowercase();
    if title_part.is_empty() {
      return None;
    }

    let dir = glob::Pattern::escape(&self.dir.to_string_lossy());
    let pattern = format!("{dir}/@{year}_*.md");
    glob::glob(&pattern).ok()?.filter_map(std::result::Result::ok).find(|path| {
      path
        .file_name()
        .is_some_and(|name| name.to_string_lossy().to_lowercase().contains(&title_part))
    })
  }
}

/// Error for records that cannot be rendered yet.
fn missing_payload(record: &PaperRecord) -> PapyrusError {
  PapyrusError::InvalidState(format!("{} has no analysis to write", record.identity))
}

/// Replaces characters that are not allowed in file names and joins words with hyphens.
///
/// ```
/// use papyrus::markdown::sanitize_file_name;
///
/// assert_eq!(sanitize_file_name("What? A: Study / Survey"), "What-A-Study-Survey");
/// ```
pub fn sanitize_file_name(name: &str) -> String {
  let name = FORBIDDEN.replace_all(name, "-");
  let name = name.split(' ').filter(|w| !w.is_empty()).collect::<Vec<_>>().join(" ");
  let name = name.replace(" -", "-").replace("- ", "-");
  let name = HYPHENS.replace_all(&name, "-");
  name.trim_matches(|c| c == ' ' || c == '-').replace(' ', "-")
}

/// File name of the note for `biblio`.
pub fn file_name(biblio: &Biblio) -> String {
  let title = if biblio.title.trim().is_empty() { "Untitled" } else { &biblio.title };
  let mut safe_title = sanitize_file_name(title);
  if safe_title.chars().count() > MAX_TITLE_CHARS {
    let cut: String = safe_title.chars().take(MAX_TITLE_CHARS).collect();
    safe_title = match cut.rsplit_once('-') {
      Some((head, _)) if !head.is_empty() => head.to_string(),
      _ => cut,
    };
  }
  match biblio.year {
    Some(year) => format!("@{year}_{safe_title}.md"),
    None => format!("@_{safe_title}.md"),
  }
}

/// Renders the note for `record`, dated `created`.
pub fn render(record: &PaperRecord, created: NaiveDate) -> Result<String> {
  let (Some(biblio), Some(analysis)) = (record.biblio(), record.analysis()) else {
    return Err(missing_payload(record));
  };

  let year = biblio.year.map(|y| y.to_string()).unwrap_or_else(|| UNKNOWN.to_string());
  let tags = merged_tags(&analysis.tags, &biblio.tags);
  let yaml_tags =
    ["literature".to_string(), "paper".to_string()].into_iter().chain(tags.iter().cloned());
  let hashtags = tags.iter().map(|t| format!("#{t}")).collect::<Vec<_>>().join(" ");
  let field = |value: &Option<String>| value.clone().unwrap_or_default();

  let abstract_text = match analysis.abstract_text.trim() {
    "" => biblio.abstract_text.clone().unwrap_or_default(),
    text => text.to_string(),
  };

  let mut out = String::new();
  out.push_str("---\n");
  out.push_str(&format!("title: \"{}\"\n", yaml_escape(&biblio.title)));
  out.push_str(&format!("year: {year}\n"));
  out.push_str(&format!("tags: [{}]\n", yaml_tags.collect::<Vec<_>>().join(", ")));
  out.push_str(&format!("created: {}\n", created.format("%Y-%m-%d")));
  out.push_str(&format!("remote_key: {}\n", record.remote_id.as_deref().unwrap_or_default()));
  out.push_str(&format!("doi: {}\n", field(&biblio.doi)));
  out.push_str(&format!("identity: {}\n", record.identity));
  out.push_str("---\n\n");

  let heading = biblio.title.split_whitespace().collect::<Vec<_>>().join(" ");
  out.push_str(&format!("# {heading}\n\n"));

  out.push_str("## Citation\n");
  for (label, value) in [
    ("Authors", biblio.author_line()),
    ("Year", year.clone()),
    ("Venue", field(&biblio.venue)),
    ("Publisher", field(&biblio.publisher)),
    ("Volume", field(&biblio.volume)),
    ("Issue", field(&biblio.issue)),
    ("Pages", field(&biblio.pages)),
    ("DOI", field(&biblio.doi)),
    ("ISSN", field(&biblio.issn)),
    ("URL", field(&biblio.url)),
    ("Language", field(&biblio.language)),
    ("Tags", hashtags),
  ] {
    out.push_str(&format!("- **{label}**: {value}\n"));
  }

  let key_claims = bullets(&analysis.key_claims);
  let findings = numbered(&analysis.findings);
  section(&mut out, "Abstract", &abstract_text, "> [Add the abstract]");
  section(&mut out, "Key Claims", &key_claims, "> [Summarise the key claims]\n\n-");
  section(&mut out, "Method", analysis.method.trim(), "> [Describe the research method]\n\n-");
  section(&mut out, "Findings", &findings, "> [List the main findings]\n\n1.\n2.\n3.");
  section(&mut out, "Excerpts", analysis.excerpts.trim(), "-");

  out.push_str("## My Thoughts\n> [Your thoughts, critique and open questions]\n\n-\n\n");
  out.push_str("## Links\n- Related notes:\n");

  if let Some(source) = record.source_path.as_deref().and_then(Path::file_stem) {
    out.push_str(&format!("\n---\n**Source file**: [[{}.pdf]]\n", source.to_string_lossy()));
  }
  Ok(out)
}

/// Fills the empty citation lines of the note at `path` from `biblio`.
///
/// Only the `- **Label**:` lines of the citation list and the `doi:` and `year:` front matter
/// keys are considered, and only when they have no value yet. Returns whether the note changed;
/// an unchanged note is not rewritten.
///
/// # Errors
///
/// Returns an I/O error if the note cannot be read or replaced.
pub fn refresh_citation(path: &Path, biblio: &Biblio) -> Result<bool> {
  let content = std::fs::read_to_string(path)?;
  let value = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());
  let year = biblio.year.map(|y| y.to_string());
  let authors = Some(biblio.author_line()).filter(|a| !a.trim().is_empty());

  let front_matter = [("doi:", value(&biblio.doi)), ("year:", year.clone())];
  let citation = [
    ("- **Authors**:", authors),
    ("- **Year**:", year),
    ("- **Venue**:", value(&biblio.venue)),
    ("- **Publisher**:", value(&biblio.publisher)),
    ("- **Volume**:", value(&biblio.volume)),
    ("- **Issue**:", value(&biblio.issue)),
    ("- **Pages**:", value(&biblio.pages)),
    ("- **DOI**:", value(&biblio.doi)),
    ("- **ISSN**:", value(&biblio.issn)),
    ("- **URL**:", value(&biblio.url)),
    ("- **Language**:", value(&biblio.language)),
  ];

  let mut changed = false;
  let mut in_front_matter = false;
  let mut lines = Vec::new();
  for (n, line) in content.lines().enumerate() {
    if line == "---" && (n == 0 || in_front_matter) {
      in_front_matter = n == 0;
      lines.push(line.to_string());
      continue;
    }
    let keys: &[(&str, Option<String>)] = if in_front_matter { &front_matter } else { &citation };
    let filled = keys.iter().find_map(|(key, value)| {
      let current = line.strip_prefix(key)?.trim();
      if !current.is_empty() && current != UNKNOWN {
        return None;
      }
      value.as_ref().map(|value| format!("{key} {value}"))
    });
    match filled {
      Some(filled) => {
        changed = true;
        lines.push(filled);
      },
      None => lines.push(line.to_string()),
    }
  }
  if !changed {
    return Ok(false);
  }

  let mut updated = lines.join("\n");
  if content.ends_with('\n') {
    updated.push('\n');
  }
  let dir = path.parent().unwrap_or_else(|| Path::new("."));
  let mut temp = NamedTempFile::new_in(dir)?;
  std::io::Write::write_all(&mut temp, updated.as_bytes())?;
  temp.as_file().sync_all()?;
  temp.persist(path).map_err(|e| e.error)?;
  debug!("Refreshed citation in {}", path.display());
  Ok(true)
}

/// Quotes `text` for a double-quoted YAML scalar on one line.
fn yaml_escape(text: &str) -> String {
  text.replace('\\', "\\\\").replace('"', "\\\"").replace('\r', "").replace('\n', "\\n")
}

/// Appends a `##` section, using `placeholder` when `body` is empty.
fn section(out: &mut String, heading: &str, body: &str, placeholder: &str) {
  let body = if body.trim().is_empty() { placeholder } else { body };
  out.push_str(&format!("\n## {heading}\n{body}\n\n"));
}

/// Bullet list of the non-empty items.
fn bullets(items: &[String]) -> String {
  let lines: Vec<String> =
    items.iter().filter(|i| !i.trim().is_empty()).map(|i| format!("- {i}")).collect();
  lines.join("\n")
}

/// Numbered list of the non-empty items, keeping numbers the items already carry.
fn numbered(items: &[String]) -> String {
  items
    .iter()
    .filter(|i| !i.trim().is_empty())
    .enumerate()
    .map(|(n, item)| {
      if NUMBERED.is_match(item) {
        item.clone()
      } else {
        format!("{}. {item}", n + 1)
      }
    })
    .collect::<Vec<_>>()
    .join("\n")
}

/// Analysis tags followed by reference-manager tags, normalised and deduplicated.
fn merged_tags(analysis: &[String], remote: &[String]) -> Vec<String> {
  let mut tags: Vec<String> = Vec::new();
  for tag in analysis.iter().chain(remote).map(|t| normalize_tag(t)) {
    if !tag.is_empty() && tag != "literature" && tag != "paper" && !tags.contains(&tag) {
      tags.push(tag);
    }
  }
  tags
}
