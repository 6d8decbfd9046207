//! Bibliographic and analysis payloads attached to a [`PaperRecord`].
//!
//! A [`Biblio`] is the result of Stage 1 (or of the reference manager, or of PDF metadata for
//! theses) and an [`Analysis`] is the result of Stage 2. Both remember where they came from so
//! that the ledger can tell a model-written analysis apart from a heuristic placeholder.
//!
//! # Examples
//!
//! ```
//! use papyrus::paper::{Biblio, BiblioOrigin};
//!
//! let mut biblio = Biblio {
//!   title: "Attention Is All You Need".into(),
//!   authors: vec!["Vaswani, Ashish".into(), "Shazeer, Noam".into()],
//!   year: Some(2017),
//!   ..Default::default()
//! };
//! assert_eq!(biblio.author_line(), "Vaswani, Ashish; Shazeer, Noam");
//! assert_eq!(biblio.origin, BiblioOrigin::Model);
//! ```

use super::*;
use crate::pdf::PdfText;

/// Keywords that mark a document as a thesis or dissertation.
pub const THESIS_KEYWORDS: &[&str] = &["thesis", "dissertation", "학위", "석사", "박사"];

/// Page count from which a document is treated as a thesis.
pub const THESIS_PAGE_COUNT: usize = 50;

lazy_static! {
  static ref YEAR: Regex = Regex::new(r"((?:19|20)\d{2})").unwrap();
  static ref ABSTRACT: Regex = Regex::new(
    r"(?is)(?:abstract|초록)[:\s]*(.+?)(?:\n\n|\nkeyword|\nintroduction|\n1[.\s])"
  )
  .unwrap();
  static ref PARAGRAPH_BREAK: Regex = Regex::new(r"\n\s*\n").unwrap();
  static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Where a [`Biblio`] came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiblioOrigin {
  /// Extracted by the Stage 1 model call.
  #[default]
  Model,
  /// Built from a reference-manager item.
  Remote,
  /// Built from the PDF info dictionary and file name.
  Metadata,
}

/// Bibliographic data for a paper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Biblio {
  /// Title of the paper.
  pub title:         String,
  /// Authors, each formatted as it should appear in a citation.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub authors:       Vec<String>,
  /// Publication year.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub year:          Option<i32>,
  /// Journal, proceedings or publisher the paper appeared in.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub venue:         Option<String>,
  /// Digital Object Identifier.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub doi:           Option<String>,
  /// Publisher name.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub publisher:     Option<String>,
  /// Journal volume.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub volume:        Option<String>,
  /// Journal issue.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub issue:         Option<String>,
  /// Page range.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub pages:         Option<String>,
  /// ISSN of the venue.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub issn:          Option<String>,
  /// Canonical URL.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub url:           Option<String>,
  /// Language of the paper.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub language:      Option<String>,
  /// Abstract as recorded by the reference manager.
  #[serde(rename = "abstract", skip_serializing_if = "Option::is_none")]
  pub abstract_text: Option<String>,
  /// Tags from the reference manager.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub tags:          Vec<String>,
  /// Where this data came from.
  pub origin:        BiblioOrigin,
}

impl Biblio {
  /// Builds bibliographic data from PDF metadata alone.
  ///
  /// Used for theses and to fill gaps the model leaves: the title comes from the info
  /// dictionary or the file stem, the year from the creation date or the file name.
  pub fn from_metadata(pdf: &PdfText, path: &Path) -> Self {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let file_name = path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let metadata = &pdf.metadata;

    let title = non_empty(metadata.title.as_deref()).unwrap_or_else(|| stem.replace('_', " "));
    let authors =
      non_empty(metadata.author.as_deref()).map(|a| split_authors(&a)).unwrap_or_default();
    let year =
      metadata.creation_date.as_deref().and_then(find_year).or_else(|| find_year(&file_name));

    Self {
      title,
      authors,
      year,
      venue: non_empty(metadata.subject.as_deref()),
      origin: BiblioOrigin::Metadata,
      ..Default::default()
    }
  }

  /// Fills empty fields from `fallback`. Fields that already have a value are kept.
  ///
  /// Returns whether anything was filled.
  pub fn fill_missing_from(&mut self, fallback: &Biblio) -> bool {
    let mut changed = false;
    if self.title.trim().is_empty() && !fallback.title.trim().is_empty() {
      self.title = fallback.title.clone();
      changed = true;
    }
    if self.authors.is_empty() && !fallback.authors.is_empty() {
      self.authors = fallback.authors.clone();
      changed = true;
    }
    if self.year.is_none() && fallback.year.is_some() {
      self.year = fallback.year;
      changed = true;
    }
    for (field, value) in [
      (&mut self.venue, &fallback.venue),
      (&mut self.doi, &fallback.doi),
      (&mut self.publisher, &fallback.publisher),
      (&mut self.volume, &fallback.volume),
      (&mut self.issue, &fallback.issue),
      (&mut self.pages, &fallback.pages),
      (&mut self.issn, &fallback.issn),
      (&mut self.url, &fallback.url),
      (&mut self.language, &fallback.language),
      (&mut self.abstract_text, &fallback.abstract_text),
    ] {
      if field.is_none() && value.is_some() {
        field.clone_from(value);
        changed = true;
      }
    }
    changed
  }

  /// Authors joined for display.
  pub fn author_line(&self) -> String { self.authors.join("; ") }
}

/// Where an [`Analysis`] came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisOrigin {
  /// Written by the Stage 2 model call.
  Model {
    /// Model identifier, e.g. `gemini-2.5-flash`.
    model: String,
  },
  /// Built without any model call.
  #[default]
  Heuristic,
}

/// Deep analysis of a paper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Analysis {
  /// The paper's abstract.
  #[serde(rename = "abstract")]
  pub abstract_text: String,
  /// Central claims of the paper.
  pub key_claims:    Vec<String>,
  /// Summary of the research method.
  pub method:        String,
  /// Main results.
  pub findings:      Vec<String>,
  /// Structured excerpts as markdown.
  pub excerpts:      String,
  /// Topic tags.
  pub tags:          Vec<String>,
  /// Where this analysis came from.
  pub origin:        AnalysisOrigin,
}

impl Analysis {
  /// Builds an analysis from the text alone, without calling a model.
  ///
  /// The abstract is located by its heading and the first long paragraphs become excerpts.
  /// Everything else is left empty for the reader to fill in.
  pub fn heuristic(text: &str) -> Self {
    let abstract_text = ABSTRACT
      .captures(text)
      .and_then(|caps| caps.get(1))
      .map(|m| m.as_str().trim().chars().take(1000).collect::<String>())
      .filter(|a| !a.is_empty())
      .unwrap_or_else(|| "[Abstract could not be extracted. Check the source PDF.]".to_string());

    let points: Vec<String> = PARAGRAPH_BREAK
      .split(text)
      .map(str::trim)
      .filter(|p| p.chars().count() >= 120)
      .take(3)
      .map(|p| WHITESPACE.replace_all(p, " ").chars().take(500).collect::<String>())
      .map(|p| p.trim().to_string())
      .collect();

    let excerpts = if points.is_empty() {
      "### Key excerpts\n\n- [Not enough text to excerpt automatically.]\n\n### Summary\nCheck the \
       source PDF and add excerpts by hand."
        .to_string()
    } else {
      let bullets = points.iter().map(|p| format!("- {p}")).collect::<Vec<_>>().join("\n");
      format!(
        "### Key excerpts\n\n{bullets}\n\n### Summary\nExcerpts taken verbatim from the source \
         text. A model analysis gives a structured summary."
      )
    };

    Self { abstract_text, excerpts, origin: AnalysisOrigin::Heuristic, ..Default::default() }
  }
}

/// Whether a document looks like a thesis or dissertation.
pub fn is_thesis(pdf: &PdfText, path: &Path) -> bool {
  if pdf.page_count >= THESIS_PAGE_COUNT {
    return true;
  }
  let file_name = path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
  let haystack = [
    pdf.metadata.title.as_deref().unwrap_or_default(),
    pdf.metadata.subject.as_deref().unwrap_or_default(),
    &file_name,
  ]
  .join(" ")
  .to_lowercase();
  THESIS_KEYWORDS.iter().any(|keyword| haystack.contains(keyword))
}

/// Finds the first plausible four-digit publication year in `text`.
pub fn find_year(text: &str) -> Option<i32> {
  YEAR.captures(text).and_then(|caps| caps.get(1)).and_then(|m| m.as_str().parse().ok())
}

/// Splits a free-form author string on `;`, or on ` and ` when no `;` is present.
pub fn split_authors(authors: &str) -> Vec<String> {
  let separator = if authors.contains(';') { ";" } else { " and " };
  authors.split(separator).map(str::trim).filter(|a| !a.is_empty()).map(String::from).collect()
}

/// Trimmed, non-empty copy of `value`.
fn non_empty(value: Option<&str>) -> Option<String> {
  value.map(str::trim).filter(|v| !v.is_empty()).map(String::from)
}
