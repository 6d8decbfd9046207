//! Text and metadata extraction from PDF files.
//!
//! [`TextExtractor`] is the seam the orchestrator talks to; [`PdfExtractor`] implements it with
//! `lopdf`. Extraction is synchronous and CPU-bound, so the orchestrator runs it on the
//! blocking pool.
//!
//! Documents without a usable text layer (scanned, image-only papers) fail with
//! [`PapyrusError::Extraction`].

use lopdf::{Dictionary, Document, Object};

use super::*;

/// Minimum number of non-whitespace characters for a text layer to count as present.
pub const MIN_TEXT_CHARS: usize = 50;

/// Extracted contents of one PDF.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdfText {
  /// Text of all pages, in page order.
  pub text:       String,
  /// Number of pages in the document.
  pub page_count: usize,
  /// Values from the document information dictionary.
  pub metadata:   PdfMetadata,
}

/// Entries of a PDF document information dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdfMetadata {
  /// `/Title`
  pub title:         Option<String>,
  /// `/Author`
  pub author:        Option<String>,
  /// `/Subject`
  pub subject:       Option<String>,
  /// `/Keywords`
  pub keywords:      Option<String>,
  /// `/CreationDate`, in raw PDF date form (`D:YYYYMMDD...`).
  pub creation_date: Option<String>,
}

/// Pulls text out of a document.
pub trait TextExtractor: Send + Sync {
  /// Extracts the text, page count and metadata of the PDF at `path`.
  fn extract(&self, path: &Path) -> Result<PdfText>;
}

/// [`TextExtractor`] backed by `lopdf`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractor;

impl PdfExtractor {
  /// Creates a new extractor.
  pub fn new() -> Self { Self }
}

impl TextExtractor for PdfExtractor {
  fn extract(&self, path: &Path) -> Result<PdfText> {
    let failed = |reason: String| PapyrusError::Extraction { path: path.to_path_buf(), reason };

    let doc = Document::load(path).map_err(|e| failed(e.to_string()))?;
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();

    let mut text = String::new();
    for page in &pages {
      match doc.extract_text(&[*page]) {
        Ok(page_text) => {
          text.push_str(&clean_text(&page_text));
          text.push('\n');
        },
        Err(e) => debug!("Skipping page {page} of {}: {e}", path.display()),
      }
    }

    let visible = text.chars().filter(|c| !c.is_whitespace()).count();
    if visible < MIN_TEXT_CHARS {
      return Err(failed(format!(
        "only {visible} characters of text on {} pages (scanned document?)",
        pages.len()
      )));
    }

    let metadata = extract_metadata(&doc);
    trace!("Extracted {} characters from {}", text.len(), path.display());
    Ok(PdfText { text, page_count: pages.len(), metadata })
  }
}

/// Reads the document information dictionary referenced from the trailer.
fn extract_metadata(doc: &Document) -> PdfMetadata {
  let info = match doc.trailer.get(b"Info") {
    Ok(Object::Reference(id)) => doc.get_dictionary(*id).ok(),
    Ok(Object::Dictionary(dict)) => Some(dict),
    _ => None,
  };
  let Some(info) = info else {
    return PdfMetadata::default();
  };

  PdfMetadata {
    title:         text_entry(info, b"Title"),
    author:        text_entry(info, b"Author"),
    subject:       text_entry(info, b"Subject"),
    keywords:      text_entry(info, b"Keywords"),
    creation_date: text_entry(info, b"CreationDate"),
  }
}

/// A string entry of `dict`, decoded and trimmed.
fn text_entry(dict: &Dictionary, key: &[u8]) -> Option<String> {
  let bytes = dict.get(key).ok()?.as_str().ok()?;
  let value = decode_pdf_string(bytes);
  let value = value.trim();
  (!value.is_empty()).then(|| value.to_string())
}

/// Decodes a PDF text string, which is either UTF-16BE with a byte order mark or
/// single-byte encoded.
pub fn decode_pdf_string(bytes: &[u8]) -> String {
  match bytes.strip_prefix(&[0xFE, 0xFF]) {
    Some(utf16) => {
      let units = utf16.chunks_exact(2).map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
      char::decode_utf16(units).map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER)).collect()
    },
    None => String::from_utf8_lossy(bytes).into_owned(),
  }
}

/// Normalises line endings and drops control characters some producers emit.
fn clean_text(text: &str) -> String {
  text
    .replace("\r\n", "\n")
    .chars()
    .filter(|c| *c == '\n' || *c == '\t' || !c.is_control())
    .collect()
}
