//! Prompt templates for the two model stages.
//!
//! Both prompts ask for a bare JSON object; [`crate::llm::parse_json_response`] copes with
//! models that wrap it in a fenced block anyway.

use super::*;

/// Characters of paper text sent to the analysis stage.
pub const MAX_TEXT_CHARS: usize = 30_000;

/// Characters of paper text sent to the bibliographic stage. The front matter is enough.
pub const STAGE1_TEXT_CHARS: usize = 8_000;

/// Stage 1 template. `{text}` is replaced with the paper text.
const BIBLIO_PROMPT: &str = r#"Extract only the bibliographic information from the paper text below.
Respond with JSON in exactly this shape and nothing else:

{
  "title": "paper title",
  "authors": ["Last, First", "Last, First"],
  "year": "four-digit publication year, or an empty string if unknown",
  "journal": "journal, conference or other venue"
}

Paper text:
{text}
"#;

/// Stage 2 template. `{title}`, `{authors}`, `{year}`, `{journal}` and `{text}` are replaced.
const ANALYSIS_PROMPT: &str = r#"You are an expert reader of academic papers. Analyse the paper below and respond
with JSON in exactly this shape and nothing else:

{
  "abstract": "the paper's abstract, verbatim",
  "key_claims": ["claim 1", "claim 2", "claim 3"],
  "method": "summary of the research method",
  "findings": ["1. finding", "2. finding", "3. finding"],
  "excerpts": "markdown with this structure:\n### Core analysis\n#### 1. [topic]\n- [excerpt or commentary grounded in the text]\n#### 2. [topic]\n- [excerpt or commentary grounded in the text]\n### Executive summary\n[three to five sentences on practical implications]",
  "tags": ["tag1", "tag2", "tag3"]
}

Bibliographic information (for reference):
- Title: {title}
- Authors: {authors}
- Year: {year}
- Venue: {journal}

Paper text:
{text}
"#;

/// Prompt for Stage 1 on the first [`STAGE1_TEXT_CHARS`] characters of `text`.
pub fn biblio_prompt(text: &str) -> String {
  BIBLIO_PROMPT.replace("{text}", truncate_chars(text, STAGE1_TEXT_CHARS))
}

/// Prompt for Stage 2 on the first [`MAX_TEXT_CHARS`] characters of `text`.
pub fn analysis_prompt(text: &str, biblio: &Biblio) -> String {
  let year = biblio.year.map(|y| y.to_string()).unwrap_or_default();
  ANALYSIS_PROMPT
    .replace("{title}", &biblio.title)
    .replace("{authors}", &biblio.author_line())
    .replace("{year}", &year)
    .replace("{journal}", biblio.venue.as_deref().unwrap_or_default())
    .replace("{text}", truncate_chars(text, MAX_TEXT_CHARS))
}

/// The first `max` characters of `text`, cut on a character boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
  match text.char_indices().nth(max) {
    Some((index, _)) => &text[..index],
    None => text,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_truncate_on_char_boundary() {
    assert_eq!(truncate_chars("héllo", 2), "hé");
    assert_eq!(truncate_chars("short", 100), "short");
  }

  #[test]
  fn test_biblio_prompt_uses_front_matter_only() {
    let text = format!("{}TAIL", "a".repeat(STAGE1_TEXT_CHARS));
    let prompt = biblio_prompt(&text);
    assert!(!prompt.contains("TAIL"));
    assert!(prompt.contains("\"authors\""));
  }

  #[test]
  fn test_analysis_prompt_includes_biblio() {
    let biblio = Biblio {
      title: "Resumable Ledgers".into(),
      authors: vec!["Doe, Jane".into()],
      year: Some(2019),
      ..Default::default()
    };
    let prompt = analysis_prompt("body text", &biblio);
    assert!(prompt.contains("- Title: Resumable Ledgers"));
    assert!(prompt.contains("- Authors: Doe, Jane"));
    assert!(prompt.contains("- Year: 2019"));
    assert!(prompt.ends_with("body text\n"));
  }
}
