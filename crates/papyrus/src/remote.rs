//! Client for the Zotero web API and the [`RemoteLibrary`] seam.
//!
//! Three operations are needed from the reference manager:
//!
//! - list the items changed since a library version (the poll),
//! - locate the PDF of an item in the local Zotero storage directory,
//! - attach the analysis to an item as a child note.
//!
//! Listing and lookup failures surface as network or API errors and are retried at the next
//! poll; note uploads fail with [`PapyrusError::RemoteSync`] so the orchestrator can repeat
//! just that write later.

use super::*;
use crate::config::RemoteConfig;

/// Tag attached to every note this crate creates.
pub const NOTE_TAG: &str = "auto-analyzed";

/// Page size used when listing items.
const PAGE_SIZE: usize = 100;

/// Item types that are never ingested.
const SKIPPED_TYPES: &[&str] = &["attachment", "note", "thesis", "dissertation"];

lazy_static! {
  static ref NUMBERED: Regex = Regex::new(r"^\d+[.)]\s").unwrap();
}

/// A reference-manager item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
  /// Item key, unique within the library.
  pub key:     String,
  /// Version at which the item last changed.
  #[serde(default)]
  pub version: u64,
  /// Item fields.
  pub data:    ItemData,
}

/// Fields of a reference-manager item. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ItemData {
  pub item_type:         String,
  pub title:             String,
  pub creators:          Vec<Creator>,
  pub date:              String,
  pub publication_title: String,
  pub book_title:        String,
  pub proceedings_title: String,
  pub publisher:         String,
  #[serde(rename = "DOI")]
  pub doi:               String,
  pub volume:            String,
  pub issue:             String,
  pub pages:             String,
  #[serde(rename = "ISSN")]
  pub issn:              String,
  pub url:               String,
  pub language:          String,
  pub abstract_note:     String,
  pub tags:              Vec<ItemTag>,
  /// MIME type, for attachments.
  pub content_type:      String,
}

/// A creator of an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Creator {
  pub creator_type: String,
  pub first_name:   String,
  pub last_name:    String,
  /// Single-field name, used for institutions.
  pub name:         String,
}

/// A tag on an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemTag {
  /// Tag text.
  pub tag: String,
}

impl RemoteItem {
  /// Whether the item is of a type that is never ingested.
  pub fn is_skippable(&self) -> bool { SKIPPED_TYPES.contains(&self.data.item_type.as_str()) }

  /// Converts the item into bibliographic data.
  pub fn to_biblio(&self) -> Biblio {
    let data = &self.data;
    let authors = data
      .creators
      .iter()
      .filter(|c| c.creator_type == "author")
      .filter_map(|c| {
        let name = match (c.last_name.trim(), c.first_name.trim()) {
          ("", "") => c.name.trim().to_string(),
          ("", first) => first.to_string(),
          (last, "") => last.to_string(),
          (last, first) => format!("{last}, {first}"),
        };
        (!name.is_empty()).then_some(name)
      })
      .collect();

    let venue = [&data.publication_title, &data.book_title, &data.proceedings_title]
      .into_iter()
      .chain([&data.publisher])
      .find(|v| !v.trim().is_empty())
      .map(|v| v.trim().to_string());

    let mut tags: Vec<String> = Vec::new();
    for tag in data.tags.iter().map(|t| normalize_tag(&t.tag)).filter(|t| !t.is_empty()) {
      if !tags.contains(&tag) {
        tags.push(tag);
      }
    }

    Biblio {
      title: data.title.trim().to_string(),
      authors,
      year: find_year(&data.date),
      venue,
      doi: non_empty(&data.doi),
      publisher: non_empty(&data.publisher),
      volume: non_empty(&data.volume),
      issue: non_empty(&data.issue),
      pages: non_empty(&data.pages),
      issn: non_empty(&data.issn),
      url: non_empty(&data.url),
      language: non_empty(&data.language),
      abstract_text: non_empty(&data.abstract_note),
      tags,
      origin: BiblioOrigin::Remote,
    }
  }
}

/// Trimmed copy of `value`, or `None` when blank.
fn non_empty(value: &str) -> Option<String> {
  Some(value.trim().to_string()).filter(|v| !v.is_empty())
}

/// Lowercases a tag and joins its words with hyphens.
pub fn normalize_tag(tag: &str) -> String {
  tag.trim().trim_start_matches('#').split_whitespace().collect::<Vec<_>>().join("-").to_lowercase()
}

/// Items returned by one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemBatch {
  /// Items changed since the requested version.
  pub items:           Vec<RemoteItem>,
  /// Library version the listing reflects.
  pub library_version: u64,
}

/// Operations the pipeline needs from a reference manager.
#[async_trait]
pub trait RemoteLibrary: Send + Sync {
  /// Lists top-level items changed since `version`.
  async fn list_items_since(&self, version: u64) -> Result<ItemBatch>;

  /// Path of the item's PDF in local storage, if one has been synced.
  async fn find_pdf(&self, item_key: &str) -> Result<Option<PathBuf>>;

  /// Attaches `html` to the item as a child note.
  async fn upload_note(&self, item_key: &str, html: &str) -> Result<()>;
}

/// [`RemoteLibrary`] backed by the Zotero web API v3.
#[derive(Debug, Clone)]
pub struct ZoteroClient {
  /// HTTP client carrying the API headers and timeout.
  client:      reqwest::Client,
  /// `{base_url}/users/{library_id}/`
  library_url: Url,
  /// Local storage directory with one folder per attachment.
  storage_dir: Option<PathBuf>,
  /// Per-call deadline in seconds.
  timeout:     u64,
}

impl ZoteroClient {
  /// Builds a client from the `[remote]` configuration section.
  pub fn from_config(config: &RemoteConfig) -> Result<Self> {
    let mut headers = reqwest::header::HeaderMap::new();
    let api_key = reqwest::header::HeaderValue::from_str(&config.api_key)
      .map_err(|_| PapyrusError::Config("remote.api_key contains invalid characters".into()))?;
    headers.insert("Zotero-API-Key", api_key);
    headers.insert("Zotero-API-Version", reqwest::header::HeaderValue::from_static("3"));

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()?;

    let base = config.base_url.trim_end_matches('/');
    let library_url = Url::parse(&format!("{base}/users/{}/", config.library_id))
      .map_err(|e| PapyrusError::Config(format!("invalid remote.base_url {base}: {e}")))?;

    Ok(Self {
      client,
      library_url,
      storage_dir: config.storage_dir.clone(),
      timeout: config.timeout_secs,
    })
  }

  /// Resolves `path` against the library URL.
  fn url(&self, path: &str) -> Result<Url> {
    self
      .library_url
      .join(path)
      .map_err(|e| PapyrusError::Config(format!("invalid remote path {path}: {e}")))
  }

  /// Maps deadline errors to [`PapyrusError::Timeout`].
  fn network_error(&self, error: reqwest::Error) -> PapyrusError {
    if error.is_timeout() {
      PapyrusError::Timeout { secs: self.timeout }
    } else {
      PapyrusError::Network(error)
    }
  }

  /// Sends a GET and fails on non-success statuses.
  async fn get(&self, url: Url) -> Result<reqwest::Response> {
    let response = self.client.get(url.clone()).send().await.map_err(|e| self.network_error(e))?;
    let status = response.status();
    if !status.is_success() {
      return Err(PapyrusError::Api(format!("GET {} returned HTTP {status}", url.path())));
    }
    Ok(response)
  }
}

/// Reads a numeric response header.
fn header_number(response: &reqwest::Response, name: &str) -> Option<u64> {
  response.headers().get(name)?.to_str().ok()?.trim().parse().ok()
}

#[async_trait]
impl RemoteLibrary for ZoteroClient {
  async fn list_items_since(&self, version: u64) -> Result<ItemBatch> {
    let mut batch = ItemBatch { items: Vec::new(), library_version: version };
    let mut start = 0;

    loop {
      let mut url = self.url("items/top")?;
      url
        .query_pairs_mut()
        .append_pair("since", &version.to_string())
        .append_pair("format", "json")
        .append_pair("limit", &PAGE_SIZE.to_string())
        .append_pair("start", &start.to_string());

      let response = self.get(url).await?;
      if let Some(library_version) = header_number(&response, "Last-Modified-Version") {
        batch.library_version = batch.library_version.max(library_version);
      }
      let total = header_number(&response, "Total-Results");
      let page: Vec<RemoteItem> = response.json().await.map_err(|e| self.network_error(e))?;

      let fetched = page.len();
      start += fetched;
      batch.items.extend(page);
      trace!("Fetched {start} of {total:?} items since version {version}");

      let done = match total {
        Some(total) => start as u64 >= total,
        None => fetched < PAGE_SIZE,
      };
      if done || fetched == 0 {
        break;
      }
    }

    debug!(
      "{} items changed since version {version} (library at {})",
      batch.items.len(),
      batch.library_version
    );
    Ok(batch)
  }

  async fn find_pdf(&self, item_key: &str) -> Result<Option<PathBuf>> {
    let Some(storage_dir) = &self.storage_dir else {
      debug!("No storage directory configured; cannot locate PDF of {item_key}");
      return Ok(None);
    };

    let response = self.get(self.url(&format!("items/{item_key}/children"))?).await?;
    let children: Vec<RemoteItem> = response.json().await.map_err(|e| self.network_error(e))?;

    for child in children.iter().filter(|c| {
      c.data.item_type == "attachment" && c.data.content_type == "application/pdf"
    }) {
      let attachment_dir = storage_dir.join(&child.key);
      if let Some(pdf) = first_pdf_in(&attachment_dir) {
        return Ok(Some(pdf));
      }
      trace!("No PDF in {}", attachment_dir.display());
    }
    Ok(None)
  }

  async fn upload_note(&self, item_key: &str, html: &str) -> Result<()> {
    let note = serde_json::json!([{
      "itemType": "note",
      "parentItem": item_key,
      "note": html,
      "tags": [{ "tag": NOTE_TAG }],
    }]);

    let response = self
      .client
      .post(self.url("items")?)
      .json(&note)
      .send()
      .await
      .map_err(|e| PapyrusError::RemoteSync(self.network_error(e).to_string()))?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      let detail: String = body.chars().take(200).collect();
      return Err(PapyrusError::RemoteSync(format!("HTTP {status}: {detail}")));
    }

    // Zotero answers 200 even when individual objects are rejected.
    let body: serde_json::Value =
      response.json().await.map_err(|e| PapyrusError::RemoteSync(e.to_string()))?;
    let failure = body.get("failed").and_then(|f| f.as_object()).and_then(|f| f.values().next());
    if let Some(failure) = failure {
      let message = failure.get("message").and_then(|m| m.as_str()).unwrap_or("unknown error");
      return Err(PapyrusError::RemoteSync(format!("note for {item_key} rejected: {message}")));
    }

    info!("Uploaded note to {item_key}");
    Ok(())
  }
}

/// First `*.pdf` file (case-insensitive) in `dir`, by name.
fn first_pdf_in(dir: &Path) -> Option<PathBuf> {
  let mut pdfs: Vec<PathBuf> = std::fs::read_dir(dir)
    .ok()?
    .filter_map(|entry| entry.ok().map(|e| e.path()))
    .filter(|path| {
      path.is_file()
        && path.extension().is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case("pdf"))
    })
    .collect();
  pdfs.sort();
  pdfs.into_iter().next()
}

/// Renders an analysis as the HTML body of a reference-manager note.
pub fn note_html(analysis: &Analysis) -> String {
  let mut html = String::new();

  html.push_str("<h2>Key Claims</h2>");
  html.push_str(&list_html(&analysis.key_claims));

  html.push_str("<h2>Method</h2>");
  html.push_str(&format!("<p>{}</p>", escape_html(&analysis.method)));

  html.push_str("<h2>Findings</h2>");
  let findings: Vec<String> = analysis
    .findings
    .iter()
    .map(|f| NUMBERED.replace(f, "").into_owned())
    .collect();
  html.push_str(&list_html(&findings));

  html.push_str("<h2>Excerpts</h2>");
  for block in analysis.excerpts.split("\n\n").map(str::trim).filter(|b| !b.is_empty()) {
    html.push_str(&format!("<p>{}</p>", escape_html(block).replace('\n', "<br>")));
  }
  html
}

/// `<ul>` of the non-empty items.
fn list_html(items: &[String]) -> String {
  let items: String = items
    .iter()
    .filter(|item| !item.trim().is_empty())
    .map(|item| format!("<li>{}</li>", escape_html(item)))
    .collect();
  if items.is_empty() {
    String::new()
  } else {
    format!("<ul>{items}</ul>")
  }
}

/// Escapes text for inclusion in HTML.
fn escape_html(text: &str) -> String {
  text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
