//! Client for the Gemini `generateContent` API and the [`Analyzer`] seam.
//!
//! [`GeminiRequest`] is a small builder around one REST call. It returns the raw text of the
//! first candidate. [`GeminiAnalyzer`] wraps it into the two pipeline stages: bibliographic
//! extraction on a light model and deep analysis on a stronger one.
//!
//! Failures are reported, never retried here: HTTP 429 and any other non-success status become
//! [`PapyrusError::Api`] and a missed deadline becomes [`PapyrusError::Timeout`]. The
//! orchestrator records the error and the paper is tried again on the next run.
//!
//! # Examples
//!
//! ```no_run
//! use papyrus::llm::GeminiRequest;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let text = GeminiRequest::new()
//!   .with_model("gemini-2.5-flash-lite")
//!   .with_api_key("...")
//!   .with_message("What is the capital of France?")
//!   .send()
//!   .await?;
//! println!("{text}");
//! # Ok(())
//! # }
//! ```

use serde_json::Value;

use super::*;
use crate::{config::LlmConfig, paper::split_authors, prompt::*};

/// Public Gemini API endpoint.
pub const DEFAULT_HOST: &str = "https://generativelanguage.googleapis.com";

/// Header carrying the API key. The key never goes into the URL.
const API_KEY_HEADER: &str = "x-goog-api-key";

lazy_static! {
  static ref FENCED_JSON: Regex = Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap();
  static ref BARE_JSON: Regex = Regex::new(r"(?s)\{.*\}").unwrap();
}

/// One piece of message text.
#[derive(Debug, Serialize, Deserialize)]
struct Part {
  /// The text.
  #[serde(default)]
  text: String,
}

/// A message in the request or a candidate's content in the response.
#[derive(Debug, Serialize, Deserialize)]
struct Content {
  /// Message parts, in order.
  #[serde(default)]
  parts: Vec<Part>,
}

/// Sampling parameters.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
  /// Sampling temperature.
  temperature:       f64,
  /// Upper bound on generated tokens.
  max_output_tokens: u32,
}

impl Default for GenerationConfig {
  fn default() -> Self { Self { temperature: 0.3, max_output_tokens: 8192 } }
}

/// Request builder for a single `generateContent` call.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
  /// Messages sent to the model.
  contents:          Vec<Content>,
  /// Sampling parameters.
  generation_config: GenerationConfig,
  /// API host. Defaults to [`DEFAULT_HOST`].
  #[serde(skip)]
  host:              Option<Url>,
  /// Model identifier.
  #[serde(skip)]
  model:             Option<String>,
  /// API key, sent in the `x-goog-api-key` header.
  #[serde(skip)]
  api_key:           Option<String>,
  /// Deadline for the whole call.
  #[serde(skip)]
  timeout:           Option<Duration>,
}

/// Response body of `generateContent`.
#[derive(Debug, Deserialize)]
struct GeminiResponse {
  /// Generated candidates, best first.
  #[serde(default)]
  candidates: Vec<Candidate>,
}

/// One generated candidate.
#[derive(Debug, Deserialize)]
struct Candidate {
  /// Generated content; missing when the candidate was blocked.
  content: Option<Content>,
}

impl GeminiResponse {
  /// Text of the first part of the first candidate.
  fn into_text(self) -> Option<String> {
    let content = self.candidates.into_iter().next()?.content?;
    content.parts.into_iter().next().map(|part| part.text).filter(|text| !text.is_empty())
  }
}

impl GeminiRequest {
  /// Creates a new request with default sampling parameters.
  pub fn new() -> Self { Self::default() }

  /// Sets the API host.
  pub fn with_host(mut self, host: &str) -> Self {
    self.host = Url::parse(host).ok();
    if self.host.is_none() {
      warn!("Ignoring invalid LLM host '{host}'");
    }
    self
  }

  /// Sets the model to use.
  pub fn with_model(mut self, model: &str) -> Self {
    self.model.replace(model.to_string());
    self
  }

  /// Sets the API key.
  pub fn with_api_key(mut self, api_key: &str) -> Self {
    self.api_key.replace(api_key.to_string());
    self
  }

  /// Adds a user message.
  pub fn with_message(mut self, content: &str) -> Self {
    self.contents.push(Content { parts: vec![Part { text: content.to_string() }] });
    self
  }

  /// Sets the deadline for the whole call.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout.replace(timeout);
    self
  }

  /// Sets the upper bound on generated tokens.
  pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
    self.generation_config.max_output_tokens = max_output_tokens;
    self
  }

  /// Sends the request and returns the generated text.
  ///
  /// # Errors
  ///
  /// This function will return an error if:
  /// - No model or no message was set
  /// - The call exceeds its deadline
  /// - The API answers with a non-success status (including rate limiting)
  /// - The response carries no text
  pub async fn send(&self) -> Result<String> {
    let Some(model) = self.model.as_deref() else {
      return Err(PapyrusError::LLMMissingModel);
    };
    if self.contents.is_empty() {
      return Err(PapyrusError::LLMMissingMessage);
    }

    let url = self.endpoint(model)?;

    let mut client = reqwest::Client::builder();
    if let Some(timeout) = self.timeout {
      client = client.timeout(timeout);
    }
    let timed_out = |e: reqwest::Error| match (e.is_timeout(), self.timeout) {
      (true, Some(timeout)) => PapyrusError::Timeout { secs: timeout.as_secs() },
      _ => PapyrusError::Network(e.without_url()),
    };

    debug!("Calling {model}");
    let mut request = client.build()?.post(url).json(self);
    if let Some(api_key) = &self.api_key {
      request = request.header(API_KEY_HEADER, api_key);
    }
    let response = request.send().await.map_err(timed_out)?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
      return Err(PapyrusError::Api(format!("{model} is rate limited (HTTP 429)")));
    }
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      let detail: String = body.chars().take(200).collect();
      return Err(PapyrusError::Api(format!("{model} returned HTTP {status}: {detail}")));
    }

    let body: GeminiResponse = response.json().await.map_err(timed_out)?;
    body
      .into_text()
      .ok_or_else(|| PapyrusError::Api(format!("{model} returned no candidate text")))
  }

  /// `{host}/v1beta/models/{model}:generateContent`
  fn endpoint(&self, model: &str) -> Result<Url> {
    let host = match &self.host {
      Some(host) => host.as_str().trim_end_matches('/').to_string(),
      None => DEFAULT_HOST.to_string(),
    };
    let url = format!("{host}/v1beta/models/{model}:generateContent");
    Url::parse(&url).map_err(|e| PapyrusError::Config(format!("invalid LLM endpoint {url}: {e}")))
  }
}

/// Produces the two stage outputs from paper text.
#[async_trait]
pub trait Analyzer: Send + Sync {
  /// Stage 1: bibliographic data from the start of the paper.
  async fn extract_biblio(&self, text: &str) -> Result<Biblio>;

  /// Stage 2: deep analysis of the paper, given its bibliographic data.
  async fn analyze(&self, text: &str, biblio: &Biblio) -> Result<Analysis>;
}

/// [`Analyzer`] backed by Gemini.
#[derive(Debug, Clone)]
pub struct GeminiAnalyzer {
  /// API host.
  host:              String,
  /// API key.
  api_key:           String,
  /// Model for Stage 1.
  biblio_model:      String,
  /// Model for Stage 2.
  analysis_model:    String,
  /// Per-call deadline.
  timeout:           Duration,
  /// Upper bound on generated tokens.
  max_output_tokens: u32,
}

impl GeminiAnalyzer {
  /// Builds an analyzer from the `[llm]` configuration section.
  ///
  /// # Errors
  ///
  /// Returns [`PapyrusError::Config`] when no API key is configured.
  pub fn from_config(config: &LlmConfig) -> Result<Self> {
    let api_key = config.api_key.clone().filter(|key| !key.trim().is_empty()).ok_or_else(|| {
      PapyrusError::Config("No Gemini API key configured (set GEMINI_API_KEY)".into())
    })?;
    Ok(Self {
      host: config.host.clone(),
      api_key,
      biblio_model: config.biblio_model.clone(),
      analysis_model: config.analysis_model.clone(),
      timeout: Duration::from_secs(config.timeout_secs),
      max_output_tokens: config.max_output_tokens,
    })
  }

  /// Sends `prompt` to `model` and parses the JSON object in the reply.
  async fn ask(&self, model: &str, prompt: &str) -> Result<Value> {
    let reply = GeminiRequest::new()
      .with_host(&self.host)
      .with_model(model)
      .with_api_key(&self.api_key)
      .with_timeout(self.timeout)
      .with_max_output_tokens(self.max_output_tokens)
      .with_message(prompt)
      .send()
      .await?;
    parse_json_response(&reply)
      .ok_or_else(|| PapyrusError::Api(format!("{model} did not return a JSON object")))
  }
}

/// A field the model may return as one string or as a list of strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrList {
  /// A JSON array.
  List(Vec<String>),
  /// A single string, possibly with one item per line.
  One(String),
}

impl Default for StringOrList {
  fn default() -> Self { Self::List(Vec::new()) }
}

impl StringOrList {
  /// Items, with list markers and blanks removed.
  fn into_items(self) -> Vec<String> {
    let items = match self {
      Self::List(items) => items,
      Self::One(text) => text.lines().map(String::from).collect(),
    };
    items
      .into_iter()
      .map(|item| item.trim().trim_start_matches(['-', '*']).trim().to_string())
      .filter(|item| !item.is_empty())
      .collect()
  }
}

/// Stage 1 reply.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BiblioReply {
  /// Paper title.
  title:   String,
  /// Authors, as a list or a single string.
  #[serde(alias = "author")]
  authors: Option<StringOrList>,
  /// Year as a number or a string.
  year:    Value,
  /// Venue.
  journal: String,
}

/// Stage 2 reply.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnalysisReply {
  /// Abstract.
  #[serde(rename = "abstract")]
  abstract_text: String,
  /// Key claims.
  key_claims:    StringOrList,
  /// Method.
  method:        String,
  /// Findings.
  findings:      StringOrList,
  /// Excerpts markdown.
  excerpts:      String,
  /// Tags.
  tags:          StringOrList,
}

#[async_trait]
impl Analyzer for GeminiAnalyzer {
  async fn extract_biblio(&self, text: &str) -> Result<Biblio> {
    let value = self.ask(&self.biblio_model, &biblio_prompt(text)).await?;
    let reply: BiblioReply = serde_json::from_value(value)?;

    let authors = match reply.authors {
      Some(StringOrList::One(line)) => split_authors(&line),
      Some(list) => list.into_items(),
      None => Vec::new(),
    };
    let year = match &reply.year {
      Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
      Value::String(s) => find_year(s),
      _ => None,
    };
    let venue = Some(reply.journal.trim().to_string()).filter(|v| !v.is_empty());

    Ok(Biblio {
      title: reply.title.trim().to_string(),
      authors,
      year,
      venue,
      origin: BiblioOrigin::Model,
      ..Default::default()
    })
  }

  async fn analyze(&self, text: &str, biblio: &Biblio) -> Result<Analysis> {
    let value = self.ask(&self.analysis_model, &analysis_prompt(text, biblio)).await?;
    let reply: AnalysisReply = serde_json::from_value(value)?;

    Ok(Analysis {
      abstract_text: reply.abstract_text.trim().to_string(),
      key_claims:    reply.key_claims.into_items(),
      method:        reply.method.trim().to_string(),
      findings:      reply.findings.into_items(),
      excerpts:      reply.excerpts.trim().to_string(),
      tags:          reply.tags.into_items(),
      origin:        AnalysisOrigin::Model { model: self.analysis_model.clone() },
    })
  }
}

/// Extracts the JSON object from a model reply.
///
/// A fenced ```` ```json ```` block wins; otherwise the outermost `{...}` span is used.
pub fn parse_json_response(text: &str) -> Option<Value> {
  let candidate = FENCED_JSON
    .captures(text)
    .and_then(|caps| caps.get(1))
    .or_else(|| BARE_JSON.find(text))
    .map(|m| m.as_str())
    .unwrap_or(text);
  serde_json::from_str::<Value>(candidate).ok().filter(Value::is_object)
}
