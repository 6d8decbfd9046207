//! Configuration loading.
//!
//! Configuration lives in a TOML file, by default `config.toml` under the platform
//! configuration directory (e.g. `~/.config/papyrus/config.toml`). Environment variables
//! override file values, which keeps API keys out of the file:
//!
//! | Variable | Field |
//! |---|---|
//! | `PAPYRUS_PDF_DIR` | `pdf_dir` |
//! | `PAPYRUS_MARKDOWN_DIR` | `markdown_dir` |
//! | `PAPYRUS_STORE_PATH` | `store_path` |
//! | `GEMINI_API_KEY` | `llm.api_key` |
//! | `GEMINI_MODEL` | `llm.analysis_model` |
//! | `GEMINI_MODEL_LITE` | `llm.biblio_model` |
//! | `GEMINI_TIMEOUT` | `llm.timeout_secs` |
//! | `GEMINI_REQUEST_DELAY` | `llm.request_delay_secs` |
//! | `ZOTERO_LIBRARY_ID` | `remote.library_id` |
//! | `ZOTERO_API_KEY` | `remote.api_key` |
//! | `ZOTERO_STORAGE` | `remote.storage_dir` |
//! | `ZOTERO_POLL_INTERVAL` | `remote.poll_interval_secs` |
//! | `ZOTERO_NOTE_SYNC` | `remote.note_sync` |
//!
//! # Examples
//!
//! ```
//! use papyrus::config::Config;
//!
//! let config = Config::from_toml_str(
//!   r#"
//!   pdf_dir = "/papers"
//!   markdown_dir = "/vault/literature"
//!
//!   [llm]
//!   request_delay_secs = 10
//!   "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.store_path(), std::path::Path::new("/papers/.papyrus-ledger.json"));
//! assert_eq!(config.llm.request_delay_secs, 10);
//! assert_eq!(config.llm.timeout_secs, 120);
//! ```

use super::*;
use crate::pipeline::PipelineSettings;

/// File name of the ledger when `store_path` is not configured.
pub const DEFAULT_STORE_FILE: &str = ".papyrus-ledger.json";

/// Comment block written above a generated configuration file.
const CONFIG_HEADER: &str = "\
# papyrus configuration
#
# pdf_dir       directory scanned and watched for new PDFs
# markdown_dir  directory the markdown notes are written to
# store_path    ledger location (default: {pdf_dir}/.papyrus-ledger.json)
# skip_theses   use PDF metadata instead of the LLM for theses and dissertations
#
# Secrets are best supplied through GEMINI_API_KEY and ZOTERO_API_KEY.
# Add a [remote] section (library_id, api_key, storage_dir) to enable Zotero polling.

";

/// Which pipeline mode a configuration is validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
  /// One pass over the PDF directory.
  Batch,
  /// Watch the PDF directory for new files.
  Watch,
  /// Poll the reference manager for new items.
  Poll,
  /// Finish every incomplete record in the ledger.
  GapFill,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
  /// Directory holding the PDFs.
  pub pdf_dir:      PathBuf,
  /// Directory the markdown notes are written to.
  pub markdown_dir: PathBuf,
  /// Ledger location; defaults to [`DEFAULT_STORE_FILE`] inside `pdf_dir`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub store_path:   Option<PathBuf>,
  /// Whether theses bypass the LLM.
  #[serde(default = "default_true")]
  pub skip_theses:  bool,
  /// LLM settings.
  #[serde(default)]
  pub llm:          LlmConfig,
  /// Directory watch settings.
  #[serde(default)]
  pub watch:        WatchConfig,
  /// Reference-manager settings; remote polling and note sync are off without them.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub remote:       Option<RemoteConfig>,
}

/// `[llm]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
  /// Gemini API key.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub api_key:            Option<String>,
  /// API host.
  pub host:               String,
  /// Model used for the analysis stage.
  pub analysis_model:     String,
  /// Model used for the bibliographic stage.
  pub biblio_model:       String,
  /// Deadline of a single call.
  pub timeout_secs:       u64,
  /// Minimum pause between two calls.
  pub request_delay_secs: u64,
  /// Upper bound on generated tokens.
  pub max_output_tokens:  u32,
}

impl Default for LlmConfig {
  fn default() -> Self {
    Self {
      api_key:            None,
      host:               crate::llm::DEFAULT_HOST.to_string(),
      analysis_model:     "gemini-2.5-flash".to_string(),
      biblio_model:       "gemini-2.5-flash-lite".to_string(),
      timeout_secs:       120,
      request_delay_secs: 4,
      max_output_tokens:  8192,
    }
  }
}

/// `[watch]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
  /// Seconds between two directory scans.
  pub interval_secs: u64,
  /// Seconds a new file's size must stay unchanged before it is picked up.
  pub settle_secs:   u64,
}

impl Default for WatchConfig {
  fn default() -> Self { Self { interval_secs: 5, settle_secs: 2 } }
}

/// `[remote]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
  /// Zotero user library id.
  pub library_id:         String,
  /// Zotero API key.
  #[serde(default)]
  pub api_key:            String,
  /// Local Zotero storage directory holding attachment folders.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub storage_dir:        Option<PathBuf>,
  /// API base URL.
  #[serde(default = "default_remote_base_url")]
  pub base_url:           String,
  /// Seconds between two polls.
  #[serde(default = "default_poll_interval")]
  pub poll_interval_secs: u64,
  /// Whether analyses are posted back as item notes.
  #[serde(default = "default_true")]
  pub note_sync:          bool,
  /// Deadline of a single API call.
  #[serde(default = "default_remote_timeout")]
  pub timeout_secs:       u64,
}

impl RemoteConfig {
  /// A section with the given credentials and default settings.
  pub fn new(library_id: &str, api_key: &str) -> Self {
    Self {
      library_id:         library_id.to_string(),
      api_key:            api_key.to_string(),
      storage_dir:        None,
      base_url:           default_remote_base_url(),
      poll_interval_secs: default_poll_interval(),
      note_sync:          true,
      timeout_secs:       default_remote_timeout(),
    }
  }
}

fn default_true() -> bool { true }

fn default_remote_base_url() -> String { "https://api.zotero.org".to_string() }

fn default_poll_interval() -> u64 { 60 }

fn default_remote_timeout() -> u64 { 30 }

impl Default for Config {
  fn default() -> Self {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    Self {
      pdf_dir:      home.join("Papers"),
      markdown_dir: home.join("Notes").join("literature"),
      store_path:   None,
      skip_theses:  true,
      llm:          LlmConfig::default(),
      watch:        WatchConfig::default(),
      remote:       None,
    }
  }
}

impl Config {
  /// Default location of the configuration file.
  pub fn default_path() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("papyrus").join("config.toml")
  }

  /// Loads the file at `path` and applies environment overrides.
  ///
  /// # Errors
  ///
  /// Returns [`PapyrusError::Config`] if the file does not exist and
  /// [`PapyrusError::TomlDe`] if it is not valid configuration.
  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let contents = match std::fs::read_to_string(path) {
      Ok(contents) => contents,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        return Err(PapyrusError::Config(format!(
          "No configuration at {}. Run `papyrus init` to create one.",
          path.display()
        )));
      },
      Err(e) => return Err(e.into()),
    };
    let mut config = Self::from_toml_str(&contents)?;
    config.apply_env(|key| std::env::var(key).ok())?;
    debug!("Loaded configuration from {}", path.display());
    Ok(config)
  }

  /// Parses configuration from TOML without consulting the environment.
  pub fn from_toml_str(contents: &str) -> Result<Self> { Ok(toml::from_str(contents)?) }

  /// Serialises the configuration with an explanatory header.
  pub fn to_toml_string(&self) -> Result<String> {
    Ok(format!("{CONFIG_HEADER}{}", toml::to_string_pretty(self)?))
  }

  /// Writes the configuration to `path`, creating parent directories.
  pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, self.to_toml_string()?)?;
    Ok(())
  }

  /// Applies overrides looked up through `var`.
  pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
    let var = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(dir) = var("PAPYRUS_PDF_DIR") {
      self.pdf_dir = dir.into();
    }
    if let Some(dir) = var("PAPYRUS_MARKDOWN_DIR") {
      self.markdown_dir = dir.into();
    }
    if let Some(path) = var("PAPYRUS_STORE_PATH") {
      self.store_path = Some(path.into());
    }

    if let Some(key) = var("GEMINI_API_KEY") {
      self.llm.api_key = Some(key);
    }
    if let Some(model) = var("GEMINI_MODEL") {
      self.llm.analysis_model = model;
    }
    if let Some(model) = var("GEMINI_MODEL_LITE") {
      self.llm.biblio_model = model;
    }
    if let Some(secs) = var("GEMINI_TIMEOUT") {
      self.llm.timeout_secs = parse_number("GEMINI_TIMEOUT", &secs)?;
    }
    if let Some(secs) = var("GEMINI_REQUEST_DELAY") {
      self.llm.request_delay_secs = parse_number("GEMINI_REQUEST_DELAY", &secs)?;
    }

    let library_id = var("ZOTERO_LIBRARY_ID");
    let api_key = var("ZOTERO_API_KEY");
    if self.remote.is_none() {
      if let (Some(library_id), Some(api_key)) = (&library_id, &api_key) {
        self.remote = Some(RemoteConfig::new(library_id, api_key));
      }
    }
    if let Some(remote) = self.remote.as_mut() {
      if let Some(library_id) = library_id {
        remote.library_id = library_id;
      }
      if let Some(api_key) = api_key {
        remote.api_key = api_key;
      }
      if let Some(dir) = var("ZOTERO_STORAGE") {
        remote.storage_dir = Some(dir.into());
      }
      if let Some(secs) = var("ZOTERO_POLL_INTERVAL") {
        remote.poll_interval_secs = parse_number("ZOTERO_POLL_INTERVAL", &secs)?;
      }
      if let Some(flag) = var("ZOTERO_NOTE_SYNC") {
        remote.note_sync = parse_flag("ZOTERO_NOTE_SYNC", &flag)?;
      }
    }
    Ok(())
  }

  /// Location of the ledger.
  pub fn store_path(&self) -> PathBuf {
    self.store_path.clone().unwrap_or_else(|| self.pdf_dir.join(DEFAULT_STORE_FILE))
  }

  /// Whether analyses are posted back to the reference manager.
  pub fn remote_sync(&self) -> bool { self.remote.as_ref().is_some_and(|remote| remote.note_sync) }

  /// Settings the orchestrator needs from this configuration.
  pub fn pipeline_settings(&self) -> PipelineSettings {
    PipelineSettings {
      request_delay: Duration::from_secs(self.llm.request_delay_secs),
      remote_sync:   self.remote_sync(),
      skip_theses:   self.skip_theses,
    }
  }

  /// Checks that everything `mode` needs is configured.
  pub fn validate(&self, mode: RunMode) -> Result<()> {
    if matches!(mode, RunMode::Batch | RunMode::Watch) && !self.pdf_dir.is_dir() {
      return Err(PapyrusError::Config(format!(
        "PDF directory {} does not exist",
        self.pdf_dir.display()
      )));
    }
    if self.markdown_dir.exists() && !self.markdown_dir.is_dir() {
      return Err(PapyrusError::Config(format!(
        "Markdown path {} is not a directory",
        self.markdown_dir.display()
      )));
    }
    if self.llm.api_key.as_deref().map_or(true, |key| key.trim().is_empty()) {
      return Err(PapyrusError::Config(
        "No Gemini API key configured (set llm.api_key or GEMINI_API_KEY)".into(),
      ));
    }
    if self.watch.interval_secs == 0 {
      return Err(PapyrusError::Config("watch.interval_secs must be at least 1".into()));
    }

    match (&self.remote, mode) {
      (None, RunMode::Poll) => Err(PapyrusError::Config(
        "Polling needs a [remote] section (or ZOTERO_LIBRARY_ID and ZOTERO_API_KEY)".into(),
      )),
      (Some(remote), _) if remote.library_id.trim().is_empty() || remote.api_key.is_empty() =>
        Err(PapyrusError::Config("remote.library_id and remote.api_key are required".into())),
      (Some(remote), RunMode::Poll) if remote.poll_interval_secs == 0 =>
        Err(PapyrusError::Config("remote.poll_interval_secs must be at least 1".into())),
      _ => Ok(()),
    }
  }
}

/// Parses a numeric environment override.
fn parse_number(key: &str, value: &str) -> Result<u64> {
  value.parse().map_err(|_| PapyrusError::Config(format!("{key} must be a number, got '{value}'")))
}

/// Parses a boolean environment override.
fn parse_flag(key: &str, value: &str) -> Result<bool> {
  match value.to_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" => Ok(false),
    _ => Err(PapyrusError::Config(format!("{key} must be true or false, got '{value}'"))),
  }
}
