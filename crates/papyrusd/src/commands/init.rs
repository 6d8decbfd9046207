//! Module for writing a fresh configuration file.

use super::*;

#[derive(Args, Clone)]
pub struct InitOptions {
  /// Directory holding the PDFs to ingest
  #[arg(long)]
  pub pdf_dir:      Option<PathBuf>,
  /// Directory the markdown notes are written to
  #[arg(long)]
  pub markdown_dir: Option<PathBuf>,
}

/// Function for the [`Commands::Init`] in the CLI.
pub fn init(cli: &Cli, options: InitOptions) -> Result<()> {
  let InitOptions { pdf_dir, markdown_dir } = options;
  let path = cli.config_path();

  if path.exists()
    && !cli.confirm(&format!(
      "A configuration already exists at {}. Do you want to overwrite it?",
      path.display()
    ))?
  {
    cli.reply(ResponseContent::Info("Keeping the existing configuration"));
    return Ok(());
  }

  let mut config = Config::default();
  if let Some(dir) = pdf_dir {
    config.pdf_dir = dir;
  } else if !cli.confirm(&format!(
    "Would you like to use the default directory {} for your PDFs?",
    config.pdf_dir.display()
  ))? {
    cli.reply(ResponseContent::Info("Please pass your PDF directory using --pdf-dir"));
    return Ok(());
  }

  if let Some(dir) = markdown_dir {
    config.markdown_dir = dir;
  } else if !cli.confirm(&format!(
    "Would you like to write notes to the default directory {}?",
    config.markdown_dir.display()
  ))? {
    cli.reply(ResponseContent::Info("Please pass your notes directory using --markdown-dir"));
    return Ok(());
  }

  std::fs::create_dir_all(&config.pdf_dir)?;
  std::fs::create_dir_all(&config.markdown_dir)?;
  config.save(&path)?;

  cli.reply(ResponseContent::Success(&format!(
    "Created configuration at {}\nPDF directory: {}\nMarkdown directory: {}\nLedger: {}",
    path.display(),
    config.pdf_dir.display(),
    config.markdown_dir.display(),
    config.store_path().display(),
  )));
  cli.reply(ResponseContent::Info(
    "Set GEMINI_API_KEY before running. Add ZOTERO_LIBRARY_ID and ZOTERO_API_KEY to use `poll`.",
  ));
  Ok(())
}
