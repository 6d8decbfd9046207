//! Module for the commands that run the ingestion pipeline.

use std::{sync::Arc, time::Duration};

use papyrus::{
  llm::GeminiAnalyzer,
  markdown::MarkdownWriter,
  pdf::PdfExtractor,
  pipeline::Orchestrator,
  remote::{RemoteLibrary, ZoteroClient},
  source::{BatchScan, CandidateSource, DirectoryWatch, GapFill, RemotePoll},
};

use super::*;

/// Function for [`Commands::Run`], [`Commands::Watch`], [`Commands::Poll`] and
/// [`Commands::GapFill`] in the CLI.
///
/// Ctrl-C lets the paper in progress finish, then the ledger is saved and a report printed.
pub async fn pipeline(cli: &Cli, mode: RunMode) -> Result<()> {
  let config = cli.load_config()?;
  config.validate(mode)?;

  let store = RecordStore::load(config.store_path())?;
  let remote = match &config.remote {
    Some(remote) => Some(Arc::new(ZoteroClient::from_config(remote)?) as Arc<dyn RemoteLibrary>),
    None => None,
  };

  let mut builder = Orchestrator::builder()
    .with_store(store)
    .with_extractor(Arc::new(PdfExtractor::new()))
    .with_analyzer(Arc::new(GeminiAnalyzer::from_config(&config.llm)?))
    .with_writer(MarkdownWriter::new(&config.markdown_dir))
    .with_settings(config.pipeline_settings());
  if let Some(remote) = &remote {
    builder = builder.with_remote(Arc::clone(remote));
  }
  let mut orchestrator = builder.build()?;

  let mut source: Box<dyn CandidateSource> = match mode {
    RunMode::Batch => Box::new(BatchScan::new(&config.pdf_dir)),
    RunMode::Watch => Box::new(DirectoryWatch::new(
      &config.pdf_dir,
      Duration::from_secs(config.watch.interval_secs),
      Duration::from_secs(config.watch.settle_secs),
    )),
    RunMode::Poll => {
      let (Some(remote), Some(settings)) = (remote, &config.remote) else {
        return Err(PapyrusError::Config("Polling needs a [remote] section".into()).into());
      };
      let interval = Duration::from_secs(settings.poll_interval_secs);
      Box::new(RemotePoll::new(remote, interval).with_note_sync(config.remote_sync()))
    },
    RunMode::GapFill => Box::new(GapFill::new(config.remote_sync())),
  };

  let cancel = CancelFlag::new();
  let handler = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("Interrupted, finishing the current paper before exiting");
      handler.cancel();
    }
  });

  match mode {
    RunMode::Watch =>
      cli.reply(ResponseContent::Working(&format!("Watching {}", config.pdf_dir.display()))),
    RunMode::Poll => cli.reply(ResponseContent::Working("Polling the Zotero library")),
    _ => {},
  }

  let report = orchestrator.run(source.as_mut(), &cancel).await?;
  cli.reply(ResponseContent::Report(&report));
  if report.cancelled {
    cli.reply(ResponseContent::Info(&format!(
      "Ledger saved to {}",
      orchestrator.store().path().display()
    )));
  }
  Ok(())
}
