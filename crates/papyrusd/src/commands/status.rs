//! Module for inspecting the ledger.

use std::collections::BTreeMap;

use chrono::Local;

use super::*;

#[derive(Args, Clone)]
pub struct StatusOptions {
  /// List every incomplete record, not only the ones that failed
  #[arg(long)]
  pub all: bool,
}

/// Function for the [`Commands::Status`] in the CLI.
pub fn status(cli: &Cli, options: StatusOptions) -> Result<()> {
  let config = cli.load_config()?;
  let remote_sync = config.remote_sync();
  let store = RecordStore::load(config.store_path())?;

  cli.reply(ResponseContent::Info(&format!(
    "Ledger: {} ({} records)",
    store.path().display(),
    store.len()
  )));

  let mut stages = BTreeMap::<Stage, usize>::new();
  for record in store.records() {
    *stages.entry(record.stage(remote_sync)).or_default() += 1;
  }
  for (stage, count) in &stages {
    println!("   {} {stage}: {count}", style(ITEM_PREFIX).dim());
  }

  if config.remote.is_some() {
    let checkpoint = store.checkpoint();
    let committed = checkpoint.committed_at.map_or_else(
      || "never".to_string(),
      |at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
    );
    cli.reply(ResponseContent::Info(&format!(
      "Zotero library version {} (committed {committed})",
      checkpoint.library_version
    )));
  }

  let listed: Vec<&PaperRecord> = store
    .records()
    .filter(|record| {
      record.last_error.is_some() || (options.all && !record.is_published(remote_sync))
    })
    .collect();
  if listed.is_empty() {
    if !store.is_empty() {
      cli.reply(ResponseContent::Success("Nothing needs attention"));
    }
    return Ok(());
  }

  cli.reply(ResponseContent::Warning(&format!("{} records need attention", listed.len())));
  for record in listed {
    cli.reply(ResponseContent::Record(record, remote_sync));
  }
  Ok(())
}
