//! Module for rewinding ledger records.

use super::*;

#[derive(Args, Clone)]
pub struct ResetOptions {
  /// Identity of the record, as shown by `papyrus status`
  pub identity: Identity,

  /// Stage to rerun from: new, biblio, analysis
  #[arg(long, default_value = "new")]
  pub to: Stage,
}

/// Function for the [`Commands::Reset`] in the CLI.
pub fn reset(cli: &Cli, options: ResetOptions) -> Result<()> {
  let ResetOptions { identity, to } = options;
  let config = cli.load_config()?;
  let mut store = RecordStore::load(config.store_path())?;

  let Some(record) = store.get(&identity) else {
    let message = format!("{identity} is not in the ledger at {}", store.path().display());
    return Err(PapyrusError::InvalidState(message).into());
  };
  cli.reply(ResponseContent::Record(record, config.remote_sync()));

  if !cli.confirm(&format!("Rewind {identity} so it runs from {to} again?"))? {
    cli.reply(ResponseContent::Info("Leaving the record unchanged"));
    return Ok(());
  }

  store.reset(&identity, to)?;
  store.save()?;
  cli.reply(ResponseContent::Success(&format!("{identity} will run from {to} on the next pass")));
  Ok(())
}
