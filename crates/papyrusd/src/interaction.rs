//! Terminal output and prompts.

use dialoguer::Confirm;
use papyrus::pipeline::RunReport;

use super::*;

/// Prefix for information messages
pub static INFO_PREFIX: &str = "ℹ ";
/// Prefix for work in progress
pub static WORKING_PREFIX: &str = "» ";
/// Prefix for success messages
pub static SUCCESS_PREFIX: &str = "✓ ";
/// Prefix for error messages
pub static ERROR_PREFIX: &str = "✗ ";
/// Prefix for warning messages
pub static WARNING_PREFIX: &str = "! ";
/// Prefix for user prompts
pub static PROMPT_PREFIX: &str = "❯ ";
/// Branch of a tree listing
pub static ITEM_PREFIX: &str = "├─";
/// Last branch of a tree listing
pub static LAST_ITEM_PREFIX: &str = "└─";

/// Something to show the user.
#[derive(Debug)]
pub enum ResponseContent<'a> {
  /// A completed action.
  Success(&'a str),
  /// A neutral message.
  Info(&'a str),
  /// An action that is starting.
  Working(&'a str),
  /// Something the user should look at.
  Warning(&'a str),
  /// A failed command.
  Error(&'a PapyrusdError),
  /// The outcome of a pipeline run.
  Report(&'a RunReport),
  /// One ledger entry, with whether note sync is on.
  Record(&'a PaperRecord, bool),
}

/// How commands talk to the user.
pub trait UserInteraction {
  /// Asks a yes/no question.
  fn confirm(&self, message: &str) -> Result<bool>;

  /// Prints `content`.
  fn reply(&self, content: ResponseContent);
}

impl UserInteraction for Cli {
  fn confirm(&self, message: &str) -> Result<bool> {
    if self.accept_defaults {
      return Ok(true);
    }
    Ok(
      Confirm::new()
        .with_prompt(format!("{}{message}", style(PROMPT_PREFIX).cyan()))
        .default(false)
        .interact()?,
    )
  }

  fn reply(&self, content: ResponseContent) {
    match content {
      ResponseContent::Success(message) => {
        println!("{} {}", style(SUCCESS_PREFIX).green(), style(message).green())
      },
      ResponseContent::Info(message) => println!("{} {message}", style(INFO_PREFIX).cyan()),
      ResponseContent::Working(message) => println!("{} {message}", style(WORKING_PREFIX).blue()),
      ResponseContent::Warning(message) => {
        println!("{} {}", style(WARNING_PREFIX).yellow(), style(message).yellow())
      },
      ResponseContent::Error(error) => {
        eprintln!("{} {}", style(ERROR_PREFIX).red(), style(error).red())
      },
      ResponseContent::Report(report) => {
        if report.failed + report.partial > 0 {
          println!("{} {report}", style(WARNING_PREFIX).yellow());
        } else {
          println!("{} {report}", style(SUCCESS_PREFIX).green());
        }
      },
      ResponseContent::Record(record, remote_sync) => print_record(record, remote_sync),
    }
  }
}

/// Prints one ledger entry as a small tree.
fn print_record(record: &PaperRecord, remote_sync: bool) {
  println!(
    "{} {} [{}]",
    style(INFO_PREFIX).cyan(),
    style(record.title().unwrap_or("(untitled)")).bold(),
    style(record.stage(remote_sync)).yellow()
  );

  let mut lines = vec![format!("Identity: {}", record.identity)];
  if let Some(path) = &record.source_path {
    lines.push(format!("Source: {}", path.display()));
  }
  if let Some(path) = &record.markdown_path {
    lines.push(format!("Note: {}", path.display()));
  }
  if record.remote_note_required(remote_sync) {
    let state = if record.remote_note_written { "uploaded" } else { "pending" };
    lines.push(format!("Remote note: {state}"));
  }
  if let Some(error) = &record.last_error {
    lines.push(format!("Last error ({} attempts): {}", record.attempts, style(error).red()));
  }

  let last = lines.len() - 1;
  for (i, line) in lines.iter().enumerate() {
    let branch = if i == last { LAST_ITEM_PREFIX } else { ITEM_PREFIX };
    println!("   {} {line}", style(branch).dim());
  }
}
