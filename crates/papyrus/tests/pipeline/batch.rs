use super::*;

#[traced_test]
#[tokio::test]
async fn test_one_new_pdf_is_published() -> TestResult<()> {
  let harness = Harness::new();
  let pdf = harness.add_pdf("ledgers.pdf", "Resumable Ledgers");

  let report = harness.run_batch().await;
  assert_eq!(report.candidates, 1);
  assert_eq!(report.published, 1);

  let store = harness.store();
  assert_eq!(store.len(), 1);
  let record = store.get(&Identity::from_bytes(&std::fs::read(&pdf)?)).unwrap();
  assert_eq!(record.stage(false), Stage::Published);
  assert_eq!(record.source_path.as_deref(), Some(pdf.as_path()));
  assert!(record.last_error.is_none());

  let notes = harness.notes();
  assert_eq!(notes.len(), 1);
  assert_eq!(record.markdown_path.as_ref(), Some(&notes[0]));
  assert!(notes[0].ends_with("@2021_Resumable-Ledgers.md"));
  let note = std::fs::read_to_string(&notes[0])?;
  assert!(note.contains("About Resumable Ledgers."));
  assert!(logs_contain("Stage 1 done: Resumable Ledgers"));
  Ok(())
}

#[tokio::test]
async fn test_second_run_is_a_no_op() -> TestResult<()> {
  let harness = Harness::new();
  harness.add_pdf("a.pdf", "First Paper");
  harness.add_pdf("b.pdf", "Second Paper");

  assert_eq!(harness.run_batch().await.published, 2);
  let ledger = std::fs::read(harness.store_path())?;
  let modified = std::fs::metadata(harness.store_path())?.modified()?;

  let report = harness.run_batch().await;
  assert_eq!(report.candidates, 0);
  assert_eq!(std::fs::read(harness.store_path())?, ledger);
  assert_eq!(std::fs::metadata(harness.store_path())?.modified()?, modified);

  assert_eq!(harness.biblio_calls(), 2);
  assert_eq!(harness.analysis_calls(), 2);
  assert_eq!(harness.notes().len(), 2);
  Ok(())
}

#[tokio::test]
async fn test_renamed_copy_is_the_same_paper() -> TestResult<()> {
  let harness = Harness::new();
  let original = harness.add_pdf("paper.pdf", "Content Addressed");
  assert_eq!(harness.run_batch().await.published, 1);

  std::fs::copy(&original, harness.pdf_dir.path().join("paper (1).PDF"))?;
  let report = harness.run_batch().await;
  assert_eq!(report.candidates, 0);
  assert_eq!(harness.store().len(), 1);
  assert_eq!(harness.notes().len(), 1);
  Ok(())
}

#[traced_test]
#[tokio::test]
async fn test_failures_are_recorded_and_the_run_continues() {
  let harness = Harness::new();
  harness.add_pdf("a.pdf", "First Paper");
  harness.add_pdf("b.pdf", "Second Paper");
  harness.analyzer.fail_biblio.store(true, Ordering::SeqCst);

  let report = harness.run_batch().await;
  assert_eq!(report.candidates, 2);
  assert_eq!(report.failed, 2);

  let store = harness.store();
  for record in store.records() {
    assert_eq!(record.stage(false), Stage::New);
    assert_eq!(record.attempts, 1);
    assert_eq!(
      record.last_error.as_deref(),
      Some("API error: fake-lite is rate limited (HTTP 429)")
    );
  }
  assert!(harness.notes().is_empty());
  assert!(logs_contain("Giving up on"));

  // The next run retries both.
  harness.analyzer.fail_biblio.store(false, Ordering::SeqCst);
  let report = harness.run_batch().await;
  assert_eq!(report.published, 2);
  assert!(harness.store().records().all(|record| record.last_error.is_none()));
}

#[tokio::test]
async fn test_theses_skip_the_model() {
  let harness = Harness {
    extractor: Arc::new(FakeExtractor { page_count: 120, ..Default::default() }),
    ..Harness::new()
  };
  harness.add_pdf("long_dissertation.pdf", "A Very Long Document");

  let report = harness.run_batch().await;
  assert_eq!(report.published, 1);
  assert_eq!(harness.biblio_calls(), 0);
  assert_eq!(harness.analysis_calls(), 0);

  let store = harness.store();
  let record = store.records().next().unwrap();
  assert_eq!(record.title(), Some("long dissertation"));
  assert_eq!(record.analysis().unwrap().origin, AnalysisOrigin::Heuristic);
  assert!(harness.notes()[0].ends_with("@_long-dissertation.md"));
}

#[tokio::test]
async fn test_existing_note_is_not_overwritten() -> TestResult<()> {
  let harness = Harness::new();
  harness.add_pdf("paper.pdf", "Hand Written");
  let existing = harness.notes_dir.path().join("@2021_Hand-Written.md");
  std::fs::write(&existing, "my own notes")?;

  let report = harness.run_batch().await;
  assert_eq!(report.published, 1);
  assert_eq!(std::fs::read_to_string(&existing)?, "my own notes");

  let store = harness.store();
  let record = store.records().next().unwrap();
  assert!(record.markdown_written);
  assert_eq!(record.markdown_path.as_ref(), Some(&existing));
  Ok(())
}
