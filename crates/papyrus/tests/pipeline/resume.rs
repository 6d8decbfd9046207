use super::*;

#[tokio::test]
async fn test_only_the_missing_stage_runs_again() {
  let harness = Harness::new();
  harness.add_pdf("paper.pdf", "Half Done");
  harness.analyzer.fail_analysis.store(true, Ordering::SeqCst);

  let report = harness.run_batch().await;
  assert_eq!(report.partial, 1);
  let store = harness.store();
  let record = store.records().next().unwrap();
  assert_eq!(record.stage(false), Stage::BiblioDone);
  assert_eq!(record.title(), Some("Half Done"));
  assert_eq!(record.last_error.as_deref(), Some("Request timed out after 120s"));

  harness.analyzer.fail_analysis.store(false, Ordering::SeqCst);
  let report = harness.run_batch().await;
  assert_eq!(report.published, 1);
  assert_eq!(harness.biblio_calls(), 1);
  assert_eq!(harness.analysis_calls(), 2);
  assert_eq!(harness.notes().len(), 1);
}

#[tokio::test]
async fn test_resumes_from_a_ledger_left_by_a_killed_run() {
  let harness = Harness::new();
  let pdf = harness.add_pdf("paper.pdf", "Interrupted");

  // What a run killed right after Stage 1 leaves behind.
  let mut store = harness.store();
  let mut record = store.get_or_create(&Identity::from_bytes(&std::fs::read(&pdf).unwrap()));
  record.source_path = Some(pdf.clone());
  record.set_biblio(Biblio { title: "Interrupted".into(), year: Some(2020), ..Default::default() });
  store.upsert(record);
  store.save().unwrap();
  std::fs::write(harness.pdf_dir.path().join(".tmpAbC123"), b"{\"version\": 1, \"rec").unwrap();

  let report = harness.run_batch().await;
  assert_eq!(report.published, 1);
  assert_eq!(harness.biblio_calls(), 0);
  assert_eq!(harness.analysis_calls(), 1);
  assert!(harness.notes()[0].ends_with("@2020_Interrupted.md"));
}

#[traced_test]
#[tokio::test]
async fn test_failed_remote_write_is_repaired_alone() {
  let harness = Harness::new();
  let pdf = harness.add_pdf("remote.pdf", "ignored");
  harness.remote.pdfs.lock().unwrap().insert("ABCD1234".into(), pdf);
  harness.remote.fail_uploads.store(true, Ordering::SeqCst);

  let item = remote_item("ABCD1234", 3, "Synced Both Ways");
  let mut source = ListSource(VecDeque::from([Candidate::Remote(item)]));
  let report = harness.orchestrator(true).run(&mut source, &CancelFlag::new()).await.unwrap();
  assert_eq!(report.partial, 1);

  let identity = Identity::from_remote("ABCD1234");
  let store = harness.store();
  let record = store.get(&identity).unwrap();
  assert_eq!(record.stage(true), Stage::AnalysisDone);
  assert!(record.markdown_written);
  assert!(!record.remote_note_written);
  assert_eq!(record.last_error.as_deref(), Some("Remote sync failed: HTTP 503"));
  assert_eq!(harness.notes().len(), 1);
  assert!(logs_contain("Remote note upload failed"));

  harness.remote.fail_uploads.store(false, Ordering::SeqCst);
  let mut gaps = GapFill::new(true);
  let report = harness.orchestrator(true).run(&mut gaps, &CancelFlag::new()).await.unwrap();
  assert_eq!(report.candidates, 1);
  assert_eq!(report.published, 1);

  assert_eq!(harness.remote.note_count(), 1);
  assert_eq!(harness.notes().len(), 1);
  assert_eq!(harness.analysis_calls(), 1);
  assert_eq!(harness.extractor.calls.load(Ordering::SeqCst), 1);
  assert!(harness.store().get(&identity).unwrap().is_published(true));
}

#[tokio::test]
async fn test_gap_fill_rewrites_a_deleted_note() {
  let harness = Harness::new();
  harness.add_pdf("paper.pdf", "Deleted Note");
  assert_eq!(harness.run_batch().await.published, 1);

  // Forget the write, as `papyrus reset --to analysis` does.
  let mut store = harness.store();
  let identity = store.records().next().unwrap().identity.clone();
  std::fs::remove_file(&harness.notes()[0]).unwrap();
  store.reset(&identity, Stage::AnalysisDone).unwrap();
  store.save().unwrap();

  let mut gaps = GapFill::new(false);
  let report = harness.orchestrator(false).run(&mut gaps, &CancelFlag::new()).await.unwrap();
  assert_eq!(report.published, 1);
  assert_eq!(harness.notes().len(), 1);
  assert_eq!(harness.analysis_calls(), 1);
}
