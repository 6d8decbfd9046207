use super::*;

mod batch;
mod remote;
mod resume;

#[tokio::test]
async fn test_cancelled_before_start() {
  let harness = Harness::new();
  harness.add_pdf("paper.pdf", "Never Processed");

  let cancel = CancelFlag::new();
  cancel.cancel();
  let mut source = BatchScan::new(harness.pdf_dir.path());
  let report = harness.orchestrator(false).run(&mut source, &cancel).await.unwrap();

  assert!(report.cancelled);
  assert_eq!(report.candidates, 0);
  assert!(!harness.store_path().exists());
}

#[tokio::test]
async fn test_unknown_ledger_entry_is_skipped() {
  let harness = Harness::new();
  let mut source =
    ListSource(VecDeque::from([Candidate::Known(Identity::from_remote("GONE"))]));
  let report =
    harness.orchestrator(false).run(&mut source, &CancelFlag::new()).await.unwrap();
  assert_eq!(report.skipped, 1);
}
