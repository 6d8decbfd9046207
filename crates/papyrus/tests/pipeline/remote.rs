use papyrus::source::RemotePoll;

use super::*;

#[traced_test]
#[tokio::test]
async fn test_item_without_local_pdf_stops_at_biblio() {
  let harness = Harness::new();
  let pdf = harness.add_pdf("synced.pdf", "ignored");
  harness.remote.pdfs.lock().unwrap().insert("SYNCED".into(), pdf);

  let mut source = ListSource(VecDeque::from([
    Candidate::Remote(remote_item("NOPDF", 1, "Cloud Only")),
    Candidate::Remote(remote_item("SYNCED", 2, "On Disk")),
  ]));
  let report = harness.orchestrator(true).run(&mut source, &CancelFlag::new()).await.unwrap();
  assert_eq!(report.candidates, 2);
  assert_eq!(report.failed, 1);
  assert_eq!(report.published, 1);

  let store = harness.store();
  let stalled = store.get(&Identity::from_remote("NOPDF")).unwrap();
  assert_eq!(stalled.stage(true), Stage::BiblioDone);
  assert_eq!(stalled.remote_id.as_deref(), Some("NOPDF"));
  assert_eq!(stalled.last_error.as_deref(), Some("No local PDF available for remote:NOPDF"));
  let biblio = stalled.biblio().unwrap();
  assert_eq!(biblio.year, Some(2019));
  assert_eq!(biblio.venue.as_deref(), Some("Journal of Ledgers"));

  // Remote items bring their own citation.
  assert_eq!(harness.biblio_calls(), 0);
  assert_eq!(harness.remote.note_count(), 1);
  assert_eq!(harness.remote.notes.lock().unwrap()[0].0, "SYNCED");
}

#[tokio::test]
async fn test_poll_processes_and_commits_the_batch() {
  let harness = Harness::new();
  for (key, title) in [("FIRST", "First Remote"), ("SECOND", "Second Remote")] {
    let pdf = harness.add_pdf(&format!("{key}.pdf"), title);
    harness.remote.pdfs.lock().unwrap().insert(key.into(), pdf);
  }
  *harness.remote.items.lock().unwrap() =
    vec![remote_item("FIRST", 3, "First Remote"), remote_item("SECOND", 5, "Second Remote")];

  let cancel = CancelFlag::new();
  let stop = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(500)).await;
    stop.cancel();
  });

  let mut poll = RemotePoll::new(harness.remote.clone(), Duration::from_millis(20));
  let report = harness.orchestrator(true).run(&mut poll, &cancel).await.unwrap();
  assert!(report.cancelled);
  assert_eq!(report.candidates, 2);
  assert_eq!(report.published, 2);

  let store = harness.store();
  assert_eq!(store.checkpoint().library_version, 5);
  assert!(store.checkpoint().committed_at.is_some());
  assert_eq!(harness.remote.note_count(), 2);

  // A restart picks up from the checkpoint and finds nothing new.
  let cancel = CancelFlag::new();
  let stop = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(200)).await;
    stop.cancel();
  });
  let mut poll = RemotePoll::new(harness.remote.clone(), Duration::from_millis(20));
  let report = harness.orchestrator(true).run(&mut poll, &cancel).await.unwrap();
  assert_eq!(report.candidates, 0);
  assert_eq!(harness.remote.note_count(), 2);
}

#[tokio::test]
async fn test_same_title_under_another_key_is_skipped() {
  let harness = Harness::new();
  let pdf = harness.add_pdf("paper.pdf", "Already Known");
  assert_eq!(harness.run_batch().await.published, 1);
  harness.remote.pdfs.lock().unwrap().insert("DUPE".into(), pdf);
  *harness.remote.items.lock().unwrap() = vec![remote_item("DUPE", 9, "Already  Known")];

  let cancel = CancelFlag::new();
  let stop = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(200)).await;
    stop.cancel();
  });
  let mut poll = RemotePoll::new(harness.remote.clone(), Duration::from_millis(20));
  let report = harness.orchestrator(true).run(&mut poll, &cancel).await.unwrap();

  assert_eq!(report.candidates, 0);
  assert_eq!(harness.store().len(), 1);
  assert_eq!(harness.store().checkpoint().library_version, 9);
}

#[traced_test]
#[tokio::test]
async fn test_unfinished_item_is_analysed_once_per_poll_run() {
  let harness = Harness::new();
  let pdf = harness.add_pdf("stalled.pdf", "Stalled Analysis");
  harness.remote.pdfs.lock().unwrap().insert("STALLED".into(), pdf);
  harness.analyzer.fail_analysis.store(true, Ordering::SeqCst);

  // Left at Stage 1 by an earlier run; the library still lists it as changed.
  let mut store = harness.store();
  let mut record = store.get_or_create(&Identity::from_remote("STALLED"));
  record.set_biblio(Biblio { title: "Stalled Analysis".into(), ..Default::default() });
  store.upsert(record);
  store.save().unwrap();
  *harness.remote.items.lock().unwrap() = vec![remote_item("STALLED", 3, "Stalled Analysis")];

  let cancel = CancelFlag::new();
  let stop = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(300)).await;
    stop.cancel();
  });
  let mut poll = RemotePoll::new(harness.remote.clone(), Duration::from_millis(20));
  let report = harness.orchestrator(true).run(&mut poll, &cancel).await.unwrap();

  assert_eq!(report.candidates, 1);
  assert_eq!(report.failed, 1);
  assert_eq!(harness.analysis_calls(), 1);
  assert!(logs_contain("already handed out in this run"));

  let store = harness.store();
  let record = store.get(&Identity::from_remote("STALLED")).unwrap();
  assert_eq!(record.attempts, 1);
  assert_eq!(record.stage(true), Stage::BiblioDone);
  assert_eq!(store.checkpoint().library_version, 3);
}

#[tokio::test]
async fn test_published_item_gets_missing_citation_fields() {
  let harness = Harness::new();
  let pdf = harness.add_pdf("cited.pdf", "ignored");
  harness.remote.pdfs.lock().unwrap().insert("CITED".into(), pdf);

  let item = remote_item("CITED", 2, "Cited Later");
  let mut source = ListSource(VecDeque::from([Candidate::Remote(item.clone())]));
  let report = harness.orchestrator(true).run(&mut source, &CancelFlag::new()).await.unwrap();
  assert_eq!(report.published, 1);
  let note = harness.notes()[0].clone();
  assert!(std::fs::read_to_string(&note).unwrap().contains("- **DOI**: \n"));

  // The library later gains a DOI and page range.
  let mut updated = item;
  updated.version = 4;
  updated.data.doi = "10.1000/cited".into();
  updated.data.pages = "1-9".into();
  *harness.remote.items.lock().unwrap() = vec![updated];

  let cancel = CancelFlag::new();
  let stop = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(300)).await;
    stop.cancel();
  });
  let mut poll = RemotePoll::new(harness.remote.clone(), Duration::from_millis(20));
  let report = harness.orchestrator(true).run(&mut poll, &cancel).await.unwrap();
  assert_eq!(report.candidates, 1);
  assert_eq!(report.refreshed, 1);

  let content = std::fs::read_to_string(&note).unwrap();
  assert!(content.contains("doi: 10.1000/cited\n"));
  assert!(content.contains("- **DOI**: 10.1000/cited\n"));
  assert!(content.contains("- **Pages**: 1-9\n"));
  assert!(content.contains("## Key Claims\n- Ledgers make runs resumable.\n"));
  assert_eq!(harness.notes().len(), 1);

  let store = harness.store();
  let record = store.get(&Identity::from_remote("CITED")).unwrap();
  assert_eq!(record.biblio().unwrap().doi.as_deref(), Some("10.1000/cited"));
  assert!(record.is_published(true));
  assert_eq!(store.checkpoint().library_version, 4);

  // No model call and no second note in the library.
  assert_eq!(harness.analysis_calls(), 1);
  assert_eq!(harness.remote.note_count(), 1);
}
