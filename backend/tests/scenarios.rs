mod support;

use common::events::BatchEvent;
use common::jobs::BatchStatus;
use common::model::batch::BatchTotals;
use common::model::options::OutputOptions;
use docbatch_backend::error::{EngineError, SubmitError};
use std::sync::Arc;
use std::time::Duration;
use support::*;
use tempfile::TempDir;

fn totals(total: usize, completed: usize, failed: usize) -> BatchTotals {
    BatchTotals {
        total,
        completed,
        failed,
    }
}

#[tokio::test]
async fn happy_path_small() {
    let root = TempDir::new().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = engine(config(root.path()), Arc::new(StubRenderer::new()), notifier.clone());

    let accepted = engine
        .submit(submission(
            "name,email,amount\nA,a@x,1\nB,b@x,2\n",
            OutputOptions::default(),
        ))
        .await
        .unwrap();
    assert_eq!(accepted.batch.status, BatchStatus::Pending);
    assert_eq!(accepted.batch.totals, totals(2, 0, 0));

    let done = engine.wait(&accepted.batch.id).await.unwrap();
    assert_eq!(done.status, BatchStatus::Completed);
    assert_eq!(done.totals, totals(2, 2, 0));
    assert_eq!(done.progress, 100);

    let archive = done.archive_path.unwrap();
    assert_eq!(
        archive_entries(&archive),
        vec!["document_1.pdf".to_string(), "document_2.pdf".to_string()]
    );
    assert_eq!(archive_entry(&archive, "document_2.pdf"), "document for row 2");

    let terminal = notifier.terminal_for(&done.id);
    assert_eq!(terminal.len(), 1);
    match &terminal[0] {
        BatchEvent::BatchCompleted {
            archive,
            download_links,
            ..
        } => {
            assert_eq!(archive.documents, 2);
            assert_eq!(
                download_links,
                &vec![format!("http://docs.test/api/batches/{}/download", done.id)]
            );
        }
        other => panic!("unexpected terminal event {:?}", other),
    }
}

#[tokio::test]
async fn missing_required_column_creates_no_batch() {
    let root = TempDir::new().unwrap();
    let engine = engine(
        config(root.path()),
        Arc::new(StubRenderer::new()),
        Arc::new(RecordingNotifier::default()),
    );

    let err = engine
        .submit(submission("name,email\nA,a@x\n", OutputOptions::default()))
        .await
        .unwrap_err();
    match err {
        SubmitError::SchemaMismatch { missing } => assert_eq!(missing, vec!["amount".to_string()]),
        other => panic!("expected SchemaMismatch, got {:?}", other),
    }
    assert_eq!(engine.list(None, 0, 10).await.total, 0);
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn partial_failure_keeps_successful_rows_in_order() {
    let root = TempDir::new().unwrap();
    let engine = engine(
        config(root.path()),
        Arc::new(StubRenderer::new().fail_rows(&[2, 4])),
        Arc::new(RecordingNotifier::default()),
    );

    let accepted = engine
        .submit(submission(&numbered_rows(5), OutputOptions::default()))
        .await
        .unwrap();
    let done = engine.wait(&accepted.batch.id).await.unwrap();

    assert_eq!(done.status, BatchStatus::Completed);
    assert_eq!(done.totals, totals(5, 3, 2));
    assert_eq!(
        archive_entries(done.archive_path.as_ref().unwrap()),
        vec!["document_1.pdf", "document_3.pdf", "document_5.pdf"]
    );
    let rows: Vec<usize> = done.results.iter().map(|r| r.row_index).collect();
    assert_eq!(rows, vec![1, 2, 3, 4, 5]);
    assert!(done.results[1].error.as_deref().unwrap().contains("row 2 rejected"));
    assert!(done.results[1].file_path.is_none());
}

#[tokio::test]
async fn all_failures_end_failed_without_archive() {
    let root = TempDir::new().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = engine(
        config(root.path()),
        Arc::new(StubRenderer::new().fail_all()),
        notifier.clone(),
    );

    let accepted = engine
        .submit(submission(&numbered_rows(3), OutputOptions::default()))
        .await
        .unwrap();
    let id = accepted.batch.id;
    let done = engine.wait(&id).await.unwrap();

    assert_eq!(done.status, BatchStatus::Failed);
    assert_eq!(done.totals, totals(3, 0, 3));
    assert!(done.archive_path.is_none());
    assert!(done.failed_at.is_some());
    assert!(matches!(
        engine.archive_path(&id).await,
        Err(EngineError::NotReady(_))
    ));

    let terminal = notifier.terminal_for(&id);
    assert_eq!(terminal.len(), 1);
    match &terminal[0] {
        BatchEvent::BatchFailed { error_summary, .. } => {
            assert!(error_summary.starts_with("all 3 documents failed"));
        }
        other => panic!("unexpected terminal event {:?}", other),
    }
}

#[tokio::test]
async fn cancel_during_processing() {
    let root = TempDir::new().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = engine(
        config(root.path()),
        Arc::new(StubRenderer::new().delay(Duration::from_millis(20))),
        notifier.clone(),
    );

    let options = OutputOptions {
        batch_size: Some(4),
        ..OutputOptions::default()
    };
    let accepted = engine
        .submit(submission(&numbered_rows(100), options))
        .await
        .unwrap();
    let id = accepted.batch.id;

    tokio::time::sleep(Duration::from_millis(200)).await;
    engine.cancel(&id).await.unwrap();
    let done = engine.wait(&id).await.unwrap();

    assert_eq!(done.status, BatchStatus::Cancelled);
    assert!(done.totals.processed() < 100);
    assert!(done.archive_path.is_none());
    let cancelled_at = done.cancelled_at.unwrap();
    assert!(done.cancel_requested_at.unwrap() <= cancelled_at);
    assert!(done.results.iter().all(|r| r.produced_at <= cancelled_at));
    assert!(done.completed_at.is_none() && done.failed_at.is_none());
    assert!(notifier.terminal_for(&id).is_empty());

    // Nothing is appended once the batch is terminal.
    tokio::time::sleep(Duration::from_millis(60)).await;
    let later = engine.status(&id, None).await.unwrap();
    assert_eq!(later.totals, done.totals);
}

#[tokio::test]
async fn retries_recover_transient_failures() {
    let root = TempDir::new().unwrap();
    let renderer = Arc::new(StubRenderer::new().transient_failures(2));
    let engine = engine(
        config(root.path()),
        renderer.clone(),
        Arc::new(RecordingNotifier::default()),
    );

    let options = OutputOptions {
        retry_attempts: Some(3),
        ..OutputOptions::default()
    };
    let accepted = engine
        .submit(submission(&numbered_rows(4), options))
        .await
        .unwrap();
    let done = engine.wait(&accepted.batch.id).await.unwrap();

    assert_eq!(done.status, BatchStatus::Completed);
    assert_eq!(done.totals, totals(4, 4, 0));
    assert_eq!(renderer.calls().len(), 12);
}

#[tokio::test]
async fn retries_exhausted_fail_the_record() {
    let root = TempDir::new().unwrap();
    let engine = engine(
        config(root.path()),
        Arc::new(StubRenderer::new().transient_failures(3)),
        Arc::new(RecordingNotifier::default()),
    );

    let options = OutputOptions {
        retry_attempts: Some(2),
        ..OutputOptions::default()
    };
    let accepted = engine
        .submit(submission(&numbered_rows(2), options))
        .await
        .unwrap();
    let done = engine.wait(&accepted.batch.id).await.unwrap();

    assert_eq!(done.status, BatchStatus::Failed);
    assert_eq!(done.totals, totals(2, 0, 2));
}
