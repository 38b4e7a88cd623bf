// tests/processor.rs
//
// Note processing with the deterministic mock summarizer:
// - pending -> processed with one summary and a log entry
// - short previews fail validation and land in `error`
// - notes that already have a summary are skipped, and their status repaired
// - two batches over the same notes never summarize a note twice
// - impact analysis needs a summary and is written to the log

mod common;

use std::sync::Arc;

use common::{insert_note, insert_source, test_db, LONG_TEXT};
use technote_digest::db::models::{
    LogLevel, NewSummary, NoteStatus, ProcessedSummary, ProcessingLog, TechnicalNote,
};
use technote_digest::processor::{NoteOutcome, Processor};
use technote_digest::summarize::{DisabledSummarizer, MockSummarizer};
use technote_digest::DigestError;

#[tokio::test]
async fn pending_note_gets_summary_and_status() {
    let db = test_db().await;
    let src = insert_source(&db.pool, "Portal A").await;
    let note = insert_note(&db.pool, src.id, "a", LONG_TEXT).await;
    let processor = Processor::new(db.pool.clone(), Arc::new(MockSummarizer));

    let result = processor.process_technical_note(&note).await;
    assert!(result.is_processed(), "unexpected outcome: {:?}", result.outcome);
    let NoteOutcome::Processed { summary_id, model_used, .. } = &result.outcome else {
        unreachable!()
    };
    assert_eq!(model_used, "mock");

    let summary = ProcessedSummary::find_by_note(&db.pool, note.id).await.unwrap().unwrap();
    assert_eq!(summary.id, *summary_id);
    assert!(summary.summary.starts_with("Nota Tecnica 2024"));
    assert!(summary.summary.ends_with("(mock)"));
    assert_eq!(summary.key_points.0.len(), 3);
    assert!(summary.tokens_used.unwrap_or(0) > 0);

    let reloaded = TechnicalNote::find_by_id(&db.pool, note.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, NoteStatus::Processed);
    let logs = ProcessingLog::list_for_note(&db.pool, note.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].level, LogLevel::Info);

    // A second pass is a no-op.
    let again = processor.process_technical_note(&reloaded).await;
    assert!(matches!(again.outcome, NoteOutcome::Skipped { .. }));
    assert_eq!(ProcessedSummary::count(&db.pool).await.unwrap(), 1);
}

#[tokio::test]
async fn short_content_marks_note_as_error() {
    let db = test_db().await;
    let src = insert_source(&db.pool, "Portal A").await;
    let note = insert_note(&db.pool, src.id, "short", "too short").await;
    let processor = Processor::new(db.pool.clone(), Arc::new(MockSummarizer));

    let result = processor.process_technical_note(&note).await;
    let NoteOutcome::Failed { error } = &result.outcome else {
        panic!("expected failure, got {:?}", result.outcome);
    };
    assert!(error.contains("insufficient content"), "got: {error}");

    let reloaded = TechnicalNote::find_by_id(&db.pool, note.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, NoteStatus::Error);
    assert!(!ProcessedSummary::exists_for_note(&db.pool, note.id).await.unwrap());
    let logs = ProcessingLog::list_for_note(&db.pool, note.id).await.unwrap();
    assert_eq!(logs[0].level, LogLevel::Error);
}

#[tokio::test]
async fn summarizer_failure_is_recorded_not_raised() {
    let db = test_db().await;
    let src = insert_source(&db.pool, "Portal A").await;
    let note = insert_note(&db.pool, src.id, "a", LONG_TEXT).await;
    let processor = Processor::new(db.pool.clone(), Arc::new(DisabledSummarizer));

    let stats = processor.process_pending(None).await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.errors, 1);
    let reloaded = TechnicalNote::find_by_id(&db.pool, note.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, NoteStatus::Error);

    // Requeued notes are picked up again.
    assert!(TechnicalNote::requeue(&db.pool, note.id).await.unwrap());
    let retry = Processor::new(db.pool.clone(), Arc::new(MockSummarizer));
    let stats = retry.process_pending(None).await.unwrap();
    assert_eq!(stats.processed, 1);
}

#[tokio::test]
async fn batch_respects_limit_and_reports_stats() {
    let db = test_db().await;
    let src = insert_source(&db.pool, "Portal A").await;
    for key in ["1", "2", "3"] {
        insert_note(&db.pool, src.id, key, LONG_TEXT).await;
    }
    insert_note(&db.pool, src.id, "4", "tiny").await;
    let processor = Processor::new(db.pool.clone(), Arc::new(MockSummarizer));

    let first = processor.process_pending(Some(2)).await.unwrap();
    assert_eq!((first.total, first.processed, first.errors), (2, 2, 0));
    assert_eq!(first.results.len(), 2);

    let rest = processor.process_pending(None).await.unwrap();
    assert_eq!((rest.total, rest.processed, rest.errors), (2, 1, 1));

    let stats = processor.processing_stats().await.unwrap();
    assert_eq!(stats.processed_count, 3);
    assert_eq!(stats.error_count, 1);
    assert_eq!(stats.pending_count, 0);
    assert_eq!(stats.total_summaries, 3);
    assert_eq!(stats.model_usage.get("mock"), Some(&3));
}

#[tokio::test]
async fn impact_analysis_needs_a_summary() {
    let db = test_db().await;
    let src = insert_source(&db.pool, "Portal A").await;
    let note = insert_note(&db.pool, src.id, "a", LONG_TEXT).await;
    let processor = Processor::new(db.pool.clone(), Arc::new(MockSummarizer));

    let err = processor.analyze_impact(note.id).await.unwrap_err();
    assert!(matches!(err, DigestError::Validation(_)), "got: {err}");
    let err = processor.analyze_impact(9_999).await.unwrap_err();
    assert!(matches!(err, DigestError::NotFound(_)), "got: {err}");

    processor.process_technical_note(&note).await;
    let analysis = processor.analyze_impact(note.id).await.unwrap();
    assert_eq!(analysis.impact_level, "low");

    let logs = ProcessingLog::list_for_note(&db.pool, note.id).await.unwrap();
    assert_eq!(logs[0].message, "impact analysis generated");
    assert_eq!(logs[0].details.0["analysis"]["impact_level"], "low");
}

#[tokio::test]
async fn summarized_note_stuck_in_queue_is_marked_processed() {
    let db = test_db().await;
    let src = insert_source(&db.pool, "Portal A").await;
    let note = insert_note(&db.pool, src.id, "a", LONG_TEXT).await;
    ProcessedSummary::create(
        &db.pool,
        &NewSummary {
            technical_note_id: note.id,
            summary: "Resumo ja gravado.".into(),
            key_points: vec![],
            changes_identified: vec![],
            topics: vec![],
            model_used: "mock".into(),
            processing_time: None,
            tokens_used: None,
            confidence_score: None,
        },
    )
    .await
    .unwrap();
    // Summary stored but the status update was lost, then an operator retried.
    TechnicalNote::set_status(&db.pool, note.id, NoteStatus::Error).await.unwrap();
    assert!(TechnicalNote::requeue(&db.pool, note.id).await.unwrap());

    let processor = Processor::new(db.pool.clone(), Arc::new(MockSummarizer));
    let stats = processor.process_pending(None).await.unwrap();
    assert_eq!((stats.total, stats.processed, stats.skipped), (1, 0, 1));

    let stored = TechnicalNote::find_by_id(&db.pool, note.id).await.unwrap().unwrap();
    assert_eq!(stored.status, NoteStatus::Processed);
    assert!(TechnicalNote::find_pending(&db.pool, None, None).await.unwrap().is_empty());
    assert_eq!(ProcessedSummary::count(&db.pool).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_batches_summarize_each_note_once() {
    let db = test_db().await;
    let src = insert_source(&db.pool, "Portal A").await;
    for key in ["1", "2", "3", "4", "5"] {
        insert_note(&db.pool, src.id, key, LONG_TEXT).await;
    }
    let notes = TechnicalNote::find_pending(&db.pool, None, None).await.unwrap();
    assert_eq!(notes.len(), 5);

    let a = Processor::new(db.pool.clone(), Arc::new(MockSummarizer));
    let b = Processor::new(db.pool.clone(), Arc::new(MockSummarizer));
    let (left, right) = tokio::join!(a.process_batch(&notes), b.process_batch(&notes));

    assert_eq!(left.processed + right.processed, 5);
    assert_eq!(left.skipped + right.skipped, 5);
    assert_eq!(left.errors + right.errors, 0);
    assert_eq!(ProcessedSummary::count(&db.pool).await.unwrap(), 5);
    for note in &notes {
        let stored = TechnicalNote::find_by_id(&db.pool, note.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NoteStatus::Processed);
    }
}
