// tests/db_models.rs
//
// Storage-level behavior against a real SQLite file:
// - dedup constraints on (source, url) and on the content hash
// - pending queue ordering, claim and requeue
// - per-status counts and source upsert

mod common;

use common::{insert_note, insert_source, test_db, LONG_TEXT};
use technote_digest::db::models::{
    ContentType, DataSource, JobExecution, JobRunStatus, LogLevel, NewDataSource,
    NewProcessingLog, NewSummary, NewTechnicalNote, NoteFilter, NoteStatus, Operation,
    ProcessedSummary, ProcessingLog, ScrapingConfig, TechnicalNote,
};

#[tokio::test]
async fn duplicate_hash_and_url_are_rejected() {
    let db = test_db().await;
    let src = insert_source(&db.pool, "Portal A").await;
    let note = insert_note(&db.pool, src.id, "a", LONG_TEXT).await;
    assert_eq!(note.status, NoteStatus::Pending);

    assert!(TechnicalNote::exists_by_url(&db.pool, src.id, &note.original_url).await.unwrap());
    assert!(TechnicalNote::exists_by_hash(&db.pool, "hash-a").await.unwrap());
    assert!(!TechnicalNote::exists_by_hash(&db.pool, "hash-b").await.unwrap());

    // Same hash under another URL.
    let err = TechnicalNote::create(
        &db.pool,
        &NewTechnicalNote {
            source_id: src.id,
            title: "copy".into(),
            original_url: "https://example.org/other.pdf".into(),
            document_hash: "hash-a".into(),
            publication_date: None,
            file_size: None,
            content_preview: String::new(),
        },
    )
    .await
    .expect_err("duplicate hash must fail");
    assert!(err.is_unique_violation(), "unexpected error: {err}");

    // Same URL, new hash.
    let err = TechnicalNote::create(
        &db.pool,
        &NewTechnicalNote {
            source_id: src.id,
            title: "copy".into(),
            original_url: note.original_url.clone(),
            document_hash: "hash-z".into(),
            publication_date: None,
            file_size: None,
            content_preview: String::new(),
        },
    )
    .await
    .expect_err("duplicate url must fail");
    assert!(err.is_unique_violation());
}

#[tokio::test]
async fn claim_is_exclusive_and_requeue_only_from_error() {
    let db = test_db().await;
    let src = insert_source(&db.pool, "Portal A").await;
    let note = insert_note(&db.pool, src.id, "a", LONG_TEXT).await;

    assert!(TechnicalNote::claim(&db.pool, note.id).await.unwrap());
    assert!(!TechnicalNote::claim(&db.pool, note.id).await.unwrap(), "second claim must lose");
    assert!(!TechnicalNote::requeue(&db.pool, note.id).await.unwrap(), "processing is not requeueable");

    TechnicalNote::set_status(&db.pool, note.id, NoteStatus::Error).await.unwrap();
    assert!(TechnicalNote::requeue(&db.pool, note.id).await.unwrap());
    let reloaded = TechnicalNote::find_by_id(&db.pool, note.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, NoteStatus::Pending);
}

#[tokio::test]
async fn pending_queue_is_oldest_first_and_filterable() {
    let db = test_db().await;
    let a = insert_source(&db.pool, "Portal A").await;
    let b = insert_source(&db.pool, "Portal B").await;
    let n1 = insert_note(&db.pool, a.id, "1", LONG_TEXT).await;
    let n2 = insert_note(&db.pool, a.id, "2", LONG_TEXT).await;
    let n3 = insert_note(&db.pool, b.id, "3", LONG_TEXT).await;
    TechnicalNote::set_status(&db.pool, n2.id, NoteStatus::Processed).await.unwrap();

    let pending = TechnicalNote::find_pending(&db.pool, None, None).await.unwrap();
    let ids: Vec<i64> = pending.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![n1.id, n3.id]);

    let limited = TechnicalNote::find_pending(&db.pool, None, Some(1)).await.unwrap();
    assert_eq!(limited.len(), 1);

    let only_b = TechnicalNote::list(
        &db.pool,
        &NoteFilter {
            source_id: Some(b.id),
            ..NoteFilter::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(only_b.len(), 1);
    assert_eq!(only_b[0].id, n3.id);

    let counts = TechnicalNote::count_by_status(&db.pool, Some(a.id)).await.unwrap();
    assert_eq!(counts.get("pending"), Some(&1));
    assert_eq!(counts.get("processed"), Some(&1));
}

#[tokio::test]
async fn source_upsert_keeps_id_and_updates_fields() {
    let db = test_db().await;
    let first = insert_source(&db.pool, "Portal A").await;
    let mut changed = NewDataSource {
        name: "Portal A".into(),
        url: "https://example.org/outra-lista".into(),
        content_type: ContentType::Pdf,
        description: String::new(),
        is_active: false,
        scraping_config: ScrapingConfig::default(),
    };
    let again = DataSource::upsert(&db.pool, &changed).await.unwrap();
    assert_eq!(first.id, again.id);
    assert!(!again.is_active);
    assert_eq!(again.url, "https://example.org/outra-lista");

    changed.is_active = true;
    let ensured = DataSource::ensure(&db.pool, &changed).await.unwrap();
    assert!(!ensured.is_active, "ensure leaves an existing row alone");
    assert_eq!(DataSource::list(&db.pool).await.unwrap().len(), 1);
    assert!(DataSource::find_by_name(&db.pool, "nope").await.unwrap().is_none());
}

#[tokio::test]
async fn one_summary_per_note_and_logs_in_order() {
    let db = test_db().await;
    let src = insert_source(&db.pool, "Portal A").await;
    let note = insert_note(&db.pool, src.id, "a", LONG_TEXT).await;

    let new = NewSummary {
        technical_note_id: note.id,
        summary: "short".into(),
        key_points: vec!["k".into()],
        changes_identified: vec![],
        topics: vec!["nfe".into()],
        model_used: "gpt-test".into(),
        processing_time: Some(0.1),
        tokens_used: Some(12),
        confidence_score: Some(0.9),
    };
    let s = ProcessedSummary::create(&db.pool, &new).await.unwrap();
    assert_eq!(s.key_points.0, vec!["k".to_string()]);
    assert!(ProcessedSummary::create(&db.pool, &new).await.unwrap_err().is_unique_violation());
    assert!(ProcessedSummary::exists_for_note(&db.pool, note.id).await.unwrap());
    assert_eq!(ProcessedSummary::count(&db.pool).await.unwrap(), 1);
    assert_eq!(
        ProcessedSummary::count_by_model(&db.pool).await.unwrap().get("gpt-test"),
        Some(&1)
    );

    for msg in ["first", "second"] {
        ProcessingLog::create(
            &db.pool,
            &NewProcessingLog::new(note.id, Operation::Processing, LogLevel::Info, msg),
        )
        .await
        .unwrap();
    }
    let logs = ProcessingLog::list_for_note(&db.pool, note.id).await.unwrap();
    let msgs: Vec<&str> = logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(msgs, vec!["second", "first"], "newest first");
}

#[tokio::test]
async fn job_executions_are_recorded() {
    let db = test_db().await;
    let id = JobExecution::start(&db.pool, "technote_scraping", "Scrape").await.unwrap();
    JobExecution::finish(
        &db.pool,
        id,
        JobRunStatus::Success,
        1.5,
        &serde_json::json!({ "new_items": 2 }),
        None,
    )
    .await
    .unwrap();
    JobExecution::start(&db.pool, "technote_processing", "Process").await.unwrap();

    let all = JobExecution::recent(&db.pool, None, 10).await.unwrap();
    assert_eq!(all.len(), 2);
    let scraping = JobExecution::recent(&db.pool, Some("technote_scraping"), 10).await.unwrap();
    assert_eq!(scraping.len(), 1);
    assert_eq!(scraping[0].status, JobRunStatus::Success);
    assert_eq!(scraping[0].duration_seconds, Some(1.5));
}
