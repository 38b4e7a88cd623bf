// tests/common/mod.rs
//
// Shared fixtures: a throwaway SQLite file per test and an AppContext
// wired to the mock summarizer.
#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use technote_digest::config::{AppConfig, HttpConfig, SourceConfig};
use technote_digest::db::{
    self,
    models::{ContentType, DataSource, NewDataSource, NewTechnicalNote, ScrapingConfig, TechnicalNote},
};
use technote_digest::jobs::AppContext;
use technote_digest::summarize::MockSummarizer;
use sqlx::SqlitePool;

/// Keeps the temp dir alive for as long as the pool is used.
pub struct TestDb {
    pub pool: SqlitePool,
    _dir: TempDir,
}

pub async fn test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let pool = db::connect(&url).await.expect("open test db");
    TestDb { pool, _dir: dir }
}

/// HTTP settings that keep wiremock tests fast.
pub fn fast_http() -> HttpConfig {
    HttpConfig {
        delay_ms: 0,
        max_retries: 1,
        timeout_secs: 5,
        backoff_base_ms: 1,
        ..HttpConfig::default()
    }
}

/// An HTML source whose listing links end in `.html`.
pub fn html_source(name: &str, listing_url: &str) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        url: listing_url.to_string(),
        content_type: ContentType::Html,
        description: "test portal".to_string(),
        is_active: true,
        scraping: ScrapingConfig {
            selectors: vec!["a.doc".to_string()],
            base_url: None,
            min_title_len: 5,
        },
    }
}

pub fn test_config(sources: Vec<SourceConfig>) -> AppConfig {
    AppConfig {
        http: fast_http(),
        sources,
        ..AppConfig::default()
    }
}

pub fn context(pool: SqlitePool, config: AppConfig) -> AppContext {
    AppContext::new(pool, config, Arc::new(MockSummarizer))
}

pub async fn insert_source(pool: &SqlitePool, name: &str) -> DataSource {
    DataSource::upsert(
        pool,
        &NewDataSource {
            name: name.to_string(),
            url: "https://example.org/list".to_string(),
            content_type: ContentType::Pdf,
            description: String::new(),
            is_active: true,
            scraping_config: ScrapingConfig::default(),
        },
    )
    .await
    .expect("insert source")
}

pub const LONG_TEXT: &str = "Nota Tecnica 2024.001 altera o leiaute da NF-e.\n\
    Novos campos no grupo de tributacao.\n\
    Vigencia a partir de 01/07/2024 em producao.";

pub async fn insert_note(pool: &SqlitePool, source_id: i64, key: &str, preview: &str) -> TechnicalNote {
    TechnicalNote::create(
        pool,
        &NewTechnicalNote {
            source_id,
            title: format!("Nota Tecnica {key}"),
            original_url: format!("https://example.org/docs/{key}.pdf"),
            document_hash: format!("hash-{key}"),
            publication_date: None,
            file_size: Some(preview.len() as i64),
            content_preview: preview.to_string(),
        },
    )
    .await
    .expect("insert note")
}
