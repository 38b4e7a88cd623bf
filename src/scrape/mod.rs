// src/scrape/mod.rs
pub mod http;
pub mod listing;

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use metrics::{counter, histogram};
use reqwest::header::HeaderMap;
use scraper::Html;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::{error, info, warn};
use url::Url;

use crate::config::NFE_SOURCE_NAME;
use crate::db::models::{
    ContentType, DataSource, LogLevel, NewProcessingLog, NewTechnicalNote, NoteStatus, Operation,
    ProcessingLog, TechnicalNote,
};
use crate::error::{DigestError, Result};
use crate::extract;
use self::http::{FetchedDocument, FetchSettings, Fetcher};
use self::listing::LinkSelectorScraper;

/// One document link found on a listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingItem {
    pub title: String,
    pub url: String,
    pub publication_date: Option<NaiveDate>,
}

/// Per-site scraping behavior. Only `extract_items` is site-specific;
/// the rest has sensible defaults.
#[async_trait::async_trait]
pub trait Scraper: Send + Sync {
    fn name(&self) -> &str;

    /// Locate document links on a parsed listing page.
    fn extract_items(&self, page: &Html, page_url: &Url) -> Vec<ListingItem>;

    /// Headers added to every request of this scraper.
    fn extra_headers(&self) -> HeaderMap {
        HeaderMap::new()
    }

    /// Download one item.
    async fn fetch_content(&self, fetcher: &Fetcher, item: &ListingItem) -> Result<FetchedDocument> {
        fetcher.get(&item.url).await
    }

    /// Turn downloaded bytes into preview text. Runs on the blocking pool.
    fn extract_text(&self, kind: ContentType, bytes: &[u8], max_pages: usize) -> Result<String> {
        extract::extract_text(kind, bytes, max_pages)
    }
}

pub type SharedScraper = Arc<dyn Scraper>;

/// Scraper for a stored source: the NF-e preset by name, otherwise the source's own config.
pub fn scraper_for(source: &DataSource) -> Result<SharedScraper> {
    if source.name == NFE_SOURCE_NAME {
        return Ok(Arc::new(LinkSelectorScraper::nfe_fazenda()?));
    }
    Ok(Arc::new(LinkSelectorScraper::from_config(
        &source.name,
        &source.scraping_config,
    )?))
}

/// Fetcher carrying the scraper's extra headers.
pub fn fetcher_for(scraper: &dyn Scraper, settings: FetchSettings) -> Result<Fetcher> {
    Fetcher::with_headers(settings, scraper.extra_headers())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScrapeStats {
    pub total_found: usize,
    pub new_items: usize,
    pub duplicates_skipped: usize,
    pub errors: usize,
    /// Seconds.
    pub processing_time: f64,
}

enum ItemOutcome {
    Created(TechnicalNote),
    /// Stored in `error` status so later runs see its hash.
    Unreadable(TechnicalNote, DigestError),
    Duplicate,
}

/// Hex SHA-256 of the downloaded bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Trust the declared type unless the bytes say otherwise.
pub fn detect_kind(declared: ContentType, doc: &FetchedDocument) -> ContentType {
    if doc.bytes.starts_with(b"%PDF") {
        return ContentType::Pdf;
    }
    let ct = doc.content_type.as_deref().unwrap_or("").to_ascii_lowercase();
    if ct.starts_with("application/pdf") {
        ContentType::Pdf
    } else if ct.starts_with("text/html") || ct.starts_with("application/xhtml") {
        ContentType::Html
    } else if declared == ContentType::Pdf && ct.starts_with("text/plain") {
        ContentType::Text
    } else {
        declared
    }
}

/// Walk the listing page and store every item not seen before as a pending note.
///
/// Fails only when the listing itself cannot be fetched; per-item failures are
/// counted in `errors` and the loop moves on. A document whose text cannot be
/// extracted is still stored, in `error` status, and also counts as an error.
pub async fn scrape_new_items(
    pool: &SqlitePool,
    fetcher: &Fetcher,
    scraper: &SharedScraper,
    source: &DataSource,
    max_pdf_pages: usize,
) -> Result<ScrapeStats> {
    let t0 = Instant::now();
    let mut stats = ScrapeStats::default();
    info!(source = %source.name, url = %source.url, "scrape started");

    let page_url = Url::parse(&source.url)
        .map_err(|e| DigestError::Validation(format!("bad listing url {}: {e}", source.url)))?;
    let listing = match fetcher.get(&source.url).await {
        Ok(doc) => doc,
        Err(e) => {
            error!(source = %source.name, error = %e, "listing fetch failed");
            counter!("scrape_errors_total").increment(1);
            return Err(e);
        }
    };

    // `Html` is not Send; keep it out of any await.
    let items = {
        let page = Html::parse_document(&listing.text());
        scraper.extract_items(&page, &page_url)
    };
    stats.total_found = items.len();
    counter!("scrape_items_found_total").increment(items.len() as u64);
    info!(source = %source.name, found = items.len(), "listing parsed");

    for item in &items {
        match collect_item(pool, fetcher, scraper, source, item, max_pdf_pages).await {
            Ok(ItemOutcome::Created(note)) => {
                stats.new_items += 1;
                info!(note_id = note.id, title = %note.title, "new technical note collected");
            }
            Ok(ItemOutcome::Unreadable(note, e)) => {
                stats.errors += 1;
                warn!(note_id = note.id, url = %item.url, error = %e, "stored unreadable document");
            }
            Ok(ItemOutcome::Duplicate) => stats.duplicates_skipped += 1,
            Err(e) if e.is_unique_violation() => stats.duplicates_skipped += 1,
            Err(e) => {
                stats.errors += 1;
                error!(url = %item.url, error = %e, "item failed");
            }
        }
    }

    stats.processing_time = t0.elapsed().as_secs_f64();
    counter!("scrape_new_items_total").increment(stats.new_items as u64);
    counter!("scrape_duplicates_total").increment(stats.duplicates_skipped as u64);
    counter!("scrape_errors_total").increment(stats.errors as u64);
    histogram!("scrape_run_ms").record(stats.processing_time * 1_000.0);
    info!(
        source = %source.name,
        found = stats.total_found,
        new = stats.new_items,
        duplicates = stats.duplicates_skipped,
        errors = stats.errors,
        "scrape finished"
    );
    Ok(stats)
}

async fn collect_item(
    pool: &SqlitePool,
    fetcher: &Fetcher,
    scraper: &SharedScraper,
    source: &DataSource,
    item: &ListingItem,
    max_pdf_pages: usize,
) -> Result<ItemOutcome> {
    if TechnicalNote::exists_by_url(pool, source.id, &item.url).await? {
        return Ok(ItemOutcome::Duplicate);
    }

    let t_download = Instant::now();
    let doc = scraper.fetch_content(fetcher, item).await?;
    let download_secs = t_download.elapsed().as_secs_f64();

    let hash = content_hash(&doc.bytes);
    if TechnicalNote::exists_by_hash(pool, &hash).await? {
        return Ok(ItemOutcome::Duplicate);
    }

    let kind = detect_kind(source.content_type, &doc);
    let extracted = extract_off_thread(scraper, kind, &doc, max_pdf_pages).await;
    let preview = match &extracted {
        Ok(text) => {
            if text.is_empty() {
                warn!(url = %item.url, "document has no extractable text");
            }
            text.clone()
        }
        Err(_) => String::new(),
    };

    let note = TechnicalNote::create(
        pool,
        &NewTechnicalNote {
            source_id: source.id,
            title: item.title.clone(),
            original_url: item.url.clone(),
            document_hash: hash,
            publication_date: item.publication_date,
            file_size: Some(doc.bytes.len() as i64),
            content_preview: preview,
        },
    )
    .await?;

    let details = serde_json::json!({
        "item": item,
        "content_type": kind.as_str(),
        "bytes": doc.bytes.len(),
    });

    if let Err(e) = extracted {
        TechnicalNote::set_status(pool, note.id, NoteStatus::Error).await?;
        write_log(
            pool,
            NewProcessingLog::new(
                note.id,
                Operation::Scraping,
                LogLevel::Error,
                e.to_string(),
            )
            .details(details)
            .took(download_secs),
        )
        .await;
        return Ok(ItemOutcome::Unreadable(note, e));
    }

    let title_head: String = item.title.chars().take(50).collect();
    write_log(
        pool,
        NewProcessingLog::new(
            note.id,
            Operation::Scraping,
            LogLevel::Info,
            format!("new technical note collected: {title_head}"),
        )
        .details(details)
        .took(download_secs),
    )
    .await;

    Ok(ItemOutcome::Created(note))
}

/// PDF parsers can be slow and may panic on odd fonts; a panic becomes an
/// extraction error for this item only.
async fn extract_off_thread(
    scraper: &SharedScraper,
    kind: ContentType,
    doc: &FetchedDocument,
    max_pages: usize,
) -> Result<String> {
    let scraper = Arc::clone(scraper);
    let bytes = doc.bytes.clone();
    tokio::task::spawn_blocking(move || scraper.extract_text(kind, &bytes, max_pages))
        .await
        .map_err(|e| DigestError::Extract(format!("extractor crashed: {e}")))?
}

/// Log rows written after the note is stored are best effort.
async fn write_log(pool: &SqlitePool, entry: NewProcessingLog) {
    if let Err(e) = ProcessingLog::create(pool, &entry).await {
        warn!(note_id = entry.technical_note_id, error = %e, "could not write scraping log");
    }
}
