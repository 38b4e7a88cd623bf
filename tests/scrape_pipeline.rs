// tests/scrape_pipeline.rs
//
// Scraping against a local wiremock portal:
// - listing parse (titles from table cells, dates, relative links)
// - new notes on the first run, duplicates on the second
// - content-hash dedup across different URLs
// - per-item failures do not abort the run; a dead listing does
// - unreadable documents are stored once, in error status

mod common;

use common::{fast_http, html_source, test_db};
use scraper::Html;
use technote_digest::db::models::{
    DataSource, LogLevel, NoteFilter, NoteStatus, Operation, ProcessingLog, ScrapingConfig,
    TechnicalNote,
};
use technote_digest::scrape::http::FetchSettings;
use technote_digest::scrape::listing::LinkSelectorScraper;
use technote_digest::scrape::{fetcher_for, scrape_new_items, scraper_for, Scraper};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LISTING: &str = r#"<html><body>
<table>
  <tr><td>Nota Tecnica 2024.001 - Leiaute da NF-e</td><td>05/03/2024</td><td><a class="doc" href="/docs/nt1.html">Baixar</a></td></tr>
  <tr><td>Nota Tecnica 2024.002 - Eventos</td><td>12/04/2024</td><td><a class="doc" href="/docs/nt2.html">Baixar</a></td></tr>
  <tr><td>Espelho</td><td><a class="doc" href="/docs/nt3.html">Nota Tecnica 2024.002 (espelho)</a></td></tr>
</table>
<a href="/sobre">Sobre o portal</a>
</body></html>"#;

const DOC_ONE: &str = "<html><body><h1>NT 2024.001</h1><p>Altera o leiaute da NF-e com novos campos de tributacao.</p><script>var x=1;</script></body></html>";
const DOC_TWO: &str = "<html><body><h1>NT 2024.002</h1><p>Cria novos eventos para a NF-e e ajusta regras de validacao.</p></body></html>";

fn page(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/html; charset=utf-8")
}

async fn portal() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET")).and(path("/lista")).respond_with(page(LISTING)).mount(&server).await;
    Mock::given(method("GET")).and(path("/docs/nt1.html")).respond_with(page(DOC_ONE)).mount(&server).await;
    Mock::given(method("GET")).and(path("/docs/nt2.html")).respond_with(page(DOC_TWO)).mount(&server).await;
    // Same bytes as nt2 under another URL.
    Mock::given(method("GET")).and(path("/docs/nt3.html")).respond_with(page(DOC_TWO)).mount(&server).await;
    server
}

fn scraping() -> ScrapingConfig {
    ScrapingConfig {
        selectors: vec!["a.doc".to_string()],
        base_url: None,
        min_title_len: 10,
    }
}

async fn stored_source(pool: &sqlx::SqlitePool, listing_url: &str) -> DataSource {
    let mut cfg = html_source("Portal Teste", listing_url);
    cfg.scraping = scraping();
    DataSource::upsert(pool, &cfg.to_new()).await.unwrap()
}

#[test]
fn listing_items_have_titles_dates_and_absolute_urls() {
    let scraper = LinkSelectorScraper::from_config("Portal Teste", &scraping()).unwrap();
    let base = Url::parse("https://portal.example/lista").unwrap();
    let items = scraper.extract_items(&Html::parse_document(LISTING), &base);

    assert_eq!(items.len(), 3, "only links matching the selector");
    assert_eq!(items[0].title, "Nota Tecnica 2024.001 - Leiaute da NF-e");
    assert_eq!(items[0].url, "https://portal.example/docs/nt1.html");
    assert_eq!(
        items[0].publication_date,
        chrono::NaiveDate::from_ymd_opt(2024, 3, 5)
    );
    assert_eq!(items[2].title, "Nota Tecnica 2024.002 (espelho)", "own link text when long enough");
    assert_eq!(items[2].publication_date, None);
}

#[test]
fn first_matching_selector_wins() {
    let cfg = ScrapingConfig {
        selectors: vec!["a.missing".into(), "a.doc".into(), "a".into()],
        ..scraping()
    };
    let scraper = LinkSelectorScraper::from_config("x", &cfg).unwrap();
    let base = Url::parse("https://portal.example/lista").unwrap();
    let items = scraper.extract_items(&Html::parse_document(LISTING), &base);
    assert_eq!(items.len(), 3);
}

#[tokio::test]
async fn first_run_collects_second_run_skips() {
    let server = portal().await;
    let db = test_db().await;
    let source = stored_source(&db.pool, &format!("{}/lista", server.uri())).await;
    let scraper = scraper_for(&source).unwrap();
    let fetcher = fetcher_for(scraper.as_ref(), FetchSettings::from(&fast_http())).unwrap();

    let first = scrape_new_items(&db.pool, &fetcher, &scraper, &source, 3).await.unwrap();
    assert_eq!(first.total_found, 3);
    assert_eq!(first.new_items, 2);
    assert_eq!(first.duplicates_skipped, 1, "nt3 has the same bytes as nt2");
    assert_eq!(first.errors, 0);

    let notes = TechnicalNote::list(&db.pool, &NoteFilter::default()).await.unwrap();
    assert_eq!(notes.len(), 2);
    assert!(notes.iter().all(|n| n.status == NoteStatus::Pending));
    let nt1 = notes.iter().find(|n| n.original_url.ends_with("nt1.html")).unwrap();
    assert!(nt1.content_preview.contains("Altera o leiaute"));
    assert!(!nt1.content_preview.contains("var x"), "script text is dropped");
    assert_eq!(nt1.document_hash.len(), 64);

    let logs = ProcessingLog::list_for_note(&db.pool, nt1.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].operation, Operation::Scraping);

    let second = scrape_new_items(&db.pool, &fetcher, &scraper, &source, 3).await.unwrap();
    assert_eq!(second.new_items, 0);
    assert_eq!(second.duplicates_skipped, 3);
    assert_eq!(TechnicalNote::list(&db.pool, &NoteFilter::default()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn broken_item_is_counted_and_run_continues() {
    let server = MockServer::start().await;
    let listing = r#"<html><body>
      <p><a class="doc" href="/docs/bad.html">Nota Tecnica quebrada</a></p>
      <p><a class="doc" href="/docs/ok.html">Nota Tecnica valida</a></p>
    </body></html>"#;
    Mock::given(method("GET")).and(path("/lista")).respond_with(page(listing)).mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/docs/bad.html"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET")).and(path("/docs/ok.html")).respond_with(page(DOC_ONE)).mount(&server).await;

    let db = test_db().await;
    let source = stored_source(&db.pool, &format!("{}/lista", server.uri())).await;
    let scraper = scraper_for(&source).unwrap();
    let fetcher = fetcher_for(scraper.as_ref(), FetchSettings::from(&fast_http())).unwrap();

    let stats = scrape_new_items(&db.pool, &fetcher, &scraper, &source, 3).await.unwrap();
    assert_eq!(stats.total_found, 2);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.new_items, 1);
}

#[tokio::test]
async fn unreachable_listing_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lista"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let db = test_db().await;
    let source = stored_source(&db.pool, &format!("{}/lista", server.uri())).await;
    let scraper = scraper_for(&source).unwrap();
    let fetcher = fetcher_for(scraper.as_ref(), FetchSettings::from(&fast_http())).unwrap();

    let err = scrape_new_items(&db.pool, &fetcher, &scraper, &source, 3)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("503"), "got: {err}");
    assert!(TechnicalNote::list(&db.pool, &NoteFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn unreadable_pdf_is_stored_as_error_and_not_downloaded_again() {
    let server = MockServer::start().await;
    let listing = r#"<html><body>
      <p><a class="doc" href="/docs/scan.pdf">Nota Tecnica digitalizada</a></p>
    </body></html>"#;
    Mock::given(method("GET")).and(path("/lista")).respond_with(page(listing)).mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/docs/scan.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(b"%PDF-1.4 not really a pdf".to_vec(), "application/pdf"),
        )
        .mount(&server)
        .await;

    let db = test_db().await;
    let source = stored_source(&db.pool, &format!("{}/lista", server.uri())).await;
    let scraper = scraper_for(&source).unwrap();
    let fetcher = fetcher_for(scraper.as_ref(), FetchSettings::from(&fast_http())).unwrap();

    let first = scrape_new_items(&db.pool, &fetcher, &scraper, &source, 3).await.unwrap();
    assert_eq!(first.errors, 1);
    assert_eq!(first.new_items, 0);

    let notes = TechnicalNote::list(&db.pool, &NoteFilter::default()).await.unwrap();
    assert_eq!(notes.len(), 1, "the note is kept so its hash is known");
    assert_eq!(notes[0].status, NoteStatus::Error);
    assert!(notes[0].content_preview.is_empty());

    let logs = ProcessingLog::list_for_note(&db.pool, notes[0].id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].operation, Operation::Scraping);
    assert_eq!(logs[0].level, LogLevel::Error);
    assert!(logs[0].message.contains("text extraction failed"), "got: {}", logs[0].message);

    let second = scrape_new_items(&db.pool, &fetcher, &scraper, &source, 3).await.unwrap();
    assert_eq!(second.duplicates_skipped, 1);
    assert_eq!(second.errors, 0);

    let downloads = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/docs/scan.pdf")
        .count();
    assert_eq!(downloads, 1);
}

#[tokio::test]
async fn lost_scraping_log_does_not_fail_a_stored_note() {
    let server = portal().await;
    let db = test_db().await;
    let source = stored_source(&db.pool, &format!("{}/lista", server.uri())).await;
    sqlx::query("DROP TABLE processing_logs").execute(&db.pool).await.unwrap();

    let scraper = scraper_for(&source).unwrap();
    let fetcher = fetcher_for(scraper.as_ref(), FetchSettings::from(&fast_http())).unwrap();
    let stats = scrape_new_items(&db.pool, &fetcher, &scraper, &source, 3).await.unwrap();

    assert_eq!(stats.new_items, 2);
    assert_eq!(stats.errors, 0);
    assert_eq!(TechnicalNote::list(&db.pool, &NoteFilter::default()).await.unwrap().len(), 2);
}
