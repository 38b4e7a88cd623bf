// src/extract.rs
//! Text extraction from downloaded documents.
//!
//! PDFs are read page by page with `lopdf` (first N pages only); when that
//! yields nothing, `pdf-extract` gets a go at the whole file.

use once_cell::sync::OnceCell;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::db::models::ContentType;
use crate::error::{DigestError, Result};

/// Character cap applied to stored previews.
pub const PREVIEW_MAX_CHARS: usize = 2000;
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Extract cleaned text from raw document bytes.
pub fn extract_text(kind: ContentType, bytes: &[u8], max_pages: usize) -> Result<String> {
    let raw = match kind {
        ContentType::Pdf => pdf_text(bytes, max_pages)?,
        ContentType::Html => html_text(&String::from_utf8_lossy(bytes)),
        ContentType::Text => String::from_utf8_lossy(bytes).into_owned(),
    };
    Ok(clean_extracted_text(&raw))
}

pub fn pdf_text(bytes: &[u8], max_pages: usize) -> Result<String> {
    match pdf_text_lopdf(bytes, max_pages) {
        Ok(text) if !text.trim().is_empty() => return Ok(text),
        Ok(_) => debug!("lopdf returned no text, trying pdf-extract"),
        Err(e) => warn!(error = %e, "lopdf extraction failed, trying pdf-extract"),
    }

    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| DigestError::Extract(format!("pdf-extract: {e}")))?;
    if text.trim().is_empty() {
        return Err(DigestError::Extract("pdf contains no extractable text".into()));
    }
    Ok(text)
}

fn pdf_text_lopdf(bytes: &[u8], max_pages: usize) -> Result<String> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| DigestError::Extract(format!("lopdf load: {e}")))?;

    let pages: Vec<u32> = doc.get_pages().keys().copied().take(max_pages.max(1)).collect();
    let mut parts = Vec::with_capacity(pages.len());
    for page in pages {
        match doc.extract_text(&[page]) {
            Ok(t) if !t.trim().is_empty() => parts.push(t),
            Ok(_) => {}
            Err(e) => debug!(page, error = %e, "lopdf page extraction failed"),
        }
    }
    Ok(parts.join("\n\n"))
}

/// Visible body text, one line per text node. Script and style contents are skipped.
pub fn html_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    static BODY: OnceCell<Selector> = OnceCell::new();
    let body = BODY.get_or_init(|| Selector::parse("body").expect("static selector"));

    let root = doc.select(body).next().unwrap_or_else(|| doc.root_element());
    let mut lines = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(|a| a.value().as_element())
            .any(|el| matches!(el.name(), "script" | "style" | "noscript"));
        if hidden {
            continue;
        }
        let t = text.trim();
        if !t.is_empty() {
            lines.push(t.to_string());
        }
    }
    lines.join("\n")
}

/// Normalize whitespace, drop control characters and cap the length.
pub fn clean_extracted_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    static RE_BLANK_RUNS: OnceCell<Regex> = OnceCell::new();
    static RE_SPACES: OnceCell<Regex> = OnceCell::new();
    let re_blank = RE_BLANK_RUNS.get_or_init(|| Regex::new(r"\n\s*\n\s*\n+").expect("static regex"));
    let re_spaces = RE_SPACES.get_or_init(|| Regex::new(r" +").expect("static regex"));

    let out: String = text
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect();
    let out = re_blank.replace_all(&out, "\n\n");
    let out = re_spaces.replace_all(&out, " ");
    let out = out.trim();

    if out.chars().count() > PREVIEW_MAX_CHARS {
        let mut capped: String = out.chars().take(PREVIEW_MAX_CHARS).collect();
        capped.push_str(TRUNCATION_MARKER);
        return capped;
    }
    out.to_string()
}

/// Collapse whitespace and decode entities in short strings such as titles.
pub fn normalize_inline(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}
