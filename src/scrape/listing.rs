// src/scrape/listing.rs
//! Selector-driven listing scraper. A new source is usually just a new
//! `ScrapingConfig`: listing URL, link selectors, base URL.

use std::collections::HashSet;

use chrono::{Local, NaiveDate};
use once_cell::sync::OnceCell;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use super::{ListingItem, Scraper};
use crate::config::NFE_SOURCE_NAME;
use crate::db::models::ScrapingConfig;
use crate::error::{DigestError, Result};
use crate::extract::normalize_inline;

pub struct LinkSelectorScraper {
    name: String,
    selectors: Vec<Selector>,
    base_url: Option<Url>,
    min_title_len: usize,
    referer: Option<HeaderValue>,
}

impl LinkSelectorScraper {
    pub fn from_config(name: &str, cfg: &ScrapingConfig) -> Result<Self> {
        if cfg.selectors.is_empty() {
            return Err(DigestError::Validation(format!(
                "source '{name}' has no link selectors"
            )));
        }
        let selectors = cfg
            .selectors
            .iter()
            .map(|s| {
                Selector::parse(s)
                    .map_err(|e| DigestError::Validation(format!("bad selector {s:?}: {e:?}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let base_url = match cfg.base_url.as_deref() {
            Some(raw) => Some(
                Url::parse(raw)
                    .map_err(|e| DigestError::Validation(format!("bad base_url {raw:?}: {e}")))?,
            ),
            None => None,
        };
        Ok(Self {
            name: name.to_string(),
            selectors,
            base_url,
            min_title_len: cfg.min_title_len,
            referer: None,
        })
    }

    /// Preset for the NF-e portal listing of technical notes.
    pub fn nfe_fazenda() -> Result<Self> {
        let mut s = Self::from_config(NFE_SOURCE_NAME, &ScrapingConfig::nfe_fazenda())?;
        s.referer = Some(HeaderValue::from_static("https://www.nfe.fazenda.gov.br/"));
        Ok(s)
    }

    fn title_for(&self, link: ElementRef<'_>) -> String {
        let long_enough = |t: &str| t.chars().count() > self.min_title_len;

        let own = element_text(link);
        if long_enough(&own) {
            return own;
        }

        let parent = link.parent().and_then(ElementRef::wrap);
        if let Some(parent) = parent {
            let text = element_text(parent);
            if long_enough(&text) {
                return text;
            }
            let siblings = parent
                .prev_siblings()
                .chain(parent.next_siblings())
                .filter_map(ElementRef::wrap)
                .filter(|el| matches!(el.value().name(), "td" | "div" | "span"));
            for sib in siblings {
                let text = element_text(sib);
                if long_enough(&text) {
                    return text;
                }
            }
        }

        if let Some(row) = enclosing_row(link) {
            let cells = row
                .descendants()
                .filter_map(ElementRef::wrap)
                .filter(|el| el.value().name() == "td")
                .filter(|td| !td.descendants().any(|n| n.id() == link.id()));
            for td in cells {
                let text = element_text(td);
                if long_enough(&text) {
                    return text;
                }
            }
        }

        format!("Technical note {}", Local::now().format("%Y%m%d_%H%M%S"))
    }
}

impl Scraper for LinkSelectorScraper {
    fn name(&self) -> &str {
        &self.name
    }

    fn extra_headers(&self) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(r) = &self.referer {
            h.insert(REFERER, r.clone());
        }
        h
    }

    fn extract_items(&self, page: &Html, page_url: &Url) -> Vec<ListingItem> {
        let base = self.base_url.as_ref().unwrap_or(page_url);

        let links: Vec<ElementRef<'_>> = self
            .selectors
            .iter()
            .map(|sel| page.select(sel).collect::<Vec<_>>())
            .find(|found| !found.is_empty())
            .unwrap_or_default();
        debug!(source = %self.name, links = links.len(), "document links found");

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(links.len());
        for link in links {
            let Some(href) = link.value().attr("href").map(str::trim) else {
                continue;
            };
            if href.is_empty() {
                continue;
            }
            let url = match base.join(href) {
                Ok(u) => u,
                Err(e) => {
                    warn!(href, error = %e, "skipping unresolvable link");
                    continue;
                }
            };
            if !seen.insert(url.to_string()) {
                continue;
            }
            items.push(ListingItem {
                title: self.title_for(link),
                url: url.to_string(),
                publication_date: date_near(link),
            });
        }
        items
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    normalize_inline(&el.text().collect::<String>())
}

fn enclosing_row(link: ElementRef<'_>) -> Option<ElementRef<'_>> {
    link.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "tr")
}

/// First recognizable date in the link's table row (or its parent when not in a table).
fn date_near(link: ElementRef<'_>) -> Option<NaiveDate> {
    let context = enclosing_row(link).or_else(|| link.parent().and_then(ElementRef::wrap))?;
    parse_first_date(&context.text().collect::<String>())
}

/// Patterns in priority order: dd/mm/yyyy, dd-mm-yyyy, yyyy/mm/dd, yyyy-mm-dd.
pub fn parse_first_date(text: &str) -> Option<NaiveDate> {
    static PATTERNS: OnceCell<Vec<(Regex, &'static str)>> = OnceCell::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            (r"\b\d{2}/\d{2}/\d{4}\b", "%d/%m/%Y"),
            (r"\b\d{2}-\d{2}-\d{4}\b", "%d-%m-%Y"),
            (r"\b\d{4}/\d{2}/\d{2}\b", "%Y/%m/%d"),
            (r"\b\d{4}-\d{2}-\d{2}\b", "%Y-%m-%d"),
        ]
        .into_iter()
        .map(|(re, fmt)| (Regex::new(re).expect("static regex"), fmt))
        .collect()
    });

    for (re, fmt) in patterns {
        for m in re.find_iter(text) {
            if let Ok(d) = NaiveDate::parse_from_str(m.as_str(), fmt) {
                return Some(d);
            }
        }
    }
    None
}
