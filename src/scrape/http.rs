// src/scrape/http.rs
//! Polite HTTP fetching: shared client, fixed gap between requests, bounded retries.

use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::error::{DigestError, Result};

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub user_agent: String,
    pub timeout: Duration,
    /// Minimum gap between the start of two requests.
    pub delay_between_requests: Duration,
    pub max_retries: u32,
    /// Wait before retry `n` is `backoff_base * 2^n`.
    pub backoff_base: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self::from(&HttpConfig::default())
    }
}

impl From<&HttpConfig> for FetchSettings {
    fn from(cfg: &HttpConfig) -> Self {
        Self {
            user_agent: cfg.user_agent.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            delay_between_requests: Duration::from_millis(cfg.delay_ms),
            max_retries: cfg.max_retries.max(1),
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
        }
    }
}

impl FetchSettings {
    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub url: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl FetchedDocument {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

pub struct Fetcher {
    http: reqwest::Client,
    settings: FetchSettings,
    last_request: Mutex<Option<Instant>>,
}

impl Fetcher {
    pub fn new(settings: FetchSettings) -> Result<Self> {
        Self::with_headers(settings, HeaderMap::new())
    }

    /// Build with extra default headers layered over the browser-like defaults.
    pub fn with_headers(settings: FetchSettings, extra: HeaderMap) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,application/pdf,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("pt-BR,pt;q=0.9,en;q=0.8"),
        );
        headers.extend(extra);

        let http = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10).min(settings.timeout))
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            http,
            settings,
            last_request: Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// GET with rate limiting and retries. Non-2xx statuses count as failures.
    pub async fn get(&self, url: &str) -> Result<FetchedDocument> {
        let attempts = self.settings.max_retries.max(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            self.rate_limit().await;
            match self.get_once(url).await {
                Ok(doc) => {
                    if attempt > 0 {
                        debug!(url, attempts = attempt + 1, "request succeeded after retry");
                    }
                    return Ok(doc);
                }
                Err(e) => {
                    warn!(url, attempt = attempt + 1, max_retries = attempts, error = %e, "request attempt failed");
                    last_err = Some(e);
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.settings.backoff(attempt)).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| DigestError::Scrape(format!("no attempt made for {url}"))))
    }

    async fn get_once(&self, url: &str) -> Result<FetchedDocument> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DigestError::Scrape(format!("http status {} for {url}", status.as_u16())));
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let final_url = resp.url().to_string();
        let bytes = resp.bytes().await?;
        Ok(FetchedDocument {
            url: final_url,
            content_type,
            bytes,
        })
    }

    async fn rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.settings.delay_between_requests {
                tokio::time::sleep(self.settings.delay_between_requests - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}
