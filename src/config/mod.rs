// src/config/mod.rs
pub mod ai;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::db::models::data_source::{ContentType, NewDataSource, ScrapingConfig};
pub use ai::SummarizerConfig;

pub const ENV_CONFIG_PATH: &str = "DIGEST_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/digest.toml";

pub const NFE_SOURCE_NAME: &str = "NFE FAZENDA";
pub const NFE_LISTING_URL: &str =
    "https://www.nfe.fazenda.gov.br/portal/listaConteudo.aspx?tipoConteudo=04BIflQt1aY=";

fn default_database_url() -> String {
    "sqlite://data/technotes.db".to_string()
}
fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            bind: default_bind(),
            http: HttpConfig::default(),
            summarizer: SummarizerConfig::default(),
            jobs: JobsConfig::default(),
            sources: default_sources(),
        }
    }
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (compatible; technote-digest/0.1)".to_string()
}
fn default_delay_ms() -> u64 {
    1_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_max_pages() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Minimum gap between two requests of the same fetcher.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// PDF pages read for the preview.
    #[serde(default = "default_max_pages")]
    pub max_pdf_pages: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            delay_ms: default_delay_ms(),
            max_retries: default_max_retries(),
            timeout_secs: default_http_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            max_pdf_pages: default_max_pages(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_process_max_items() -> u32 {
    15
}
fn default_pipeline_max_items() -> u32 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Register the default scraping/processing jobs on `serve`.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_process_max_items")]
    pub process_max_items: u32,
    #[serde(default = "default_pipeline_max_items")]
    pub pipeline_max_items: u32,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            process_max_items: default_process_max_items(),
            pipeline_max_items: default_pipeline_max_items(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub scraping: ScrapingConfig,
}

impl SourceConfig {
    pub fn to_new(&self) -> NewDataSource {
        NewDataSource {
            name: self.name.clone(),
            url: self.url.clone(),
            content_type: self.content_type,
            description: self.description.clone(),
            is_active: self.is_active,
            scraping_config: self.scraping.clone(),
        }
    }
}

/// The NF-e portal, used when no sources are configured and when a job
/// needs the source but it was never created.
pub fn nfe_source() -> SourceConfig {
    SourceConfig {
        name: NFE_SOURCE_NAME.to_string(),
        url: NFE_LISTING_URL.to_string(),
        content_type: ContentType::Pdf,
        description: "Official NF-e technical notes published by the federal revenue portal"
            .to_string(),
        is_active: true,
        scraping: ScrapingConfig::nfe_fazenda(),
    }
}

fn default_sources() -> Vec<SourceConfig> {
    vec![nfe_source()]
}

impl AppConfig {
    /// Load from an explicit TOML path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let cfg: AppConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg.finish())
    }

    /// Load using env var + fallbacks:
    /// 1) $DIGEST_CONFIG_PATH (must exist)
    /// 2) config/digest.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                anyhow::bail!("{ENV_CONFIG_PATH} points to non-existent path");
            }
            return Self::load_from(&pb);
        }
        let p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if p.exists() {
            return Self::load_from(&p);
        }
        Ok(Self::default().finish())
    }

    /// Apply environment overrides and sanitize.
    fn finish(mut self) -> Self {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                self.database_url = url;
            }
        }
        if let Ok(bind) = std::env::var("DIGEST_BIND") {
            if !bind.trim().is_empty() {
                self.bind = bind;
            }
        }
        if self.http.max_retries == 0 {
            self.http.max_retries = 1;
        }
        if self.http.max_pdf_pages == 0 {
            self.http.max_pdf_pages = default_max_pages();
        }
        self.summarizer = self.summarizer.resolve();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
database_url = "sqlite://x.db"

[http]
delay_ms = 10

[[sources]]
name = "Portal"
url = "https://example.org/list"
content_type = "html"
"#,
        )
        .unwrap();
        assert_eq!(cfg.database_url, "sqlite://x.db");
        assert_eq!(cfg.http.delay_ms, 10);
        assert_eq!(cfg.http.max_retries, 3);
        assert_eq!(cfg.sources.len(), 1);
        assert_eq!(cfg.sources[0].content_type, ContentType::Html);
        assert!(cfg.sources[0].is_active);
        assert_eq!(cfg.jobs.process_max_items, 15);
    }

    #[test]
    fn defaults_include_nfe_source() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.sources.len(), 1);
        assert_eq!(cfg.sources[0].name, NFE_SOURCE_NAME);
        assert_eq!(cfg.sources[0].content_type, ContentType::Pdf);
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_CONFIG_PATH);
        env::remove_var("DATABASE_URL");

        let v = AppConfig::load_default().unwrap();
        assert_eq!(v.database_url, default_database_url());

        let p = tmp.path().join("custom.toml");
        fs::write(&p, "bind = \"0.0.0.0:9000\"\n").unwrap();
        env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        let v2 = AppConfig::load_default().unwrap();
        assert_eq!(v2.bind, "0.0.0.0:9000");

        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml"));
        assert!(AppConfig::load_default().is_err());
        env::remove_var(ENV_CONFIG_PATH);

        env::set_current_dir(&old).unwrap();
    }
}
