use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "content_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Pdf,
    Html,
    Text,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Pdf => "pdf",
            ContentType::Html => "html",
            ContentType::Text => "text",
        }
    }
}

fn default_min_title_len() -> usize {
    10
}

/// Site-specific scraping knobs stored as JSON on the source row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapingConfig {
    /// CSS selectors for document links; the first selector with matches wins.
    #[serde(default)]
    pub selectors: Vec<String>,
    /// Base for relative links. Defaults to the listing URL.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_min_title_len")]
    pub min_title_len: usize,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            selectors: vec!["a[href$=\".pdf\"]".to_string()],
            base_url: None,
            min_title_len: default_min_title_len(),
        }
    }
}

impl ScrapingConfig {
    pub fn nfe_fazenda() -> Self {
        Self {
            selectors: vec![
                r#"a[href*="exibirArquivo.aspx"]"#.to_string(),
                r#"a[href*="conteudo="]"#.to_string(),
            ],
            base_url: Some("https://www.nfe.fazenda.gov.br".to_string()),
            min_title_len: default_min_title_len(),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DataSource {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub content_type: ContentType,
    pub description: String,
    pub is_active: bool,
    pub scraping_config: Json<ScrapingConfig>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDataSource {
    pub name: String,
    pub url: String,
    pub content_type: ContentType,
    pub description: String,
    pub is_active: bool,
    pub scraping_config: ScrapingConfig,
}

const SELECT: &str = "SELECT id, name, url, content_type, description, is_active, \
    scraping_config, created_at, updated_at FROM data_sources";

impl DataSource {
    /// Insert or refresh a source by name (config is the source of truth).
    pub async fn upsert(pool: &SqlitePool, data: &NewDataSource) -> Result<Self> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO data_sources \
                (name, url, content_type, description, is_active, scraping_config, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET \
                url = excluded.url, \
                content_type = excluded.content_type, \
                description = excluded.description, \
                is_active = excluded.is_active, \
                scraping_config = excluded.scraping_config, \
                updated_at = excluded.updated_at",
        )
        .bind(&data.name)
        .bind(&data.url)
        .bind(data.content_type)
        .bind(&data.description)
        .bind(data.is_active)
        .bind(Json(&data.scraping_config))
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
        Self::require_by_name(pool, &data.name).await
    }

    /// Insert only when missing; an existing row is returned untouched.
    pub async fn ensure(pool: &SqlitePool, data: &NewDataSource) -> Result<Self> {
        if let Some(existing) = Self::find_by_name(pool, &data.name).await? {
            return Ok(existing);
        }
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO data_sources \
                (name, url, content_type, description, is_active, scraping_config, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(&data.name)
        .bind(&data.url)
        .bind(data.content_type)
        .bind(&data.description)
        .bind(data.is_active)
        .bind(Json(&data.scraping_config))
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
        Self::require_by_name(pool, &data.name).await
    }

    pub async fn find_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(&format!("{SELECT} WHERE name = ?"))
            .bind(name)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(&format!("{SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    pub async fn list(pool: &SqlitePool) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(&format!("{SELECT} ORDER BY name ASC"))
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    async fn require_by_name(pool: &SqlitePool, name: &str) -> Result<Self> {
        Self::find_by_name(pool, name)
            .await?
            .ok_or_else(|| crate::error::DigestError::NotFound(format!("data source '{name}'")))
    }
}
