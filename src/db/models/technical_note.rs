use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

use crate::error::{DigestError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "note_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NoteStatus {
    Pending,
    Processing,
    Processed,
    Error,
}

impl NoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteStatus::Pending => "pending",
            NoteStatus::Processing => "processing",
            NoteStatus::Processed => "processed",
            NoteStatus::Error => "error",
        }
    }
}

impl fmt::Display for NoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for NoteStatus {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(NoteStatus::Pending),
            "processing" => Ok(NoteStatus::Processing),
            "processed" => Ok(NoteStatus::Processed),
            "error" | "failed" => Ok(NoteStatus::Error),
            other => Err(DigestError::Validation(format!("unknown status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TechnicalNote {
    pub id: i64,
    pub source_id: i64,
    pub title: String,
    pub original_url: String,
    pub document_hash: String,
    pub publication_date: Option<NaiveDate>,
    pub status: NoteStatus,
    pub file_size: Option<i64>,
    pub content_preview: String,
    pub local_file_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTechnicalNote {
    pub source_id: i64,
    pub title: String,
    pub original_url: String,
    pub document_hash: String,
    pub publication_date: Option<NaiveDate>,
    pub file_size: Option<i64>,
    pub content_preview: String,
}

/// Listing filter for the CLI and API.
#[derive(Debug, Clone, Default)]
pub struct NoteFilter {
    pub source_id: Option<i64>,
    pub status: Option<NoteStatus>,
    pub limit: Option<i64>,
}

const SELECT: &str = "SELECT id, source_id, title, original_url, document_hash, publication_date, \
    status, file_size, content_preview, local_file_path, created_at, updated_at FROM technical_notes";

impl TechnicalNote {
    /// Insert a new note as `pending`. Unique violations on (source, url) or
    /// hash surface as `DigestError::Database`; see `DigestError::is_unique_violation`.
    pub async fn create(pool: &SqlitePool, data: &NewTechnicalNote) -> Result<Self> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO technical_notes \
                (source_id, title, original_url, document_hash, publication_date, status, \
                 file_size, content_preview, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(data.source_id)
        .bind(&data.title)
        .bind(&data.original_url)
        .bind(&data.document_hash)
        .bind(data.publication_date)
        .bind(NoteStatus::Pending)
        .bind(data.file_size)
        .bind(&data.content_preview)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?
        .last_insert_rowid();

        Self::find_by_id(pool, id)
            .await?
            .ok_or_else(|| DigestError::NotFound(format!("technical note {id}")))
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(&format!("{SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    pub async fn exists_by_url(pool: &SqlitePool, source_id: i64, url: &str) -> Result<bool> {
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM technical_notes WHERE source_id = ? AND original_url = ?",
        )
        .bind(source_id)
        .bind(url)
        .fetch_one(pool)
        .await?;
        Ok(n > 0)
    }

    pub async fn exists_by_hash(pool: &SqlitePool, hash: &str) -> Result<bool> {
        let (n,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM technical_notes WHERE document_hash = ?")
                .bind(hash)
                .fetch_one(pool)
                .await?;
        Ok(n > 0)
    }

    /// Pending notes, oldest first.
    pub async fn find_pending(
        pool: &SqlitePool,
        source_id: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<Self>> {
        let filter = NoteFilter {
            source_id,
            status: Some(NoteStatus::Pending),
            limit,
        };
        Self::query(pool, &filter, "created_at ASC, id ASC").await
    }

    /// Newest publication first, then newest created.
    pub async fn list(pool: &SqlitePool, filter: &NoteFilter) -> Result<Vec<Self>> {
        Self::query(
            pool,
            filter,
            "publication_date IS NULL, publication_date DESC, created_at DESC, id DESC",
        )
        .await
    }

    async fn query(pool: &SqlitePool, filter: &NoteFilter, order: &str) -> Result<Vec<Self>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT);
        qb.push(" WHERE 1 = 1");
        if let Some(source_id) = filter.source_id {
            qb.push(" AND source_id = ").push_bind(source_id);
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status);
        }
        qb.push(" ORDER BY ").push(order);
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit.max(0));
        }
        let rows = qb.build_query_as::<Self>().fetch_all(pool).await?;
        Ok(rows)
    }

    /// Atomically move a note from `pending` to `processing`.
    /// Returns false when another worker already claimed it.
    pub async fn claim(pool: &SqlitePool, id: i64) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE technical_notes SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(NoteStatus::Processing)
        .bind(Utc::now())
        .bind(id)
        .bind(NoteStatus::Pending)
        .execute(pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn set_status(pool: &SqlitePool, id: i64, status: NoteStatus) -> Result<()> {
        sqlx::query("UPDATE technical_notes SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Put an errored note back in the queue.
    pub async fn requeue(pool: &SqlitePool, id: i64) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE technical_notes SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(NoteStatus::Pending)
        .bind(Utc::now())
        .bind(id)
        .bind(NoteStatus::Error)
        .execute(pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    /// Counts keyed by status name; `source_id` narrows to one source.
    pub async fn count_by_status(
        pool: &SqlitePool,
        source_id: Option<i64>,
    ) -> Result<BTreeMap<String, i64>> {
        let rows: Vec<(String, i64)> = match source_id {
            Some(id) => {
                sqlx::query_as(
                    "SELECT status, COUNT(*) FROM technical_notes WHERE source_id = ? GROUP BY status",
                )
                .bind(id)
                .fetch_all(pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT status, COUNT(*) FROM technical_notes GROUP BY status")
                    .fetch_all(pool)
                    .await?
            }
        };
        Ok(rows.into_iter().collect())
    }
}
