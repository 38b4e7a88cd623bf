use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};

use crate::error::{DigestError, Result};

/// Model-generated synopsis of one technical note. Written once, never updated.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProcessedSummary {
    pub id: i64,
    pub technical_note_id: i64,
    pub summary: String,
    pub key_points: Json<Vec<String>>,
    pub changes_identified: Json<Vec<String>>,
    pub topics: Json<Vec<String>>,
    pub model_used: String,
    pub processing_time: Option<f64>,
    pub tokens_used: Option<i64>,
    pub confidence_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSummary {
    pub technical_note_id: i64,
    pub summary: String,
    pub key_points: Vec<String>,
    pub changes_identified: Vec<String>,
    pub topics: Vec<String>,
    pub model_used: String,
    pub processing_time: Option<f64>,
    pub tokens_used: Option<i64>,
    pub confidence_score: Option<f64>,
}

const SELECT: &str = "SELECT id, technical_note_id, summary, key_points, changes_identified, \
    topics, model_used, processing_time, tokens_used, confidence_score, created_at \
    FROM processed_summaries";

impl ProcessedSummary {
    pub async fn create(pool: &SqlitePool, data: &NewSummary) -> Result<Self> {
        let id = sqlx::query(
            "INSERT INTO processed_summaries \
                (technical_note_id, summary, key_points, changes_identified, topics, \
                 model_used, processing_time, tokens_used, confidence_score, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(data.technical_note_id)
        .bind(&data.summary)
        .bind(Json(&data.key_points))
        .bind(Json(&data.changes_identified))
        .bind(Json(&data.topics))
        .bind(&data.model_used)
        .bind(data.processing_time)
        .bind(data.tokens_used)
        .bind(data.confidence_score)
        .bind(Utc::now())
        .execute(pool)
        .await?
        .last_insert_rowid();

        sqlx::query_as::<_, Self>(&format!("{SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| DigestError::NotFound(format!("summary {id}")))
    }

    pub async fn find_by_note(pool: &SqlitePool, note_id: i64) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(&format!("{SELECT} WHERE technical_note_id = ?"))
            .bind(note_id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    pub async fn exists_for_note(pool: &SqlitePool, note_id: i64) -> Result<bool> {
        let (n,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM processed_summaries WHERE technical_note_id = ?")
                .bind(note_id)
                .fetch_one(pool)
                .await?;
        Ok(n > 0)
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM processed_summaries")
            .fetch_one(pool)
            .await?;
        Ok(n)
    }

    pub async fn count_by_model(pool: &SqlitePool) -> Result<BTreeMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT model_used, COUNT(*) FROM processed_summaries GROUP BY model_used",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().collect())
    }
}
