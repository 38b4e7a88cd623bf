use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "operation", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Scraping,
    Download,
    Processing,
    Validation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "log_level", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Append-only audit trail for one note.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProcessingLog {
    pub id: i64,
    pub technical_note_id: i64,
    pub operation: Operation,
    pub level: LogLevel,
    pub message: String,
    pub details: Json<serde_json::Value>,
    pub execution_time: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProcessingLog {
    pub technical_note_id: i64,
    pub operation: Operation,
    pub level: LogLevel,
    pub message: String,
    pub details: serde_json::Value,
    pub execution_time: Option<f64>,
}

impl NewProcessingLog {
    pub fn new(note_id: i64, operation: Operation, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            technical_note_id: note_id,
            operation,
            level,
            message: message.into(),
            details: serde_json::json!({}),
            execution_time: None,
        }
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn took(mut self, secs: f64) -> Self {
        self.execution_time = Some(secs);
        self
    }
}

impl ProcessingLog {
    pub async fn create(pool: &SqlitePool, data: &NewProcessingLog) -> Result<i64> {
        let id = sqlx::query(
            "INSERT INTO processing_logs \
                (technical_note_id, operation, level, message, details, execution_time, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(data.technical_note_id)
        .bind(data.operation)
        .bind(data.level)
        .bind(&data.message)
        .bind(Json(&data.details))
        .bind(data.execution_time)
        .bind(Utc::now())
        .execute(pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    /// Newest first.
    pub async fn list_for_note(pool: &SqlitePool, note_id: i64) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(
            "SELECT id, technical_note_id, operation, level, message, details, execution_time, created_at \
             FROM processing_logs WHERE technical_note_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(note_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}
