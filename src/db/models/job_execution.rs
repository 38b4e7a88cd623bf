use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_run_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobRunStatus {
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobExecution {
    pub id: i64,
    pub job_id: String,
    pub job_name: String,
    pub status: JobRunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub result: Option<Json<serde_json::Value>>,
    pub error_message: Option<String>,
}

impl JobExecution {
    pub async fn start(pool: &SqlitePool, job_id: &str, job_name: &str) -> Result<i64> {
        let id = sqlx::query(
            "INSERT INTO job_executions (job_id, job_name, status, started_at) VALUES (?, ?, ?, ?)",
        )
        .bind(job_id)
        .bind(job_name)
        .bind(JobRunStatus::Running)
        .bind(Utc::now())
        .execute(pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn finish(
        pool: &SqlitePool,
        id: i64,
        status: JobRunStatus,
        duration_seconds: f64,
        result: &serde_json::Value,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE job_executions \
             SET status = ?, finished_at = ?, duration_seconds = ?, result = ?, error_message = ? \
             WHERE id = ?",
        )
        .bind(status)
        .bind(Utc::now())
        .bind(duration_seconds)
        .bind(Json(result))
        .bind(error_message)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Newest first; `job_id` narrows to one job.
    pub async fn recent(pool: &SqlitePool, job_id: Option<&str>, limit: i64) -> Result<Vec<Self>> {
        const SELECT: &str = "SELECT id, job_id, job_name, status, started_at, finished_at, \
            duration_seconds, result, error_message FROM job_executions";
        let rows = match job_id {
            Some(job) => {
                sqlx::query_as::<_, Self>(&format!(
                    "{SELECT} WHERE job_id = ? ORDER BY started_at DESC, id DESC LIMIT ?"
                ))
                .bind(job)
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Self>(&format!(
                    "{SELECT} ORDER BY started_at DESC, id DESC LIMIT ?"
                ))
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
        };
        Ok(rows)
    }
}
