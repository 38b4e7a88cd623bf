// src/error.rs
use thiserror::Error;

/// Errors surfaced by the library. Binary glue wraps these in `anyhow`.
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("scrape failed: {0}")]
    Scrape(String),

    #[error("text extraction failed: {0}")]
    Extract(String),

    #[error("summarization failed: {0}")]
    Summarize(String),

    #[error("job {job_id} failed: {message}")]
    Job { job_id: String, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type Result<T, E = DigestError> = std::result::Result<T, E>;

impl DigestError {
    /// True when the database rejected a row because of a UNIQUE constraint.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DigestError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}
