// src/lib.rs
// Library surface shared by the binary and the integration tests.

pub mod api;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod scrape;
pub mod summarize;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::AppConfig;
pub use crate::error::{DigestError, Result};
pub use crate::jobs::{AppContext, JobManager, JobReport};
pub use crate::processor::Processor;
