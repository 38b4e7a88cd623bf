// src/jobs/manager.rs
//! Default technical-note jobs on top of `JobScheduler`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

use super::{
    process_pending_job, scrape_sources_job, AppContext, JobFn, JobFuture, JobInfo, JobReport, JobScheduler,
    Trigger,
};
use crate::db::models::{DataSource, TechnicalNote};
use crate::error::{DigestError, Result};

pub const SCRAPING_JOB_ID: &str = "technote_scraping";
pub const PROCESSING_JOB_ID: &str = "technote_processing";

const SCRAPING_HOUR: u32 = 9;
const SCRAPING_MINUTE: u32 = 0;
/// 08:15 through 18:15, every two hours.
const PROCESSING_HOURS: [u32; 6] = [8, 10, 12, 14, 16, 18];
const PROCESSING_MINUTE: u32 = 15;

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub jobs: Vec<JobInfo>,
    pub scheduler_running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatistics {
    pub total_notes: i64,
    pub by_status: BTreeMap<String, i64>,
    pub pending_processing: i64,
    pub processed: i64,
    pub errors: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub data_source: DataSource,
    pub statistics: SourceStatistics,
}

pub struct JobManager {
    ctx: AppContext,
    scheduler: Arc<JobScheduler>,
}

impl JobManager {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            scheduler: Arc::new(JobScheduler::new()),
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    /// Register the scraping (weekdays) and processing (every two hours in
    /// business time) jobs. Returns the registered ids.
    pub async fn setup_default_jobs(&self) -> Vec<&'static str> {
        let ctx = self.ctx.clone();
        let scrape: JobFn = Arc::new(move || -> JobFuture {
            let ctx = ctx.clone();
            Box::pin(async move { scrape_sources_job(&ctx).await })
        });
        self.scheduler
            .add_job(
                SCRAPING_JOB_ID,
                "Technical note scraping",
                Trigger::weekdays_at(SCRAPING_HOUR, SCRAPING_MINUTE),
                scrape,
            )
            .await;

        let ctx = self.ctx.clone();
        let max_items = self.ctx.config.jobs.process_max_items;
        let process: JobFn = Arc::new(move || -> JobFuture {
            let ctx = ctx.clone();
            Box::pin(async move { process_pending_job(&ctx, max_items).await })
        });
        self.scheduler
            .add_job(
                PROCESSING_JOB_ID,
                "Technical note processing",
                Trigger::cron(super::DaySet::Every, PROCESSING_HOURS, PROCESSING_MINUTE),
                process,
            )
            .await;

        info!("default technical-note jobs registered");
        vec![SCRAPING_JOB_ID, PROCESSING_JOB_ID]
    }

    /// Scrape immediately, outside the schedule, and wait for the result.
    pub async fn run_scraping_now(&self) -> JobReport {
        scrape_sources_job(&self.ctx).await
    }

    pub async fn run_processing_now(&self, max_items: u32) -> JobReport {
        process_pending_job(&self.ctx, max_items).await
    }

    /// Queue a run of a scheduled job on its own task.
    pub async fn trigger_job(&self, job_id: &str) -> Result<()> {
        self.scheduler.run_now(job_id).await
    }

    pub async fn job_status(&self) -> JobStatus {
        let jobs = self.scheduler.list_jobs().await;
        JobStatus {
            scheduler_running: !jobs.is_empty(),
            jobs,
        }
    }

    pub async fn pause_job(&self, job_id: &str) -> Result<()> {
        self.scheduler.pause(job_id).await
    }

    pub async fn resume_job(&self, job_id: &str) -> Result<()> {
        self.scheduler.resume(job_id).await
    }

    pub async fn remove_all_jobs(&self) -> Vec<String> {
        self.scheduler.remove_all().await
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown(Duration::from_secs(30)).await;
    }

    pub async fn data_source_status(&self, name: &str) -> Result<SourceStatus> {
        data_source_status(&self.ctx.pool, name).await
    }
}

/// Source row plus note counts by status.
pub async fn data_source_status(pool: &SqlitePool, name: &str) -> Result<SourceStatus> {
    let source = DataSource::find_by_name(pool, name)
        .await?
        .ok_or_else(|| DigestError::NotFound(format!("data source '{name}'")))?;
    let by_status = TechnicalNote::count_by_status(pool, Some(source.id)).await?;
    let get = |k: &str| by_status.get(k).copied().unwrap_or(0);
    let statistics = SourceStatistics {
        total_notes: by_status.values().sum(),
        pending_processing: get("pending"),
        processed: get("processed"),
        errors: get("error"),
        by_status: by_status.clone(),
    };
    Ok(SourceStatus {
        data_source: source,
        statistics,
    })
}
