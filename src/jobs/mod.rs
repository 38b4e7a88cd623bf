// src/jobs/mod.rs
//! Job functions plus the scheduler that runs them.
//!
//! Every job records a `job_executions` row, bumps `job_runs_total` and
//! returns a `JobReport` instead of an error.

pub mod manager;
pub mod schedule;
pub mod scheduler;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::config::{nfe_source, AppConfig, NFE_SOURCE_NAME};
use crate::db::models::{DataSource, JobExecution, JobRunStatus};
use crate::error::{DigestError, Result};
use crate::processor::{processing_stats, Processor};
use crate::scrape::http::FetchSettings;
use crate::scrape::{fetcher_for, scrape_new_items, scraper_for, ScrapeStats};
use crate::summarize::DynSummarizer;

pub use manager::{
    data_source_status, JobManager, JobStatus, SourceStatus, PROCESSING_JOB_ID, SCRAPING_JOB_ID,
};
pub use schedule::{DaySet, Trigger};
pub use scheduler::{JobFn, JobFuture, JobInfo, JobScheduler};

/// Everything a job needs. Cheap to clone.
#[derive(Clone)]
pub struct AppContext {
    pub pool: SqlitePool,
    pub config: Arc<AppConfig>,
    pub summarizer: DynSummarizer,
}

impl AppContext {
    pub fn new(pool: SqlitePool, config: AppConfig, summarizer: DynSummarizer) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            summarizer,
        }
    }

    pub fn processor(&self) -> Processor {
        Processor::new(self.pool.clone(), Arc::clone(&self.summarizer))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub success: bool,
    pub result: Value,
    pub error: Option<String>,
    pub execution_time: f64,
    pub timestamp: DateTime<Utc>,
}

impl JobReport {
    pub fn ok(job_id: &str, result: Value, execution_time: f64) -> Self {
        Self {
            job_id: job_id.to_string(),
            success: true,
            result,
            error: None,
            execution_time,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(job_id: &str, error: String, result: Value, execution_time: f64) -> Self {
        Self {
            job_id: job_id.to_string(),
            success: false,
            result,
            error: Some(error),
            execution_time,
            timestamp: Utc::now(),
        }
    }
}

/// Run `work` as job `job_id`, bracketing it with a `job_executions` row.
async fn tracked<F>(pool: &SqlitePool, job_id: &str, job_name: &str, work: F) -> JobReport
where
    F: Future<Output = Result<Value>>,
{
    let t0 = Instant::now();
    info!(job_id, "job started");

    let exec_id = match JobExecution::start(pool, job_id, job_name).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(job_id, error = %e, "could not record job start");
            None
        }
    };

    let outcome = work.await;
    let secs = t0.elapsed().as_secs_f64();
    let report = match outcome {
        Ok(result) => JobReport::ok(job_id, result, secs),
        Err(e) => {
            error!(job_id, error = %e, "job failed");
            JobReport::failed(job_id, e.to_string(), Value::Null, secs)
        }
    };

    if let Some(id) = exec_id {
        let status = if report.success {
            JobRunStatus::Success
        } else {
            JobRunStatus::Failed
        };
        if let Err(e) =
            JobExecution::finish(pool, id, status, secs, &report.result, report.error.as_deref())
                .await
        {
            warn!(job_id, error = %e, "could not record job finish");
        }
    }

    let status = if report.success { "success" } else { "failed" };
    counter!("job_runs_total", "job" => job_id.to_string(), "status" => status).increment(1);
    gauge!("job_last_run_ts", "job" => job_id.to_string()).set(Utc::now().timestamp() as f64);
    info!(job_id, success = report.success, secs, "job finished");
    report
}

/// Write every configured source to its row. The config decides `is_active`;
/// there is no other switch for a configured source.
pub async fn sync_sources(pool: &SqlitePool, config: &AppConfig) -> Result<Vec<DataSource>> {
    let mut out = Vec::with_capacity(config.sources.len());
    for src in &config.sources {
        out.push(DataSource::upsert(pool, &src.to_new()).await?);
    }
    Ok(out)
}

async fn resolve_source(ctx: &AppContext, name: &str) -> Result<DataSource> {
    if let Some(src) = DataSource::find_by_name(&ctx.pool, name).await? {
        return Ok(src);
    }
    if let Some(cfg) = ctx.config.sources.iter().find(|s| s.name == name) {
        return DataSource::ensure(&ctx.pool, &cfg.to_new()).await;
    }
    if name == NFE_SOURCE_NAME {
        info!("creating built-in source {NFE_SOURCE_NAME}");
        return DataSource::ensure(&ctx.pool, &nfe_source().to_new()).await;
    }
    Err(DigestError::NotFound(format!("data source '{name}'")))
}

async fn scrape_one(ctx: &AppContext, name: &str) -> Result<ScrapeStats> {
    let source = resolve_source(ctx, name).await?;
    if !source.is_active {
        return Err(DigestError::Validation(format!(
            "data source '{}' is inactive",
            source.name
        )));
    }
    let scraper = scraper_for(&source)?;
    let fetcher = fetcher_for(scraper.as_ref(), FetchSettings::from(&ctx.config.http))?;
    scrape_new_items(
        &ctx.pool,
        &fetcher,
        &scraper,
        &source,
        ctx.config.http.max_pdf_pages,
    )
    .await
}

/// Scrape a single source by name.
pub async fn scrape_source_job(ctx: &AppContext, source_name: &str) -> JobReport {
    tracked(&ctx.pool, "scrape_source", "Scrape data source", async {
        let stats = scrape_one(ctx, source_name).await?;
        Ok(json!({ "source": source_name, "stats": stats }))
    })
    .await
}

async fn scrape_active(ctx: &AppContext) -> Result<Value> {
    for src in &ctx.config.sources {
        DataSource::ensure(&ctx.pool, &src.to_new()).await?;
    }
    let names: Vec<String> = DataSource::list(&ctx.pool)
        .await?
        .into_iter()
        .filter(|s| s.is_active)
        .map(|s| s.name)
        .collect();
    if names.is_empty() {
        return Err(DigestError::Validation("no active data sources".into()));
    }

    let mut per_source = serde_json::Map::new();
    let mut failures = Vec::new();
    for name in &names {
        match scrape_one(ctx, name).await {
            Ok(stats) => {
                per_source.insert(name.clone(), json!(stats));
            }
            Err(e) => {
                warn!(source = %name, error = %e, "source scrape failed");
                per_source.insert(name.clone(), json!({ "error": e.to_string() }));
                failures.push(name.clone());
            }
        }
    }
    if failures.len() == names.len() {
        return Err(DigestError::Scrape(format!(
            "every source failed: {}",
            failures.join(", ")
        )));
    }
    Ok(Value::Object(per_source))
}

/// Scrape every active source. Fails only if all of them fail.
pub async fn scrape_sources_job(ctx: &AppContext) -> JobReport {
    tracked(&ctx.pool, SCRAPING_JOB_ID, "Scrape technical notes", scrape_active(ctx)).await
}

/// Summarize up to `max_items` pending notes.
pub async fn process_pending_job(ctx: &AppContext, max_items: u32) -> JobReport {
    tracked(&ctx.pool, PROCESSING_JOB_ID, "Process pending technical notes", async {
        let stats = ctx.processor().process_pending(Some(i64::from(max_items))).await?;
        Ok(json!(stats))
    })
    .await
}

/// Scrape, then process. Processing is skipped when scraping failed.
pub async fn full_pipeline_job(ctx: &AppContext) -> JobReport {
    tracked(&ctx.pool, "full_pipeline", "Full pipeline", async {
        let scraping = scrape_active(ctx).await.map_err(|e| DigestError::Job {
            job_id: "full_pipeline".into(),
            message: format!("scraping step failed, processing skipped: {e}"),
        })?;
        let limit = i64::from(ctx.config.jobs.pipeline_max_items);
        let processing = ctx.processor().process_pending(Some(limit)).await?;
        Ok(json!({ "scraping": scraping, "processing": processing }))
    })
    .await
}

/// Database reachability plus processing counters.
pub async fn health_check_job(ctx: &AppContext) -> JobReport {
    tracked(&ctx.pool, "health_check", "Health check", async {
        crate::db::ping(&ctx.pool).await?;
        let stats = processing_stats(&ctx.pool).await?;
        Ok(json!({
            "database": "ok",
            "summarizer": ctx.summarizer.model_name(),
            "stats": stats,
        }))
    })
    .await
}
