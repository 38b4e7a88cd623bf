// src/cli.rs
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use tracing::info;

use crate::api::{self, AppState};
use crate::config::AppConfig;
use crate::db::{
    self,
    models::{DataSource, NoteFilter, NoteStatus, ProcessedSummary, ProcessingLog, TechnicalNote},
};
use crate::jobs::{self, AppContext, JobManager, JobReport};
use crate::metrics::Metrics;
use crate::summarize::build_summarizer;

pub const HELP: &str = include_str!("cli_help.txt");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Serve,
    Scrape { source: Option<String> },
    Process { max: Option<u32> },
    Pipeline,
    Requeue { id: i64 },
    Status,
    Stats,
    Sources,
    Notes { status: Option<NoteStatus>, limit: i64 },
    Show { id: i64 },
    Impact { id: i64 },
    Health,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    pub config: Option<PathBuf>,
    pub command: Command,
}

/// Parse arguments (without the program name).
pub fn parse_args<I>(args: I) -> Result<Cli>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut config = None;
    let mut command: Option<String> = None;
    let mut positional: Option<String> = None;
    let mut source = None;
    let mut max = None;
    let mut status = None;
    let mut limit = 20i64;

    while let Some(a) = args.next() {
        match a.as_str() {
            "--config" => {
                let v = args.next().ok_or_else(|| anyhow!("Missing value for --config"))?;
                config = Some(PathBuf::from(v));
            }
            "--source" => {
                source = Some(args.next().ok_or_else(|| anyhow!("Missing value for --source"))?)
            }
            "--max" => {
                let v = args.next().ok_or_else(|| anyhow!("Missing value for --max"))?;
                max = Some(v.parse::<u32>().with_context(|| format!("Invalid --max: {v}"))?);
            }
            "--status" => {
                let v = args.next().ok_or_else(|| anyhow!("Missing value for --status"))?;
                status = Some(v.parse::<NoteStatus>()?);
            }
            "--limit" => {
                let v = args.next().ok_or_else(|| anyhow!("Missing value for --limit"))?;
                limit = v.parse::<i64>().with_context(|| format!("Invalid --limit: {v}"))?;
            }
            "-h" | "--help" => {
                return Ok(Cli {
                    config,
                    command: Command::Help,
                })
            }
            flag if flag.starts_with('-') => bail!("Unknown arg: {flag}"),
            _ if command.is_none() => command = Some(a),
            _ if positional.is_none() => positional = Some(a),
            _ => bail!("Unexpected argument: {a}"),
        }
    }

    let id = |what: &str| -> Result<i64> {
        positional
            .as_deref()
            .ok_or_else(|| anyhow!("{what} needs a note id"))?
            .parse::<i64>()
            .with_context(|| format!("Invalid note id for {what}"))
    };

    let command = match command.as_deref() {
        None => Command::Help,
        Some("serve") => Command::Serve,
        Some("scrape") => Command::Scrape { source },
        Some("process") => Command::Process { max },
        Some("pipeline") => Command::Pipeline,
        Some("requeue") => Command::Requeue { id: id("requeue")? },
        Some("status") => Command::Status,
        Some("stats") => Command::Stats,
        Some("sources") => Command::Sources,
        Some("notes") => Command::Notes {
            status,
            limit: limit.max(1),
        },
        Some("show") => Command::Show { id: id("show")? },
        Some("impact") => Command::Impact { id: id("impact")? },
        Some("health") => Command::Health,
        Some(other) => bail!("Unknown command: {other}"),
    };
    Ok(Cli { config, command })
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    match &cli.config {
        Some(p) => AppConfig::load_from(p),
        None => AppConfig::load_default(),
    }
}

/// Open the database, make sure configured sources exist and build the summarizer.
pub async fn build_context(config: AppConfig) -> Result<AppContext> {
    let pool = db::connect(&config.database_url)
        .await
        .with_context(|| format!("opening database {}", config.database_url))?;
    jobs::sync_sources(&pool, &config).await.context("syncing data sources")?;
    let summarizer = build_summarizer(&config.summarizer).context("building summarizer")?;
    Ok(AppContext::new(pool, config, summarizer))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn finish_report(report: &JobReport) -> Result<()> {
    print_json(report)?;
    if report.success {
        Ok(())
    } else {
        bail!(
            "{} failed: {}",
            report.job_id,
            report.error.as_deref().unwrap_or("unknown error")
        )
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    if cli.command == Command::Help {
        println!("{HELP}");
        return Ok(());
    }

    let config = load_config(&cli)?;
    if cli.command == Command::Serve {
        return serve(config).await;
    }
    let ctx = build_context(config).await?;

    match cli.command {
        Command::Scrape { source: Some(name) } => {
            finish_report(&jobs::scrape_source_job(&ctx, &name).await)
        }
        Command::Scrape { source: None } => finish_report(&jobs::scrape_sources_job(&ctx).await),
        Command::Process { max } => {
            let max = max.unwrap_or(ctx.config.jobs.process_max_items);
            finish_report(&jobs::process_pending_job(&ctx, max).await)
        }
        Command::Pipeline => finish_report(&jobs::full_pipeline_job(&ctx).await),
        Command::Health => finish_report(&jobs::health_check_job(&ctx).await),
        Command::Requeue { id } => {
            if TechnicalNote::requeue(&ctx.pool, id).await? {
                println!("note {id} is pending again");
                Ok(())
            } else {
                bail!("note {id} is not in error status")
            }
        }
        Command::Status => {
            let mut sources = Vec::new();
            for src in DataSource::list(&ctx.pool).await? {
                sources.push(jobs::data_source_status(&ctx.pool, &src.name).await?);
            }
            let recent = db::models::JobExecution::recent(&ctx.pool, None, 10).await?;
            print_json(&serde_json::json!({
                "sources": sources,
                "recent_jobs": recent,
            }))
        }
        Command::Stats => print_json(&ctx.processor().processing_stats().await?),
        Command::Sources => {
            for s in DataSource::list(&ctx.pool).await? {
                println!(
                    "{:>4}  {:<6} {:<5} {}  {}",
                    s.id,
                    if s.is_active { "active" } else { "off" },
                    s.content_type.as_str(),
                    s.name,
                    s.url
                );
            }
            Ok(())
        }
        Command::Notes { status, limit } => {
            let filter = NoteFilter {
                source_id: None,
                status,
                limit: Some(limit),
            };
            for n in TechnicalNote::list(&ctx.pool, &filter).await? {
                let date = n
                    .publication_date
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".into());
                println!("{:>5}  {:<10} {:<10}  {}", n.id, n.status, date, n.title);
            }
            Ok(())
        }
        Command::Show { id } => {
            let note = TechnicalNote::find_by_id(&ctx.pool, id)
                .await?
                .ok_or_else(|| anyhow!("technical note {id} not found"))?;
            let summary = ProcessedSummary::find_by_note(&ctx.pool, id).await?;
            let logs = ProcessingLog::list_for_note(&ctx.pool, id).await?;
            print_json(&serde_json::json!({ "note": note, "summary": summary, "logs": logs }))
        }
        Command::Impact { id } => print_json(&ctx.processor().analyze_impact(id).await?),
        Command::Serve | Command::Help => Ok(()),
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    let metrics = Metrics::init()?;
    let bind = config.bind.clone();
    let jobs_enabled = config.jobs.enabled;
    let ctx = build_context(config).await?;

    let manager = Arc::new(JobManager::new(ctx.clone()));
    if jobs_enabled {
        manager.setup_default_jobs().await;
    } else {
        info!("scheduled jobs disabled by config");
    }

    let app = api::router(AppState::new(ctx).with_jobs(Arc::clone(&manager)), Some(&metrics));
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(%bind, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("http server")?;

    manager.shutdown().await;
    Ok(())
}
