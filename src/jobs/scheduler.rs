// src/jobs/scheduler.rs
//! In-process job scheduler. Each job gets its own tokio task that sleeps
//! until the trigger's next fire time and listens for control commands.
//!
//! A job runs inline in its task, so a second instance can never start
//! while one is running; ticks missed during a run are dropped and the
//! next fire time is computed from the moment the run ends. The run itself
//! is spawned, so a panicking job is recorded as a failed run and the job
//! keeps its schedule.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::schedule::Trigger;
use super::JobReport;
use crate::error::{DigestError, Result};

pub type JobFuture = Pin<Box<dyn Future<Output = JobReport> + Send + 'static>>;
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

#[derive(Debug)]
enum JobCommand {
    RunNow,
    Pause,
    Resume,
    Shutdown,
}

#[derive(Default)]
struct JobState {
    paused: AtomicBool,
    running: AtomicBool,
    runs: AtomicU64,
    next_run: Mutex<Option<DateTime<Local>>>,
    last_run: Mutex<Option<LastRun>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Serialize)]
pub struct LastRun {
    pub finished_at: DateTime<Local>,
    pub success: bool,
    pub execution_time: f64,
    pub error: Option<String>,
}

/// Snapshot of one registered job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub trigger: String,
    pub next_run: Option<DateTime<Local>>,
    pub paused: bool,
    pub running: bool,
    pub runs: u64,
    pub last_run: Option<LastRun>,
}

struct JobEntry {
    name: String,
    trigger: Trigger,
    tx: mpsc::Sender<JobCommand>,
    state: Arc<JobState>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct JobScheduler {
    jobs: tokio::sync::Mutex<BTreeMap<String, JobEntry>>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register and start a job. An existing job with the same id is replaced.
    pub async fn add_job(&self, id: &str, name: &str, trigger: Trigger, job: JobFn) {
        let (tx, rx) = mpsc::channel(8);
        let state = Arc::new(JobState::default());
        let handle = tokio::spawn(run_job_loop(
            id.to_string(),
            trigger.clone(),
            job,
            Arc::clone(&state),
            rx,
        ));

        let entry = JobEntry {
            name: name.to_string(),
            trigger,
            tx,
            state,
            handle,
        };
        let old = self.jobs.lock().await.insert(id.to_string(), entry);
        if let Some(old) = old {
            let _ = old.tx.send(JobCommand::Shutdown).await;
            info!(job_id = id, "replaced existing job");
        }
        info!(job_id = id, name, "job registered");
    }

    pub async fn run_now(&self, id: &str) -> Result<()> {
        self.send(id, JobCommand::RunNow).await
    }

    pub async fn pause(&self, id: &str) -> Result<()> {
        self.send(id, JobCommand::Pause).await
    }

    pub async fn resume(&self, id: &str) -> Result<()> {
        self.send(id, JobCommand::Resume).await
    }

    /// Stop and forget one job. A run in progress is allowed to finish.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let entry = self
            .jobs
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| DigestError::NotFound(format!("job '{id}'")))?;
        let _ = entry.tx.send(JobCommand::Shutdown).await;
        info!(job_id = id, "job removed");
        Ok(())
    }

    /// Remove every job; returns the removed ids.
    pub async fn remove_all(&self) -> Vec<String> {
        let drained = std::mem::take(&mut *self.jobs.lock().await);
        for entry in drained.values() {
            let _ = entry.tx.send(JobCommand::Shutdown).await;
        }
        drained.into_keys().collect()
    }

    /// Stop every job and wait for in-flight runs to finish (bounded by `grace`).
    pub async fn shutdown(&self, grace: Duration) {
        let drained = std::mem::take(&mut *self.jobs.lock().await);
        for entry in drained.values() {
            let _ = entry.tx.send(JobCommand::Shutdown).await;
        }
        for (id, entry) in drained {
            if tokio::time::timeout(grace, entry.handle).await.is_err() {
                warn!(job_id = %id, "job did not stop within grace period");
            }
        }
        info!("scheduler stopped");
    }

    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        self.jobs
            .lock()
            .await
            .iter()
            .map(|(id, e)| info_for(id, e))
            .collect()
    }

    pub async fn job(&self, id: &str) -> Option<JobInfo> {
        self.jobs.lock().await.get(id).map(|e| info_for(id, e))
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    async fn send(&self, id: &str, cmd: JobCommand) -> Result<()> {
        let tx = self
            .jobs
            .lock()
            .await
            .get(id)
            .map(|e| e.tx.clone())
            .ok_or_else(|| DigestError::NotFound(format!("job '{id}'")))?;
        debug!(job_id = id, ?cmd, "job command");
        tx.send(cmd).await.map_err(|_| DigestError::Job {
            job_id: id.to_string(),
            message: "job task is gone".into(),
        })
    }
}

fn info_for(id: &str, e: &JobEntry) -> JobInfo {
    JobInfo {
        id: id.to_string(),
        name: e.name.clone(),
        trigger: e.trigger.to_string(),
        next_run: *lock(&e.state.next_run),
        paused: e.state.paused.load(Ordering::SeqCst),
        running: e.state.running.load(Ordering::SeqCst),
        runs: e.state.runs.load(Ordering::SeqCst),
        last_run: lock(&e.state.last_run).clone(),
    }
}

async fn run_job_loop(
    id: String,
    trigger: Trigger,
    job: JobFn,
    state: Arc<JobState>,
    mut rx: mpsc::Receiver<JobCommand>,
) {
    let state: &JobState = &state;
    let schedule_next = |state: &JobState| {
        let next = if state.paused.load(Ordering::SeqCst) {
            None
        } else {
            trigger.next_after(&Local::now())
        };
        *lock(&state.next_run) = next;
        next
    };

    let mut next = schedule_next(state);
    debug!(job_id = %id, next = ?next, "job loop started");

    loop {
        let wait = next.map(|at| (at - Local::now()).to_std().unwrap_or(Duration::ZERO));
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(JobCommand::RunNow) => {
                    execute(&id, &job, state).await;
                    next = schedule_next(state);
                }
                Some(JobCommand::Pause) => {
                    state.paused.store(true, Ordering::SeqCst);
                    next = schedule_next(state);
                    info!(job_id = %id, "job paused");
                }
                Some(JobCommand::Resume) => {
                    state.paused.store(false, Ordering::SeqCst);
                    next = schedule_next(state);
                    info!(job_id = %id, next = ?next, "job resumed");
                }
                Some(JobCommand::Shutdown) | None => break,
            },
            _ = sleep_or_forever(wait) => {
                execute(&id, &job, state).await;
                next = schedule_next(state);
            }
        }
    }
    *lock(&state.next_run) = None;
    debug!(job_id = %id, "job loop stopped");
}

async fn sleep_or_forever(wait: Option<Duration>) {
    match wait {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}

async fn execute(id: &str, job: &JobFn, state: &JobState) {
    state.running.store(true, Ordering::SeqCst);
    debug!(job_id = id, "job run started");
    let t0 = Instant::now();
    let report = match tokio::spawn(job()).await {
        Ok(report) => report,
        Err(e) => {
            error!(job_id = id, error = %e, "job run panicked");
            JobReport::failed(
                id,
                format!("job panicked: {e}"),
                serde_json::Value::Null,
                t0.elapsed().as_secs_f64(),
            )
        }
    };
    state.runs.fetch_add(1, Ordering::SeqCst);
    *lock(&state.last_run) = Some(LastRun {
        finished_at: Local::now(),
        success: report.success,
        execution_time: report.execution_time,
        error: report.error.clone(),
    });
    state.running.store(false, Ordering::SeqCst);
}
