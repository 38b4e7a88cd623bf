// src/metrics.rs
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

impl Metrics {
    /// Install the Prometheus recorder once per process and describe every series.
    /// Later calls reuse the first handle.
    pub fn init() -> anyhow::Result<Self> {
        let handle = HANDLE.get_or_try_init(|| PrometheusBuilder::new().install_recorder())?;
        ensure_metrics_described();
        Ok(Self {
            handle: handle.clone(),
        })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Router exposing `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "scrape_items_found_total",
            "Document links found on listing pages."
        );
        describe_counter!("scrape_new_items_total", "Technical notes stored as new.");
        describe_counter!(
            "scrape_duplicates_total",
            "Items skipped as already known (url or content hash)."
        );
        describe_counter!("scrape_errors_total", "Listing or item scrape failures.");
        describe_histogram!("scrape_run_ms", "Duration of one source scrape in milliseconds.");
        describe_counter!("summaries_created_total", "Summaries written.");
        describe_counter!("summarize_errors_total", "Notes that ended in error status.");
        describe_histogram!("summarize_ms", "Model call latency in milliseconds.");
        describe_counter!("job_runs_total", "Job runs by job id and outcome.");
        describe_gauge!("job_last_run_ts", "Unix ts of the last finished run per job.");
    });
}
