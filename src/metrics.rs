use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use shuttle_axum::axum::{routing::get, Router};

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Pipeline passes over a fetched dataset.");
        describe_counter!(
            "pipeline_duplicates_removed_total",
            "Reports collapsed into a canonical report by dedup."
        );
        describe_counter!(
            "pipeline_noise_dropped_total",
            "Reports dropped by the traffic-noise gate."
        );
        describe_counter!(
            "pipeline_feed_dropped_total",
            "Reports kept out of user-facing lists by the feed gate."
        );
        describe_counter!("fetch_requests_total", "Upstream report requests by stage.");
        describe_counter!("fetch_failures_total", "Failed upstream report requests by stage.");
        describe_counter!("fetch_cache_hits_total", "Initial loads served from cache.");
        describe_counter!(
            "fetch_stale_responses_total",
            "Responses ignored because a newer dataset was already displayed."
        );
        describe_gauge!("pipeline_reports_displayed", "Reports in the displayed dataset.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder. Fails if a recorder is already set.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router<S: Clone + Send + Sync + 'static>(&self) -> Router<S> {
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
