//! Flood report service entrypoint.
//! Loads config, starts the session (initial fetch + recurring tasks) and
//! serves the HTTP API.

use std::sync::Arc;

use flood_pipeline::metrics::Metrics;
use flood_pipeline::{router, AppState, PipelineConfig, Session};
use shuttle_axum::ShuttleAxum;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default, JSON when `LOG_FORMAT=json`.
/// The hosting runtime may already own the global subscriber; that is not an error.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("flood_pipeline=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("global tracing subscriber already installed");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = PipelineConfig::load_or_default();
    info!(
        base_url = %cfg.reports_base_url,
        refresh_secs = cfg.refresh_interval_secs,
        "pipeline config loaded"
    );

    let session = Session::from_config(&cfg).await?;
    let mut app = router(AppState::new(Arc::new(session)));

    match Metrics::init() {
        Ok(m) => app = app.merge(m.router::<()>()),
        Err(e) => warn!(error = ?e, "metrics disabled"),
    }

    Ok(app.into())
}
