// src/fetch/mod.rs
//! Report fetching: the source abstraction plus the cache-aware
//! "serve cache / fetch fast / backfill full" orchestration.

pub mod http;
pub mod orchestrator;

use std::time::Duration;

use anyhow::Result;

use crate::report::Report;

pub use http::HttpReportSource;
pub use orchestrator::{Dataset, DatasetOrigin, FetchOrchestrator, FetchPlan, LoadOutcome};

/// Upstream that returns the newest `limit` reports.
#[async_trait::async_trait]
pub trait ReportSource: Send + Sync {
    async fn fetch_reports(&self, limit: usize, timeout: Duration) -> Result<Vec<Report>>;
    fn name(&self) -> &'static str;
}
