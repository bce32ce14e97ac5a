// src/fetch/http.rs
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::ReportSource;
use crate::report::Report;

/// `GET {base_url}{path}?limit=N` over reqwest.
pub struct HttpReportSource {
    http: reqwest::Client,
    url: String,
}

// --- tolerant response shapes ---

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReportsAny {
    Bare(Vec<Report>),
    Wrapped { data: Vec<Report> },
    Named { reports: Vec<Report> },
}

impl ReportsAny {
    fn into_reports(self) -> Vec<Report> {
        match self {
            ReportsAny::Bare(v) | ReportsAny::Wrapped { data: v } | ReportsAny::Named { reports: v } => v,
        }
    }
}

pub(crate) fn parse_reports_body(body: &str) -> Result<Vec<Report>> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let any: ReportsAny = serde_json::from_str(trimmed).context("parse /reports JSON")?;
    Ok(any.into_reports())
}

impl HttpReportSource {
    /// `path` is the report endpoint relative to `base_url` (e.g. `/reports`).
    pub fn new(base_url: &str, path: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("flood-report-pipeline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .build()
            .context("building reqwest client")?;
        let base = base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Ok(Self {
            http,
            url: format!("{base}/{path}"),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl ReportSource for HttpReportSource {
    async fn fetch_reports(&self, limit: usize, timeout: Duration) -> Result<Vec<Report>> {
        let url = self.endpoint();
        let resp = self
            .http
            .get(url)
            .query(&[("limit", limit)])
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("GET {url} returned {status}");
        }
        let body = resp
            .text()
            .await
            .with_context(|| format!("read body of {url}"))?;
        parse_reports_body(&body)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
