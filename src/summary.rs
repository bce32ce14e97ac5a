// src/summary.rs
//! Bulletin summary: one expensive generated text, cached under a single key
//! for the process lifetime.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{Clock, SystemClock};
use crate::report::{Report, ReportKind};

pub const SUMMARY_TTL_SECS: u64 = 600;
const DIGEST_TOP_TITLES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    pub report_count: usize,
    pub generated_at: DateTime<Utc>,
    pub provider: String,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, reports: &[Report]) -> Result<String>;
    fn name(&self) -> &'static str;
}

/// Offline summarizer: counts per kind plus the highest-trust titles.
#[derive(Debug, Default, Clone, Copy)]
pub struct DigestSummarizer;

#[async_trait]
impl Summarizer for DigestSummarizer {
    async fn summarize(&self, reports: &[Report]) -> Result<String> {
        Ok(digest(reports))
    }

    fn name(&self) -> &'static str {
        "digest"
    }
}

pub fn digest(reports: &[Report]) -> String {
    if reports.is_empty() {
        return "Chưa có báo cáo mới.".to_string();
    }
    let mut by_kind: BTreeMap<&'static str, usize> = BTreeMap::new();
    for r in reports {
        *by_kind.entry(r.kind.as_str()).or_default() += 1;
    }
    let counts = by_kind
        .iter()
        .map(|(k, n)| format!("{k}: {n}"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut top: Vec<&Report> = reports.iter().collect();
    top.sort_by(|a, b| {
        b.trust_score
            .total_cmp(&a.trust_score)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    let titles = top
        .iter()
        .take(DIGEST_TOP_TITLES)
        .map(|r| format!("- {}", r.title.trim()))
        .collect::<Vec<_>>()
        .join("\n");

    let sos = by_kind.get(ReportKind::Sos.as_str()).copied().unwrap_or(0);
    let mut text = format!("{} báo cáo ({counts}).", reports.len());
    if sos > 0 {
        text.push_str(&format!(" {sos} yêu cầu cứu hộ đang chờ."));
    }
    text.push('\n');
    text.push_str(&titles);
    text
}

/// OpenAI chat-completions summarizer. Requires `OPENAI_API_KEY`.
pub struct OpenAiSummarizer {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiSummarizer {
    pub fn from_env(model: Option<&str>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY not set")?;
        let http = reqwest::Client::builder()
            .user_agent("flood-report-pipeline/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(30))
            .build()
            .context("building summary http client")?;
        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or("gpt-4o-mini").to_string(),
        })
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, reports: &[Report]) -> Result<String> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let input = digest(reports);
        let sys = "Bạn là biên tập viên bản tin thiên tai. Tóm tắt tình hình trong tối đa 3 câu, giọng trung tính, tiếng Việt.";
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: sys,
                },
                Msg {
                    role: "user",
                    content: &input,
                },
            ],
            temperature: 0.2,
            max_tokens: 300,
        };

        let resp: Resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("summary request")?
            .error_for_status()
            .context("summary status")?
            .json()
            .await
            .context("summary body")?;

        resp.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|s| !s.is_empty())
            .context("empty summary response")
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// `OpenAiSummarizer` when a key is configured, else the offline digest.
pub fn build_summarizer() -> Arc<dyn Summarizer> {
    match OpenAiSummarizer::from_env(None) {
        Ok(s) => {
            info!(target: "summary", "using openai summarizer");
            Arc::new(s)
        }
        Err(_) => {
            info!(target: "summary", "OPENAI_API_KEY missing; using digest summarizer");
            Arc::new(DigestSummarizer)
        }
    }
}

struct Slot {
    summary: Summary,
    stored_at_ms: u64,
}

/// Single-entry TTL cache in front of a `Summarizer`.
pub struct SummaryCache {
    summarizer: Arc<dyn Summarizer>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    slot: Mutex<Option<Slot>>,
}

impl SummaryCache {
    pub fn new(summarizer: Arc<dyn Summarizer>, ttl: Duration) -> Self {
        Self::with_clock(summarizer, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(summarizer: Arc<dyn Summarizer>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            summarizer,
            ttl,
            clock,
            slot: Mutex::new(None),
        }
    }

    /// Cached summary while fresh.
    pub fn current(&self) -> Option<Summary> {
        let now = self.clock.now_ms();
        let slot = self.slot.lock().expect("summary mutex poisoned");
        slot.as_ref()
            .filter(|s| now.saturating_sub(s.stored_at_ms) < self.ttl.as_millis() as u64)
            .map(|s| s.summary.clone())
    }

    /// Last summary regardless of age.
    pub fn last(&self) -> Option<Summary> {
        let slot = self.slot.lock().expect("summary mutex poisoned");
        slot.as_ref().map(|s| s.summary.clone())
    }

    /// Cached summary, or generate one if the cache is empty or expired.
    /// A failed generation keeps the previous summary.
    pub async fn get_or_refresh(&self, reports: &[Report]) -> Option<Summary> {
        if let Some(s) = self.current() {
            debug!(target: "summary", "cache hit");
            return Some(s);
        }
        self.refresh(reports).await
    }

    /// Generate unconditionally and store on success.
    pub async fn refresh(&self, reports: &[Report]) -> Option<Summary> {
        match self.summarizer.summarize(reports).await {
            Ok(text) => {
                let summary = Summary {
                    text,
                    report_count: reports.len(),
                    generated_at: Utc::now(),
                    provider: self.summarizer.name().to_string(),
                };
                let mut slot = self.slot.lock().expect("summary mutex poisoned");
                *slot = Some(Slot {
                    summary: summary.clone(),
                    stored_at_ms: self.clock.now_ms(),
                });
                info!(target: "summary", provider = self.summarizer.name(), reports = reports.len(), "summary refreshed");
                Some(summary)
            }
            Err(e) => {
                warn!(target: "summary", error = ?e, "summary generation failed");
                self.last()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Summarizer for Counting {
        async fn summarize(&self, reports: &[Report]) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("provider down");
            }
            Ok(format!("call {n}: {}", reports.len()))
        }
        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn reports() -> Vec<Report> {
        vec![
            Report::new("1", "Lũ quét ở Quảng Nam").with_kind(ReportKind::Alert).with_trust(0.9),
            Report::new("2", "Cần cứu hộ tại Hòa Vang").with_kind(ReportKind::Sos).with_trust(0.6),
        ]
    }

    #[tokio::test]
    async fn second_call_within_ttl_is_cached() {
        let s = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let clock = ManualClock::at(0);
        let cache = SummaryCache::with_clock(s.clone(), Duration::from_secs(600), Arc::new(clock.clone()));

        let a = cache.get_or_refresh(&reports()).await.unwrap();
        let b = cache.get_or_refresh(&reports()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(s.calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(600));
        assert!(cache.current().is_none());
        let c = cache.get_or_refresh(&reports()).await.unwrap();
        assert_eq!(c.text, "call 1: 2");
        assert_eq!(s.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_keeps_previous_and_empty_stays_none() {
        let failing = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let cache = SummaryCache::new(failing, Duration::from_secs(1));
        assert!(cache.get_or_refresh(&reports()).await.is_none());
    }

    #[test]
    fn digest_counts_kinds_and_ranks_by_trust() {
        let text = digest(&reports());
        assert!(text.starts_with("2 báo cáo (ALERT: 1, SOS: 1)."));
        assert!(text.contains("1 yêu cầu cứu hộ"));
        let first = text.lines().nth(1).unwrap();
        assert_eq!(first, "- Lũ quét ở Quảng Nam");
        assert_eq!(digest(&[]), "Chưa có báo cáo mới.");
    }
}
