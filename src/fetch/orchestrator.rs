// src/fetch/orchestrator.rs
//! Stale-then-refresh fetching.
//!
//! Initial load: serve the cache if fresh; otherwise fetch a small batch
//! quickly, and after a short delay backfill the full batch. A failed
//! backfill is logged and dropped; the fast batch stays on screen. Normal
//! refreshes fetch the full batch directly.
//!
//! Every request carries a generation number; a response older than the
//! dataset already displayed is ignored, so a late fast response can never
//! roll back a full one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::Result;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::ReportSource;
use crate::cache::{cache_key, ResponseCache};
use crate::metrics::ensure_metrics_described;
use crate::report::Report;
use crate::schedule::ScheduledTask;

/// Sizes, timeouts and delays for the fetch sequence.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FetchPlan {
    pub endpoint: String,
    pub fast_limit: usize,
    pub full_limit: usize,
    pub fast_timeout_ms: u64,
    pub full_timeout_ms: u64,
    pub backfill_delay_ms: u64,
    pub cache_ttl_ms: u64,
}

impl Default for FetchPlan {
    fn default() -> Self {
        Self {
            endpoint: "/reports".to_string(),
            fast_limit: 50,
            full_limit: 200,
            fast_timeout_ms: 5_000,
            full_timeout_ms: 20_000,
            backfill_delay_ms: 1_500,
            cache_ttl_ms: 120_000,
        }
    }
}

impl FetchPlan {
    fn full_key(&self) -> String {
        cache_key(&self.endpoint, &[("limit", &self.full_limit.to_string())])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetOrigin {
    Cache,
    Fast,
    Full,
}

/// The report array currently on screen.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub reports: Arc<Vec<Report>>,
    pub generation: u64,
    pub origin: DatasetOrigin,
}

#[derive(Debug)]
pub enum LoadOutcome {
    /// Served from cache; nothing fetched.
    CacheHit { count: usize },
    /// Fast batch requested; the backfill runs in `backfill`.
    Staged {
        fast: Option<usize>,
        backfill: ScheduledTask,
    },
}

struct Inner {
    source: Arc<dyn ReportSource>,
    plan: FetchPlan,
    cache: Mutex<ResponseCache<Arc<Vec<Report>>>>,
    displayed: RwLock<Option<Dataset>>,
    next_generation: AtomicU64,
}

/// Cheap to clone; clones share cache and displayed dataset.
#[derive(Clone)]
pub struct FetchOrchestrator {
    inner: Arc<Inner>,
}

impl FetchOrchestrator {
    pub fn new(source: Arc<dyn ReportSource>, plan: FetchPlan) -> Self {
        Self::with_cache(source, plan, ResponseCache::new())
    }

    pub fn with_cache(
        source: Arc<dyn ReportSource>,
        plan: FetchPlan,
        cache: ResponseCache<Arc<Vec<Report>>>,
    ) -> Self {
        ensure_metrics_described();
        Self {
            inner: Arc::new(Inner {
                source,
                plan,
                cache: Mutex::new(cache),
                displayed: RwLock::new(None),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn plan(&self) -> &FetchPlan {
        &self.inner.plan
    }

    /// Currently displayed dataset, if any.
    pub fn displayed(&self) -> Option<Dataset> {
        self.inner
            .displayed
            .read()
            .expect("displayed rwlock poisoned")
            .clone()
    }

    pub fn displayed_reports(&self) -> Arc<Vec<Report>> {
        self.displayed()
            .map(|d| d.reports)
            .unwrap_or_default()
    }

    fn next_generation(&self) -> u64 {
        self.inner.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    /// Replace the displayed dataset unless a newer generation is already shown.
    pub(crate) fn apply(&self, generation: u64, reports: Arc<Vec<Report>>, origin: DatasetOrigin) -> bool {
        let mut slot = self
            .inner
            .displayed
            .write()
            .expect("displayed rwlock poisoned");
        if let Some(cur) = slot.as_ref() {
            if cur.generation > generation {
                debug!(
                    target: "fetch",
                    stale = generation,
                    current = cur.generation,
                    ?origin,
                    "ignoring superseded response"
                );
                counter!("fetch_stale_responses_total").increment(1);
                return false;
            }
        }
        *slot = Some(Dataset {
            reports,
            generation,
            origin,
        });
        true
    }

    fn cache_full(&self, reports: Arc<Vec<Report>>) {
        let ttl = Duration::from_millis(self.inner.plan.cache_ttl_ms);
        let key = self.inner.plan.full_key();
        self.inner
            .cache
            .lock()
            .expect("cache mutex poisoned")
            .set(key, reports, ttl);
    }

    async fn fetch(&self, limit: usize, timeout_ms: u64, stage: &'static str) -> Result<Arc<Vec<Report>>> {
        counter!("fetch_requests_total", "stage" => stage).increment(1);
        let res = self
            .inner
            .source
            .fetch_reports(limit, Duration::from_millis(timeout_ms))
            .await;
        if res.is_err() {
            counter!("fetch_failures_total", "stage" => stage).increment(1);
        }
        res.map(Arc::new)
    }

    /// First load for a view.
    pub async fn initial_load(&self) -> LoadOutcome {
        let key = self.inner.plan.full_key();
        let cached = self.inner.cache.lock().expect("cache mutex poisoned").get(&key);
        if let Some(reports) = cached {
            counter!("fetch_cache_hits_total").increment(1);
            let count = reports.len();
            let generation = self.next_generation();
            self.apply(generation, reports, DatasetOrigin::Cache);
            debug!(target: "fetch", count, "served from cache");
            return LoadOutcome::CacheHit { count };
        }

        let fast_gen = self.next_generation();
        let full_gen = self.next_generation();

        let this = self.clone();
        let backfill = ScheduledTask::after(
            "backfill",
            Duration::from_millis(self.inner.plan.backfill_delay_ms),
            async move {
                this.backfill(full_gen).await;
            },
        );

        let plan = &self.inner.plan;
        let fast = match self.fetch(plan.fast_limit, plan.fast_timeout_ms, "fast").await {
            Ok(reports) => {
                let n = reports.len();
                if self.apply(fast_gen, reports, DatasetOrigin::Fast) {
                    info!(target: "fetch", count = n, "fast batch loaded");
                }
                Some(n)
            }
            Err(e) => {
                warn!(target: "fetch", error = %format!("{e:#}"), "fast fetch failed");
                None
            }
        };

        LoadOutcome::Staged { fast, backfill }
    }

    async fn backfill(&self, generation: u64) {
        let plan = &self.inner.plan;
        match self.fetch(plan.full_limit, plan.full_timeout_ms, "full").await {
            Ok(reports) => {
                let n = reports.len();
                self.cache_full(reports.clone());
                if self.apply(generation, reports, DatasetOrigin::Full) {
                    info!(target: "fetch", count = n, "full batch backfilled");
                }
            }
            Err(e) => {
                // fast batch stays authoritative until the next refresh
                warn!(target: "fetch", error = %format!("{e:#}"), "backfill failed; keeping fast batch");
            }
        }
    }

    /// Periodic refresh: full batch directly, no staging.
    pub async fn refresh(&self) -> Result<usize> {
        let generation = self.next_generation();
        let plan = &self.inner.plan;
        match self.fetch(plan.full_limit, plan.full_timeout_ms, "refresh").await {
            Ok(reports) => {
                let n = reports.len();
                self.cache_full(reports.clone());
                self.apply(generation, reports, DatasetOrigin::Full);
                debug!(target: "fetch", count = n, "refreshed");
                Ok(n)
            }
            Err(e) => {
                warn!(target: "fetch", error = %format!("{e:#}"), "refresh failed; keeping previous dataset");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use std::sync::atomic::AtomicUsize;

    /// Returns `limit` synthetic reports; fails the full batch when asked to.
    struct FakeSource {
        fail_full: bool,
        calls: AtomicUsize,
        fast_delay: Duration,
        full_delay: Duration,
    }

    impl FakeSource {
        fn new(fail_full: bool) -> Self {
            Self {
                fail_full,
                calls: AtomicUsize::new(0),
                fast_delay: Duration::ZERO,
                full_delay: Duration::ZERO,
            }
        }
    }

    #[async_trait::async_trait]
    impl ReportSource for FakeSource {
        async fn fetch_reports(&self, limit: usize, _timeout: Duration) -> Result<Vec<Report>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if limit > 50 {
                tokio::time::sleep(self.full_delay).await;
                if self.fail_full {
                    anyhow::bail!("upstream 503");
                }
            } else {
                tokio::time::sleep(self.fast_delay).await;
            }
            Ok((0..limit).map(|i| Report::new(i.to_string(), "t")).collect())
        }
        fn name(&self) -> &'static str {
            "fake"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn miss_loads_fast_then_backfills_full() {
        let orch = FetchOrchestrator::new(Arc::new(FakeSource::new(false)), FetchPlan::default());
        let outcome = orch.initial_load().await;
        assert!(matches!(outcome, LoadOutcome::Staged { fast: Some(50), .. }));
        assert_eq!(orch.displayed().unwrap().origin, DatasetOrigin::Fast);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let d = orch.displayed().unwrap();
        assert_eq!(d.origin, DatasetOrigin::Full);
        assert_eq!(d.reports.len(), 200);

        // second load is a cache hit
        let again = orch.initial_load().await;
        assert!(matches!(again, LoadOutcome::CacheHit { count: 200 }));
        drop(outcome);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_backfill_keeps_fast_batch() {
        let orch = FetchOrchestrator::new(Arc::new(FakeSource::new(true)), FetchPlan::default());
        let _outcome = orch.initial_load().await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        let d = orch.displayed().unwrap();
        assert_eq!(d.origin, DatasetOrigin::Fast);
        assert_eq!(d.reports.len(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn late_fast_batch_does_not_replace_full() {
        let source = FakeSource {
            fast_delay: Duration::from_secs(5),
            full_delay: Duration::from_millis(200),
            ..FakeSource::new(false)
        };
        let orch = FetchOrchestrator::new(Arc::new(source), FetchPlan::default());
        // backfill fires at 1.5 s and lands at 1.7 s, the fast batch at 5 s
        let outcome = orch.initial_load().await;
        assert!(matches!(outcome, LoadOutcome::Staged { fast: Some(50), .. }));
        let d = orch.displayed().unwrap();
        assert_eq!(d.origin, DatasetOrigin::Full);
        assert_eq!(d.reports.len(), 200);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(orch.displayed().unwrap().origin, DatasetOrigin::Full);
    }

    #[tokio::test]
    async fn stale_generation_is_ignored() {
        let orch = FetchOrchestrator::new(Arc::new(FakeSource::new(false)), FetchPlan::default());
        let full = Arc::new(vec![Report::new("a", "x"), Report::new("b", "y")]);
        let fast = Arc::new(vec![Report::new("a", "x")]);
        assert!(orch.apply(2, full, DatasetOrigin::Full));
        assert!(!orch.apply(1, fast, DatasetOrigin::Fast));
        assert_eq!(orch.displayed_reports().len(), 2);
    }

    #[tokio::test]
    async fn refresh_skips_fast_stage_and_expired_cache_misses() {
        let clock = ManualClock::at(0);
        let source = Arc::new(FakeSource::new(false));
        let orch = FetchOrchestrator::with_cache(
            source.clone(),
            FetchPlan::default(),
            ResponseCache::with_clock(Arc::new(clock.clone())),
        );
        assert_eq!(orch.refresh().await.unwrap(), 200);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_millis(FetchPlan::default().cache_ttl_ms));
        let outcome = orch.initial_load().await;
        assert!(matches!(outcome, LoadOutcome::Staged { .. }));
    }

    #[tokio::test]
    async fn refresh_failure_retains_previous_dataset() {
        let orch = FetchOrchestrator::new(Arc::new(FakeSource::new(true)), FetchPlan::default());
        orch.apply(1, Arc::new(vec![Report::new("keep", "x")]), DatasetOrigin::Fast);
        assert!(orch.refresh().await.is_err());
        assert_eq!(orch.displayed_reports()[0].id, "keep");
    }
}
