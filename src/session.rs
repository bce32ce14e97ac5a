// src/session.rs
//! Explicitly owned session context.
//!
//! A `Session` owns everything that outlives a single pipeline pass: the
//! fetch orchestrator (cache + displayed dataset), the last pinned report,
//! memoized cluster indexes and the recurring tasks. `init` starts it,
//! `dispose` cancels every task it started. Nothing here is global.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cluster::{
    points_from_reports, Bounds, ClusterIndex, ClusterOptions, ClusterPoint, ExpansionTarget,
    FeatureCollection, IndexMemo,
};
use crate::config::PipelineConfig;
use crate::fetch::{FetchOrchestrator, FetchPlan, HttpReportSource, LoadOutcome, ReportSource};
use crate::pin::{PinChange, PinTracker};
use crate::pipeline::{run_pipeline, ListQuery, ListView, PipelineOutput};
use crate::relevance::RelevanceRules;
use crate::report::Report;
use crate::schedule::ScheduledTask;
use crate::store::{get_json, set_json, JsonFileStore, KeyValueStore, MemoryStore};
use crate::summary::{build_summarizer, Summarizer, Summary, SummaryCache};

const SAVED_FILTERS_KEY: &str = "list_filters";

/// Recurring task periods.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimers {
    pub refresh: Duration,
    pub pin: Duration,
    pub summary: Duration,
}

impl Default for SessionTimers {
    fn default() -> Self {
        Self {
            refresh: Duration::from_secs(30),
            pin: Duration::from_secs(crate::pin::PIN_REEVALUATE_SECS),
            summary: Duration::from_secs(crate::summary::SUMMARY_TTL_SECS),
        }
    }
}

/// Collaborators a session is built from.
pub struct SessionDeps {
    pub source: Arc<dyn ReportSource>,
    pub rules: RelevanceRules,
    pub summarizer: Arc<dyn Summarizer>,
    pub store: Arc<dyn KeyValueStore>,
    pub plan: FetchPlan,
    pub cluster: ClusterOptions,
    pub timers: SessionTimers,
    pub summary_ttl: Duration,
}

impl SessionDeps {
    /// Production wiring from config: HTTP source, rules file, env-selected
    /// summarizer, file- or memory-backed store.
    pub fn from_config(cfg: &PipelineConfig) -> Result<Self> {
        let source = HttpReportSource::new(&cfg.reports_base_url, &cfg.fetch.endpoint)
            .with_context(|| format!("report source for {}", cfg.reports_base_url))?;
        let rules = match &cfg.relevance_config_path {
            Some(p) => RelevanceRules::load_from_file(p),
            None => RelevanceRules::load_default(),
        };
        let store: Arc<dyn KeyValueStore> = match &cfg.store_path {
            Some(p) => Arc::new(JsonFileStore::new(p)),
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Self {
            source: Arc::new(source),
            rules,
            summarizer: build_summarizer(),
            store,
            plan: cfg.fetch.clone(),
            cluster: cfg.cluster,
            timers: SessionTimers {
                refresh: cfg.refresh_interval(),
                pin: cfg.pin_interval(),
                summary: cfg.summary_interval(),
            },
            summary_ttl: cfg.summary_ttl(),
        })
    }
}

/// Saved list-view filters, persisted through the key-value store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SavedFilters {
    pub radius_km: Option<f64>,
    pub feed_only: bool,
}

struct Derived {
    generation: u64,
    output: Arc<PipelineOutput>,
}

/// Shared state; recurring tasks hold an `Arc` to it.
pub struct SessionState {
    orchestrator: FetchOrchestrator,
    rules: RelevanceRules,
    pin: RwLock<PinTracker>,
    memo: Mutex<IndexMemo>,
    derived: RwLock<Option<Derived>>,
    extra_collections: RwLock<BTreeMap<String, Vec<ClusterPoint>>>,
    summary: SummaryCache,
    store: Arc<dyn KeyValueStore>,
}

impl SessionState {
    pub fn orchestrator(&self) -> &FetchOrchestrator {
        &self.orchestrator
    }

    pub fn rules(&self) -> &RelevanceRules {
        &self.rules
    }

    /// Pipeline output for the displayed dataset; recomputed only when the
    /// dataset generation changes. A recompute also re-evaluates the pin, so
    /// the pinned report always belongs to the displayed dataset.
    pub fn output(&self) -> Arc<PipelineOutput> {
        let Some(dataset) = self.orchestrator.displayed() else {
            return Arc::new(PipelineOutput::default());
        };
        if let Some(d) = self.derived.read().expect("derived rwlock poisoned").as_ref() {
            if d.generation == dataset.generation {
                return d.output.clone();
            }
        }
        let output = Arc::new(run_pipeline(&dataset.reports, &self.rules));
        {
            let mut slot = self.derived.write().expect("derived rwlock poisoned");
            // another caller may have stored a newer generation meanwhile
            if slot.as_ref().is_some_and(|d| d.generation >= dataset.generation) {
                return output;
            }
            *slot = Some(Derived {
                generation: dataset.generation,
                output: output.clone(),
            });
        }
        debug!(target: "session", generation = dataset.generation, "dataset changed; re-evaluating pin");
        self.pin
            .write()
            .expect("pin rwlock poisoned")
            .reevaluate(&output.reports, &self.rules);
        output
    }

    pub fn list(&self, query: &ListQuery) -> ListView {
        self.output().list(query)
    }

    /// Current pinned report. Re-evaluated on every dataset change and on
    /// the pin timer.
    pub fn pinned(&self) -> Option<Report> {
        self.output();
        self.pin.read().expect("pin rwlock poisoned").current().cloned()
    }

    pub fn reevaluate_pin(&self) -> PinChange {
        let output = self.output();
        self.pin
            .write()
            .expect("pin rwlock poisoned")
            .reevaluate(&output.reports, &self.rules)
    }

    /// Register or replace a collection that does not come from the report
    /// feed (e.g. relief offers).
    pub fn set_collection(&self, name: impl Into<String>, points: Vec<ClusterPoint>) {
        self.extra_collections
            .write()
            .expect("collections rwlock poisoned")
            .insert(name.into(), points);
    }

    /// `set_collection` from reports; reports without coordinates are skipped.
    pub fn set_report_collection(&self, name: impl Into<String>, reports: &[Report]) {
        self.set_collection(name, points_from_reports(reports));
    }

    pub fn collection_names(&self) -> Vec<String> {
        let output = self.output();
        let mut names: Vec<String> = output.collections.keys().map(|k| k.to_string()).collect();
        let extra = self.extra_collections.read().expect("collections rwlock poisoned");
        names.extend(extra.keys().filter(|k| !output.collections.contains_key(k.as_str())).cloned());
        names
    }

    fn collection_points(&self, collection: &str) -> Option<Vec<ClusterPoint>> {
        if let Some(points) = self.output().collections.get(collection) {
            return Some(points.clone());
        }
        self.extra_collections
            .read()
            .expect("collections rwlock poisoned")
            .get(collection)
            .cloned()
    }

    fn index(&self, collection: &str) -> Option<Arc<crate::cluster::HierarchicalIndex>> {
        let points = self.collection_points(collection)?;
        let mut memo = self.memo.lock().expect("index memo poisoned");
        Some(memo.get_or_build(collection, points))
    }

    /// Clustered features of `collection` inside `bounds` at `zoom`; `None`
    /// for an unknown collection.
    pub fn clusters(&self, collection: &str, bounds: &Bounds, zoom: i32) -> Option<FeatureCollection> {
        let index = self.index(collection)?;
        let features = index.query(bounds, zoom);
        Some(FeatureCollection::new(collection, &features))
    }

    pub fn expand_cluster(&self, collection: &str, cluster_id: u64, zoom: i32) -> Option<ExpansionTarget> {
        self.index(collection)?.expansion_target(cluster_id, zoom)
    }

    pub fn cluster_leaves(&self, collection: &str, cluster_id: u64) -> Option<Vec<ClusterPoint>> {
        Some(self.index(collection)?.cluster_leaves(cluster_id))
    }

    /// Index builds so far (memo misses).
    pub fn cluster_builds(&self) -> u64 {
        self.memo.lock().expect("index memo poisoned").builds()
    }

    pub fn summary(&self) -> Option<Summary> {
        self.summary.current().or_else(|| self.summary.last())
    }

    pub async fn refresh_summary(&self) -> Option<Summary> {
        let output = self.output();
        self.summary.refresh(&output.feed).await
    }

    pub fn saved_filters(&self) -> SavedFilters {
        match get_json(self.store.as_ref(), SAVED_FILTERS_KEY) {
            Ok(v) => v.unwrap_or_default(),
            Err(e) => {
                warn!(target: "session", error = ?e, "saved filters unreadable; using defaults");
                SavedFilters::default()
            }
        }
    }

    pub fn save_filters(&self, filters: &SavedFilters) -> Result<()> {
        set_json(self.store.as_ref(), SAVED_FILTERS_KEY, filters)
    }

    pub fn clear_filters(&self) -> Result<()> {
        self.store.remove(SAVED_FILTERS_KEY)
    }
}

/// Owner of a `SessionState` and its recurring tasks.
pub struct Session {
    state: Arc<SessionState>,
    tasks: Mutex<Vec<ScheduledTask>>,
}

impl Session {
    /// Build the state, run the initial staged load and start the refresh,
    /// pin and summary tasks.
    pub async fn init(deps: SessionDeps) -> Self {
        let state = Arc::new(SessionState {
            orchestrator: FetchOrchestrator::new(deps.source, deps.plan),
            rules: deps.rules,
            pin: RwLock::new(PinTracker::new()),
            memo: Mutex::new(IndexMemo::new(deps.cluster)),
            derived: RwLock::new(None),
            extra_collections: RwLock::new(BTreeMap::new()),
            summary: SummaryCache::new(deps.summarizer, deps.summary_ttl),
            store: deps.store,
        });

        let mut tasks = Vec::new();
        match state.orchestrator.initial_load().await {
            LoadOutcome::CacheHit { count } => {
                debug!(target: "session", count, "initial load served from cache");
            }
            LoadOutcome::Staged { fast, backfill } => {
                debug!(target: "session", fast = ?fast, "initial load staged");
                tasks.push(backfill);
            }
        }
        state.reevaluate_pin();

        let s = state.clone();
        tasks.push(ScheduledTask::every("refresh", deps.timers.refresh, move || {
            let s = s.clone();
            async move {
                // failure already logged; previous dataset stays
                let _ = s.orchestrator.refresh().await;
            }
        }));

        let s = state.clone();
        tasks.push(ScheduledTask::every("pin", deps.timers.pin, move || {
            let s = s.clone();
            async move {
                s.reevaluate_pin();
            }
        }));

        let s = state.clone();
        tasks.push(ScheduledTask::after("summary-initial", Duration::ZERO, async move {
            s.refresh_summary().await;
        }));

        let s = state.clone();
        tasks.push(ScheduledTask::every("summary", deps.timers.summary, move || {
            let s = s.clone();
            async move {
                s.refresh_summary().await;
            }
        }));

        info!(
            target: "session",
            tasks = tasks.len(),
            refresh_secs = deps.timers.refresh.as_secs(),
            "session started"
        );
        Self {
            state,
            tasks: Mutex::new(tasks),
        }
    }

    /// `init` with production wiring from config.
    pub async fn from_config(cfg: &PipelineConfig) -> Result<Self> {
        Ok(Self::init(SessionDeps::from_config(cfg)?).await)
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// Names of tasks still running.
    pub fn active_tasks(&self) -> Vec<&'static str> {
        self.tasks
            .lock()
            .expect("tasks mutex poisoned")
            .iter()
            .filter(|t| t.is_active())
            .map(|t| t.name())
            .collect()
    }

    /// Cancel every task this session started. Idempotent.
    pub fn dispose(&self) {
        let mut tasks = self.tasks.lock().expect("tasks mutex poisoned");
        if tasks.is_empty() {
            return;
        }
        for t in tasks.iter_mut() {
            t.cancel();
        }
        let n = tasks.len();
        tasks.clear();
        info!(target: "session", cancelled = n, "session disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.tasks.lock().expect("tasks mutex poisoned").is_empty()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}
