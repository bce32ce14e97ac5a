//! # Pipeline
//! One synchronous pass over a fetched report array:
//! dedup → noise gate → {map collections, feed list, pinned report}.
//!
//! Pure apart from metrics counters; rerunning on the same input gives the
//! same output.

use std::collections::BTreeMap;

use metrics::{counter, gauge};
use serde::Serialize;
use tracing::debug;

use crate::cluster::ClusterPoint;
use crate::dedup::dedupe;
use crate::geo::within_radius;
use crate::metrics::ensure_metrics_described;
use crate::pin::select_pinned_with;
use crate::relevance::RelevanceRules;
use crate::report::{RankedReport, Report, ReportKind};

pub const COLLECTION_REQUESTS: &str = "requests";
pub const COLLECTION_ALERTS: &str = "alerts";
pub const COLLECTION_REPORTS: &str = "reports";

/// Map collection a report's pin belongs to.
pub fn collection_for(kind: ReportKind) -> &'static str {
    match kind {
        ReportKind::Sos | ReportKind::Needs => COLLECTION_REQUESTS,
        ReportKind::Alert | ReportKind::Rain => COLLECTION_ALERTS,
        ReportKind::Road | ReportKind::Other => COLLECTION_REPORTS,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub original_count: usize,
    pub deduped_count: usize,
    pub duplicates_removed: usize,
    pub noise_dropped: usize,
    pub feed_dropped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    /// Deduplicated, noise-filtered reports (map layer source).
    pub reports: Vec<Report>,
    /// Feed-worthy subset for user-facing lists.
    pub feed: Vec<Report>,
    pub pinned: Option<Report>,
    /// Points per map collection.
    pub collections: BTreeMap<&'static str, Vec<ClusterPoint>>,
    pub stats: PipelineStats,
}

pub fn run_pipeline(raw: &[Report], rules: &RelevanceRules) -> PipelineOutput {
    ensure_metrics_described();

    let deduped = dedupe(Some(raw));
    let (reports, noise_dropped) = rules.filter_noise(deduped.reports);
    let (feed, feed_dropped) = rules.feed_reports(&reports);
    let pinned = select_pinned_with(&reports, rules).cloned();

    let mut collections: BTreeMap<&'static str, Vec<ClusterPoint>> = [
        COLLECTION_REQUESTS,
        COLLECTION_ALERTS,
        COLLECTION_REPORTS,
    ]
    .into_iter()
    .map(|c| (c, Vec::new()))
    .collect();
    for r in &reports {
        if let Some(p) = ClusterPoint::from_report(r) {
            collections.entry(collection_for(r.kind)).or_default().push(p);
        }
    }

    let stats = PipelineStats {
        original_count: deduped.original_count,
        deduped_count: deduped.deduped_count,
        duplicates_removed: deduped.duplicates_removed,
        noise_dropped,
        feed_dropped,
    };

    counter!("pipeline_runs_total").increment(1);
    counter!("pipeline_duplicates_removed_total").increment(stats.duplicates_removed as u64);
    counter!("pipeline_noise_dropped_total").increment(noise_dropped as u64);
    counter!("pipeline_feed_dropped_total").increment(feed_dropped as u64);
    gauge!("pipeline_reports_displayed").set(reports.len() as f64);

    debug!(
        target: "pipeline",
        original = stats.original_count,
        deduped = stats.deduped_count,
        noise = noise_dropped,
        feed = feed.len(),
        pinned = ?pinned.as_ref().map(|p| p.id.as_str()),
        "pipeline pass"
    );

    PipelineOutput {
        reports,
        feed,
        pinned,
        collections,
        stats,
    }
}

/// Optional list-view filters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListQuery {
    pub origin: Option<(f64, f64)>,
    pub radius_km: Option<f64>,
    pub feed_only: bool,
}

/// List view: plain reports, or distance-annotated nearest-first when an
/// origin is given.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ListView {
    Plain(Vec<Report>),
    Ranked(Vec<RankedReport>),
}

impl ListView {
    pub fn len(&self) -> usize {
        match self {
            ListView::Plain(v) => v.len(),
            ListView::Ranked(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PipelineOutput {
    pub fn list(&self, q: &ListQuery) -> ListView {
        let base = if q.feed_only { &self.feed } else { &self.reports };
        match q.origin {
            Some((lat, lon)) => {
                let radius = q.radius_km.unwrap_or(f64::INFINITY);
                ListView::Ranked(within_radius(base, lat, lon, radius))
            }
            None => ListView::Plain(base.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relevance::default_rules;

    fn fixture() -> Vec<Report> {
        vec![
            Report::new("A", "Bão số 3 đổ bộ vào Đà Nẵng")
                .with_kind(ReportKind::Alert)
                .with_trust(0.8)
                .with_description("Gió giật cấp 12, nhiều cây đổ")
                .with_coords(16.0544, 108.2022),
            Report::new("B", "Bao so 3 do bo vao Da Nang")
                .with_kind(ReportKind::Alert)
                .with_trust(0.7)
                .with_coords(16.05, 108.2),
            Report::new("C", "Container va chạm trên quốc lộ 1A")
                .with_kind(ReportKind::Other)
                .with_trust(0.9)
                .with_coords(15.9, 108.3),
            Report::new("D", "Cần cứu hộ gấp tại Hòa Vang")
                .with_kind(ReportKind::Sos)
                .with_trust(0.6)
                .with_coords(16.02, 108.1),
            Report::new("E", "Nước ngập sâu ở Hội An").with_kind(ReportKind::Rain),
        ]
    }

    #[test]
    fn end_to_end_pass() {
        let out = run_pipeline(&fixture(), default_rules());
        assert_eq!(out.stats.original_count, 5);
        assert_eq!(out.stats.duplicates_removed, 1);
        assert_eq!(out.stats.noise_dropped, 1);
        let ids: Vec<&str> = out.reports.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "D", "E"]);

        assert_eq!(out.feed.len(), 1);
        assert_eq!(out.feed[0].id, "A");
        assert_eq!(out.pinned.as_ref().map(|r| r.id.as_str()), Some("A"));

        assert_eq!(out.collections[COLLECTION_ALERTS].len(), 1);
        assert_eq!(out.collections[COLLECTION_REQUESTS].len(), 1);
        // E has no coordinates
        assert!(out.collections[COLLECTION_REPORTS].is_empty());
    }

    #[test]
    fn empty_input_is_empty_output() {
        let out = run_pipeline(&[], default_rules());
        assert_eq!(out.stats, PipelineStats::default());
        assert!(out.reports.is_empty() && out.pinned.is_none());
    }

    #[test]
    fn list_view_radius_and_feed() {
        let out = run_pipeline(&fixture(), default_rules());
        let all = out.list(&ListQuery::default());
        assert_eq!(all.len(), 3);

        let near = out.list(&ListQuery {
            origin: Some((16.0544, 108.2022)),
            radius_km: Some(5.0),
            feed_only: false,
        });
        match near {
            ListView::Ranked(v) => {
                assert_eq!(v.len(), 1);
                assert_eq!(v[0].report.id, "A");
                assert!(v[0].distance_km < 0.01);
            }
            ListView::Plain(_) => panic!("expected ranked list"),
        }

        let feed = out.list(&ListQuery {
            feed_only: true,
            ..Default::default()
        });
        assert_eq!(feed.len(), 1);
    }
}
