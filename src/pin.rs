//! Pinned report selection.
//!
//! Picks the single report the map highlights. Candidates are trusted
//! ALERT/SOS reports with a proper Vietnamese title from a native-locale
//! source; the winner is the highest trust, then the most recent.

use std::cmp::Ordering;

use tracing::info;

use crate::normalize::has_native_diacritic;
use crate::relevance::{default_rules, RelevanceRules};
use crate::report::{Report, ReportKind};

pub const PIN_MIN_TRUST: f64 = 0.7;
pub const PIN_MIN_TITLE_CHARS: usize = 15;
/// How often the selection is re-run even if the dataset did not change.
pub const PIN_REEVALUATE_SECS: u64 = 60;

pub fn is_pin_candidate(report: &Report, rules: &RelevanceRules) -> bool {
    matches!(report.kind, ReportKind::Alert | ReportKind::Sos)
        && report.trust_score >= PIN_MIN_TRUST
        && report.title.chars().count() >= PIN_MIN_TITLE_CHARS
        && has_native_diacritic(&report.title)
        && !rules.is_foreign_locale(&report.source)
}

/// Trust descending, then `created_at` descending.
fn pin_order(a: &Report, b: &Report) -> Ordering {
    b.trust_score
        .total_cmp(&a.trust_score)
        .then_with(|| b.created_at.cmp(&a.created_at))
}

/// Highest-priority candidate, or `None`.
pub fn select_pinned_with<'a>(reports: &'a [Report], rules: &RelevanceRules) -> Option<&'a Report> {
    reports
        .iter()
        .filter(|r| is_pin_candidate(r, rules))
        .min_by(|a, b| pin_order(a, b))
}

/// [`select_pinned_with`] using the built-in rules.
pub fn select_pinned(reports: &[Report]) -> Option<&Report> {
    select_pinned_with(reports, default_rules())
}

/// Outcome of one re-evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum PinChange {
    Unchanged,
    Changed { from: Option<String>, to: Option<String> },
}

/// Remembers the last selection so periodic reruns can report changes.
#[derive(Debug, Default, Clone)]
pub struct PinTracker {
    current: Option<Report>,
}

impl PinTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Report> {
        self.current.as_ref()
    }

    /// Re-run the selection over `reports` and store the result.
    pub fn reevaluate(&mut self, reports: &[Report], rules: &RelevanceRules) -> PinChange {
        let next = select_pinned_with(reports, rules).cloned();
        let prev_id = self.current.as_ref().map(|r| r.id.clone());
        let next_id = next.as_ref().map(|r| r.id.clone());
        self.current = next;
        if prev_id == next_id {
            return PinChange::Unchanged;
        }
        info!(target: "pin", from = ?prev_id, to = ?next_id, "pinned report changed");
        PinChange::Changed {
            from: prev_id,
            to: next_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn alert(id: &str, trust: f64, mins_ago: i64) -> Report {
        let now = Utc.with_ymd_and_hms(2024, 9, 10, 12, 0, 0).unwrap();
        Report::new(id, "Cảnh báo lũ khẩn cấp sông Hồng")
            .with_kind(ReportKind::Alert)
            .with_trust(trust)
            .with_created_at(now - Duration::minutes(mins_ago))
    }

    #[test]
    fn none_without_candidates() {
        assert!(select_pinned(&[]).is_none());
        let weak = vec![alert("a", 0.6, 0), alert("b", 0.9, 0).with_kind(ReportKind::Rain)];
        assert!(select_pinned(&weak).is_none());
    }

    #[test]
    fn highest_trust_then_most_recent() {
        let reports = vec![alert("old", 0.9, 30), alert("new", 0.9, 5), alert("low", 0.8, 0)];
        assert_eq!(select_pinned(&reports).unwrap().id, "new");
    }

    #[test]
    fn rejects_foreign_and_unaccented_titles() {
        let foreign = alert("f", 1.0, 0).with_source("https://e.vnexpress.net/en/news");
        let mut ascii = alert("a", 1.0, 0);
        ascii.title = "Canh bao lu khan cap song Hong".into();
        let ok = alert("ok", 0.7, 0);
        assert_eq!(select_pinned(&[foreign, ascii, ok]).unwrap().id, "ok");
    }

    #[test]
    fn tracker_reports_changes_only() {
        let rules = default_rules();
        let mut t = PinTracker::new();
        let data = vec![alert("x", 0.9, 1)];
        assert_eq!(
            t.reevaluate(&data, rules),
            PinChange::Changed { from: None, to: Some("x".into()) }
        );
        assert_eq!(t.reevaluate(&data, rules), PinChange::Unchanged);
        assert_eq!(
            t.reevaluate(&[], rules),
            PinChange::Changed { from: Some("x".into()), to: None }
        );
        assert!(t.current().is_none());
    }
}
