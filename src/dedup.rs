// src/dedup.rs
//! Exact-key deduplication of reports.
//!
//! Reports are grouped by `normalized_title` (or `normalize(title)`), and each
//! group collapses to one canonical report. No fuzzy matching happens here;
//! see `similarity` for that.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use crate::normalize::normalize;
use crate::report::Report;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DedupResult {
    pub reports: Vec<Report>,
    pub original_count: usize,
    pub deduped_count: usize,
    pub duplicates_removed: usize,
}

/// Comparison key for a report: the cached normalized title if present.
pub fn dedup_key(report: &Report) -> String {
    match &report.normalized_title {
        Some(k) => k.clone(),
        None => normalize(&report.title),
    }
}

/// Canonical preference: trust, then media presence, then description length.
/// `Greater` means `a` should win over `b`.
pub fn canonical_order(a: &Report, b: &Report) -> Ordering {
    a.trust_score
        .partial_cmp(&b.trust_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| (!a.media.is_empty()).cmp(&!b.media.is_empty()))
        .then_with(|| a.description_len().cmp(&b.description_len()))
}

/// Collapse reports sharing a key into one canonical report each.
///
/// Output keeps the order in which keys first appear. On a full tie the
/// earlier report stays, so identical inputs always give identical outputs.
pub fn dedupe(reports: Option<&[Report]>) -> DedupResult {
    let reports = match reports {
        Some(r) if !r.is_empty() => r,
        _ => return DedupResult::default(),
    };

    let mut slot_by_key: HashMap<String, usize> = HashMap::with_capacity(reports.len());
    let mut winners: Vec<&Report> = Vec::with_capacity(reports.len());

    for report in reports {
        let key = dedup_key(report);
        match slot_by_key.get(&key) {
            Some(&slot) => {
                if canonical_order(report, winners[slot]) == Ordering::Greater {
                    winners[slot] = report;
                }
            }
            None => {
                slot_by_key.insert(key, winners.len());
                winners.push(report);
            }
        }
    }

    let original_count = reports.len();
    let deduped_count = winners.len();
    DedupResult {
        reports: winners.into_iter().cloned().collect(),
        original_count,
        deduped_count,
        duplicates_removed: original_count - deduped_count,
    }
}
