//! Fuzzy title similarity.
//!
//! Normalized Levenshtein ratio over `normalize()` keys, in [0.0, 1.0].
//! The dedup stage groups by exact key only; this scorer is for callers that
//! need near-duplicate detection across sources.

use crate::normalize::normalize;
use crate::report::Report;

/// Similarity of two titles after normalization.
///
/// Empty (after normalization) → 0.0, equal keys → 1.0, otherwise
/// `1 - levenshtein / max_len` with lengths counted in chars.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    similarity_of_keys(&a, &b)
}

/// Same as [`similarity`] for inputs that are already normalized keys.
pub fn similarity_of_keys(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    let dist = strsim::levenshtein(a, b);
    (1.0 - dist as f64 / max_len as f64).clamp(0.0, 1.0)
}

/// A pair of reports (by index into the input slice) whose titles look alike.
#[derive(Debug, Clone, PartialEq)]
pub struct NearDuplicate {
    pub left: usize,
    pub right: usize,
    pub score: f64,
}

/// All index pairs `(i < j)` scoring at least `threshold`.
///
/// Quadratic; meant for the post-dedup list, which is small.
pub fn find_near_duplicates(reports: &[Report], threshold: f64) -> Vec<NearDuplicate> {
    let keys: Vec<String> = reports
        .iter()
        .map(|r| {
            r.normalized_title
                .clone()
                .unwrap_or_else(|| normalize(&r.title))
        })
        .collect();

    let mut out = Vec::new();
    for i in 0..keys.len() {
        for j in (i + 1)..keys.len() {
            let score = similarity_of_keys(&keys[i], &keys[j]);
            if score >= threshold {
                out.push(NearDuplicate {
                    left: i,
                    right: j,
                    score,
                });
            }
        }
    }
    out
}
