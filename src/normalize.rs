// src/normalize.rs
//! Title normalization: the comparison key used by dedup and similarity.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Maximum key length in characters.
pub const MAX_KEY_CHARS: usize = 100;

/// Canonicalize a free-text title into a comparison key.
///
/// Steps: lowercase, fold Vietnamese diacritics to base Latin letters, drop
/// everything that is not a letter/digit/whitespace, collapse whitespace,
/// trim, cap at 100 chars. Idempotent. Input is taken as-is; an escaped
/// `&amp;` keeps its letters.
pub fn normalize(title: &str) -> String {
    if title.is_empty() {
        return String::new();
    }

    // 1) Lowercase + fold
    let folded = fold_diacritics(&title.to_lowercase());

    // 2) Collapse whitespace while keeping only letters/digits
    let mut out = String::with_capacity(folded.len());
    let mut pending_space = false;
    for ch in folded.chars() {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
        } else if ch.is_alphanumeric() {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(ch);
        }
    }

    // 3) Length cap
    if out.chars().count() > MAX_KEY_CHARS {
        out = out.chars().take(MAX_KEY_CHARS).collect();
        out.truncate(out.trim_end().len());
    }

    out
}

/// Strip combining marks after canonical decomposition so that precomposed
/// and decomposed inputs fold identically. `đ` has no decomposition and is
/// mapped explicitly.
pub fn fold_diacritics(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| match c {
            'đ' => 'd',
            'Đ' => 'D',
            other => other,
        })
        .collect()
}

/// True if `s` contains at least one Vietnamese-specific letter or a letter
/// carrying a combining tone/vowel mark.
pub fn has_native_diacritic(s: &str) -> bool {
    s.nfd()
        .any(|c| is_combining_mark(c) || matches!(c, 'đ' | 'Đ'))
}
