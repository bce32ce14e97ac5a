// src/relevance.rs
//! Relevance gates: traffic-noise filter and feed-worthiness filter.
//!
//! Both gates are deterministic rule tables over a `Report`. Keyword lists
//! ship as built-in defaults and can be overridden from TOML
//! (`config/relevance.toml` or `$RELEVANCE_CONFIG_PATH`); thresholds are
//! fixed constants.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::normalize::has_native_diacritic;
use crate::report::{Report, ReportKind};

// --- env defaults & names ---
pub const DEFAULT_RELEVANCE_CONFIG_PATH: &str = "config/relevance.toml";
pub const ENV_RELEVANCE_CONFIG_PATH: &str = "RELEVANCE_CONFIG_PATH";

// --- fixed thresholds ---
pub const NOISE_MIN_TRUST: f64 = 0.5;
pub const FEED_MIN_TITLE_CHARS: usize = 15;
pub const FEED_MIN_DESCRIPTION_CHARS: usize = 20;
pub const FEED_ALERT_MIN_TRUST: f64 = 0.7;
pub const FEED_RAIN_MIN_TRUST: f64 = 0.8;

/* ----------------------------
Config schema (from TOML)
---------------------------- */

#[derive(Debug, Clone, Deserialize)]
pub struct RulesConfig {
    #[serde(default = "default_traffic")]
    pub traffic_keywords: Vec<String>,
    #[serde(default = "default_disaster")]
    pub disaster_keywords: Vec<String>,
    #[serde(default = "default_org_prefixes")]
    pub org_prefixes: Vec<String>,
    /// Locale codes that mark a non-Vietnamese edition of a source.
    #[serde(default = "default_foreign_locales")]
    pub foreign_locales: Vec<String>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            traffic_keywords: default_traffic(),
            disaster_keywords: default_disaster(),
            org_prefixes: default_org_prefixes(),
            foreign_locales: default_foreign_locales(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_traffic() -> Vec<String> {
    strings(&[
        "tai nạn",
        "va chạm",
        "giao thông",
        "xe tải",
        "xe khách",
        "xe máy",
        "xe container",
        "container",
        "ô tô",
        "lật xe",
        "tông vào",
        "đâm vào",
        "tài xế",
        "csgt",
        "cảnh sát giao thông",
        "quốc lộ",
        "cao tốc",
        "traffic",
        "collision",
        "crash",
    ])
}

fn default_disaster() -> Vec<String> {
    strings(&[
        "lũ",
        "lụt",
        "lũ quét",
        "ngập",
        "ngập lụt",
        "sạt lở",
        "lở đất",
        "sụt lún",
        "bão",
        "áp thấp",
        "mưa lớn",
        "triều cường",
        "vỡ đê",
        "sơ tán",
        "di dời",
        "cứu hộ",
        "cứu nạn",
        "cứu trợ",
        "mắc kẹt",
        "flood",
        "landslide",
        "storm",
        "typhoon",
        "evacuation",
        "rescue",
    ])
}

fn default_org_prefixes() -> Vec<String> {
    strings(&[
        "công ty",
        "tập đoàn",
        "tổng công ty",
        "ngân hàng",
        "ubnd",
        "sở",
        "ban",
        "trung tâm",
        "báo",
        "đài",
    ])
}

fn default_foreign_locales() -> Vec<String> {
    strings(&[
        "en", "ja", "ko", "zh", "zh-cn", "zh-tw", "fr", "de", "ru", "es", "th", "lo", "km",
    ])
}

/* ----------------------------
Compiled rules
---------------------------- */

/// A compiled keyword. Plain substring match on the lowercased text, except
/// single Vietnamese syllables (`lũ`, `bão`, `ngập`), which must stand as a
/// whole word so `lũ` does not hit `thung lũng`.
#[derive(Debug, Clone)]
enum Keyword {
    Substring(String),
    Syllable(String),
}

impl Keyword {
    fn new(raw: &str) -> Option<Self> {
        let kw = lower_nfc(raw.trim());
        if kw.is_empty() {
            return None;
        }
        if !kw.is_ascii() && !kw.contains(char::is_whitespace) {
            Some(Keyword::Syllable(format!(" {kw} ")))
        } else {
            Some(Keyword::Substring(kw))
        }
    }

    fn matches(&self, text: &MatchText) -> bool {
        match self {
            Keyword::Substring(kw) => text.lower.contains(kw.as_str()),
            Keyword::Syllable(kw) => text.words.contains(kw.as_str()),
        }
    }
}

/// Report text as matched: plain lowercase, and a word-padded copy.
struct MatchText {
    lower: String,
    words: String,
}

impl MatchText {
    fn new(raw: &str) -> Self {
        let lower = lower_nfc(raw);
        let words = word_text(&lower);
        Self { lower, words }
    }
}

fn lower_nfc(s: &str) -> String {
    s.nfc().collect::<String>().to_lowercase()
}

/// Non-alphanumerics become single spaces, padded with one space on each
/// side so `" kw "` is a whole-word match.
fn word_text(lower: &str) -> String {
    let mut out = String::with_capacity(lower.len() + 2);
    out.push(' ');
    for ch in lower.chars() {
        if ch.is_alphanumeric() {
            out.push(ch);
        } else if !out.ends_with(' ') {
            out.push(' ');
        }
    }
    if !out.ends_with(' ') {
        out.push(' ');
    }
    out
}

/// Why a report was kept out of the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedDrop {
    ForeignLocale,
    TitleTooShort,
    NoNativeScript,
    OrgPrefixWithoutDescription,
    WeakSignal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedVerdict {
    Keep,
    Drop(FeedDrop),
}

/// Compiled keyword tables plus the locale pattern.
#[derive(Debug)]
pub struct RelevanceRules {
    pub cfg: RulesConfig,
    traffic: Vec<Keyword>,
    disaster: Vec<Keyword>,
    org_prefixes: Vec<String>,
    locale_re: Regex,
}

impl Default for RelevanceRules {
    fn default() -> Self {
        Self::from_config(RulesConfig::default()).expect("built-in relevance rules")
    }
}

static DEFAULT_RULES: Lazy<RelevanceRules> = Lazy::new(RelevanceRules::default);

/// Shared built-in rules.
pub fn default_rules() -> &'static RelevanceRules {
    &DEFAULT_RULES
}

impl RelevanceRules {
    pub fn from_config(cfg: RulesConfig) -> Result<Self> {
        let traffic = cfg.traffic_keywords.iter().filter_map(|k| Keyword::new(k)).collect();
        let disaster = cfg.disaster_keywords.iter().filter_map(|k| Keyword::new(k)).collect();
        let org_prefixes = cfg
            .org_prefixes
            .iter()
            .map(|p| lower_nfc(p))
            .filter(|p| !p.trim().is_empty())
            .collect();

        let alternation = cfg
            .foreign_locales
            .iter()
            .map(|l| regex::escape(&l.trim().to_ascii_lowercase()))
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("|");
        // An empty list must never match.
        let pattern = if alternation.is_empty() {
            r"[^\s\S]".to_string()
        } else {
            format!(r"(?i)(?:/|#|[?&]lang=)(?:{alternation})(?:$|[/?#&])")
        };
        let locale_re = Regex::new(&pattern).context("compiling locale pattern")?;

        Ok(Self {
            cfg,
            traffic,
            disaster,
            org_prefixes,
            locale_re,
        })
    }

    /// Load from a TOML string (missing tables fall back to the built-ins).
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: RulesConfig = toml::from_str(s).context("parsing relevance rules")?;
        Self::from_config(cfg)
    }

    /// Load from a TOML file. Falls back to built-in rules on any error.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path)
            .with_context(|| format!("reading relevance rules from {}", path.display()))
            .and_then(|s| Self::from_toml_str(&s))
        {
            Ok(rules) => rules,
            Err(e) => {
                debug!(target: "relevance", error = %format!("{e:#}"), "using built-in relevance rules");
                Self::default()
            }
        }
    }

    /// `$RELEVANCE_CONFIG_PATH`, then `config/relevance.toml`, then built-ins.
    pub fn load_default() -> Self {
        let path = std::env::var(ENV_RELEVANCE_CONFIG_PATH)
            .unwrap_or_else(|_| DEFAULT_RELEVANCE_CONFIG_PATH.to_string());
        Self::load_from_file(path)
    }

    fn report_text(report: &Report) -> MatchText {
        let desc = report.description.as_deref().unwrap_or("");
        MatchText::new(&format!("{} {}", report.title, desc))
    }

    pub fn has_traffic_keyword(&self, report: &Report) -> bool {
        let text = Self::report_text(report);
        self.traffic.iter().any(|k| k.matches(&text))
    }

    pub fn has_disaster_keyword(&self, report: &Report) -> bool {
        let text = Self::report_text(report);
        self.disaster.iter().any(|k| k.matches(&text))
    }

    /// `true` means noise (drop).
    ///
    /// Reports without traffic vocabulary always pass. Traffic reports pass
    /// only with disaster vocabulary, an ALERT/SOS/RAIN type and trust ≥ 0.5.
    pub fn is_traffic_noise(&self, report: &Report) -> bool {
        let text = Self::report_text(report);
        if !self.traffic.iter().any(|k| k.matches(&text)) {
            return false;
        }
        let has_disaster = self.disaster.iter().any(|k| k.matches(&text));
        let strong_kind = matches!(
            report.kind,
            ReportKind::Alert | ReportKind::Sos | ReportKind::Rain
        );
        !(has_disaster && strong_kind && report.trust_score >= NOISE_MIN_TRUST)
    }

    /// `source` points at a non-Vietnamese edition (e.g. `.../en/...`).
    pub fn is_foreign_locale(&self, source: &str) -> bool {
        self.locale_re.is_match(source)
    }

    pub fn starts_with_org_prefix(&self, title: &str) -> bool {
        let lower = lower_nfc(title.trim_start());
        self.org_prefixes.iter().any(|p| {
            lower
                .strip_prefix(p.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(|c: char| !c.is_alphanumeric()))
        })
    }

    /// Stricter gate for user-facing lists.
    pub fn feed_verdict(&self, report: &Report) -> FeedVerdict {
        if self.is_foreign_locale(&report.source) {
            return FeedVerdict::Drop(FeedDrop::ForeignLocale);
        }
        if report.title.chars().count() < FEED_MIN_TITLE_CHARS {
            return FeedVerdict::Drop(FeedDrop::TitleTooShort);
        }
        if !has_native_diacritic(&report.title) {
            return FeedVerdict::Drop(FeedDrop::NoNativeScript);
        }
        let has_description = report
            .description
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty());
        if !has_description && self.starts_with_org_prefix(&report.title) {
            return FeedVerdict::Drop(FeedDrop::OrgPrefixWithoutDescription);
        }
        if !report.media.is_empty() {
            return FeedVerdict::Keep;
        }
        let trusted = match report.kind {
            ReportKind::Alert | ReportKind::Sos => report.trust_score >= FEED_ALERT_MIN_TRUST,
            ReportKind::Rain => report.trust_score >= FEED_RAIN_MIN_TRUST,
            _ => false,
        };
        if report.description_len() >= FEED_MIN_DESCRIPTION_CHARS && trusted {
            FeedVerdict::Keep
        } else {
            FeedVerdict::Drop(FeedDrop::WeakSignal)
        }
    }

    pub fn is_feed_worthy(&self, report: &Report) -> bool {
        self.feed_verdict(report) == FeedVerdict::Keep
    }

    /// Drop traffic noise; returns kept reports and the number dropped.
    pub fn filter_noise(&self, reports: Vec<Report>) -> (Vec<Report>, usize) {
        let before = reports.len();
        let kept: Vec<Report> = reports
            .into_iter()
            .filter(|r| {
                let noise = self.is_traffic_noise(r);
                if noise {
                    debug!(target: "relevance", id = %r.id, "dropped as traffic noise");
                }
                !noise
            })
            .collect();
        let dropped = before - kept.len();
        (kept, dropped)
    }

    /// Keep only feed-worthy reports; returns kept reports and the number dropped.
    pub fn feed_reports(&self, reports: &[Report]) -> (Vec<Report>, usize) {
        let mut kept = Vec::with_capacity(reports.len());
        for r in reports {
            match self.feed_verdict(r) {
                FeedVerdict::Keep => kept.push(r.clone()),
                FeedVerdict::Drop(reason) => {
                    debug!(target: "relevance", id = %r.id, ?reason, "kept out of feed");
                }
            }
        }
        let dropped = reports.len() - kept.len();
        (kept, dropped)
    }
}

/// Noise gate with the built-in rules. `true` means drop.
pub fn is_traffic_noise(report: &Report) -> bool {
    default_rules().is_traffic_noise(report)
}

/// Feed gate with the built-in rules.
pub fn is_feed_worthy(report: &Report) -> bool {
    default_rules().is_feed_worthy(report)
}
