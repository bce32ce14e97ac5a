//! # Report model
//! Wire shape of a disaster report as served by `GET /reports?limit=N`.
//!
//! Reports are transient: a fetch yields a fresh array that fully replaces
//! the previous one. Nothing here is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Report category. Unknown wire values fold into `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportKind {
    Alert,
    Sos,
    Rain,
    Road,
    Needs,
    #[default]
    Other,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Alert => "ALERT",
            ReportKind::Sos => "SOS",
            ReportKind::Rain => "RAIN",
            ReportKind::Road => "ROAD",
            ReportKind::Needs => "NEEDS",
            ReportKind::Other => "OTHER",
        }
    }

    fn from_wire(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALERT" => ReportKind::Alert,
            "SOS" => ReportKind::Sos,
            "RAIN" => ReportKind::Rain,
            "ROAD" => ReportKind::Road,
            "NEEDS" => ReportKind::Needs,
            _ => ReportKind::Other,
        }
    }
}

impl<'de> Deserialize<'de> for ReportKind {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Ok(ReportKind::from_wire(&raw))
    }
}

/// A single crawled, official or crowd-submitted report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: ReportKind,
    #[serde(default)]
    pub source: String,
    #[serde(default, deserialize_with = "de_trust")]
    pub trust_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub media: Vec<String>,
    /// Cached `normalize(title)`; trusted as-is when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_title: Option<String>,
}

/// Clamp to <0.0..=1.0>; NaN becomes 0.
fn de_trust<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let v = Option::<f64>::deserialize(d)?.unwrap_or(0.0);
    Ok(clamp01(v))
}

pub(crate) fn clamp01(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

impl Report {
    /// Minimal constructor used by tests and fixtures.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            kind: ReportKind::Other,
            source: String::new(),
            trust_score: 0.0,
            lat: None,
            lon: None,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            media: Vec::new(),
            normalized_title: None,
        }
    }

    pub fn with_kind(mut self, kind: ReportKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_trust(mut self, trust: f64) -> Self {
        self.trust_score = clamp01(trust);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_media(mut self, url: impl Into<String>) -> Self {
        self.media.push(url.into());
        self
    }

    pub fn with_coords(mut self, lat: f64, lon: f64) -> Self {
        self.lat = Some(lat);
        self.lon = Some(lon);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// `(lat, lon)` when both coordinates are present and finite.
    pub fn coords(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }

    /// Description length in characters; missing counts as 0.
    pub fn description_len(&self) -> usize {
        self.description
            .as_deref()
            .map(|d| d.chars().count())
            .unwrap_or(0)
    }
}

/// A report annotated with its distance from a reference point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedReport {
    #[serde(flatten)]
    pub report: Report,
    pub distance_km: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_wire_shape_and_clamps_trust() {
        let raw = r#"{
            "id": "r1",
            "title": "Lũ quét tại Yên Bái",
            "type": "sos",
            "source": "https://vnexpress.net/thoi-su",
            "trust_score": 1.7,
            "lat": 21.7, "lon": 104.9,
            "created_at": "2024-09-10T08:00:00Z"
        }"#;
        let r: Report = serde_json::from_str(raw).unwrap();
        assert_eq!(r.kind, ReportKind::Sos);
        assert_eq!(r.trust_score, 1.0);
        assert!(r.media.is_empty());
        assert_eq!(r.coords(), Some((21.7, 104.9)));
    }

    #[test]
    fn unknown_type_becomes_other() {
        let raw = r#"{"id":"x","title":"t","type":"WEIRD","created_at":"2024-01-01T00:00:00Z"}"#;
        let r: Report = serde_json::from_str(raw).unwrap();
        assert_eq!(r.kind, ReportKind::Other);
        assert_eq!(r.trust_score, 0.0);
    }

    #[test]
    fn serializes_kind_as_type_field() {
        let r = Report::new("a", "b").with_kind(ReportKind::Rain);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["type"], "RAIN");
        assert!(v.get("lat").is_none());
    }
}
