// src/cluster/mod.rs
//! Viewport/zoom-aware point clustering for map pins.
//!
//! The contract is `build(points)` + `query(bounds, zoom)`; any spatial index
//! honouring it can stand in. `HierarchicalIndex` is the shipped one.

pub mod hierarchy;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::report::Report;

pub use hierarchy::HierarchicalIndex;

/// Clustering parameters. Radius and extent are in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterOptions {
    pub radius: f64,
    pub extent: f64,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub min_points: usize,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            radius: 60.0,
            extent: 512.0,
            min_zoom: 0,
            max_zoom: 16,
            min_points: 2,
        }
    }
}

impl ClusterOptions {
    pub fn validate(&self) -> Result<()> {
        if self.min_zoom > self.max_zoom {
            anyhow::bail!(
                "cluster min_zoom ({}) must not exceed max_zoom ({})",
                self.min_zoom,
                self.max_zoom
            );
        }
        if !(self.radius > 0.0 && self.extent > 0.0) {
            anyhow::bail!("cluster radius and extent must be positive");
        }
        Ok(())
    }
}

/// Zoom steps added when a cluster is clicked.
pub const EXPANSION_ZOOM_STEP: u8 = 3;

/// One input point with the properties echoed back on raw-point features.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterPoint {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub properties: Value,
}

impl ClusterPoint {
    /// Display properties for a report pin; `None` when it has no coordinates.
    pub fn from_report(report: &Report) -> Option<Self> {
        let (lat, lon) = report.coords()?;
        Some(Self {
            id: report.id.clone(),
            lat,
            lon,
            properties: json!({
                "id": report.id,
                "title": report.title,
                "type": report.kind.as_str(),
                "trust_score": report.trust_score,
                "has_media": !report.media.is_empty(),
                "created_at": report.created_at,
            }),
        })
    }
}

pub fn points_from_reports(reports: &[Report]) -> Vec<ClusterPoint> {
    reports.iter().filter_map(ClusterPoint::from_report).collect()
}

/// Visible rectangle `[west, south, east, north]` in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Bounds {
    pub const WORLD: Bounds = Bounds {
        west: -180.0,
        south: -85.0,
        east: 180.0,
        north: 85.0,
    };

    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Parse `"w,s,e,n"` as sent by the map client.
    pub fn from_bbox_str(s: &str) -> Result<Self> {
        let parts = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<f64>()
                    .with_context(|| format!("invalid bbox component `{p}`"))
            })
            .collect::<Result<Vec<_>>>()?;
        match parts.as_slice() {
            [w, so, e, n] if parts.iter().all(|v| v.is_finite()) => Ok(Self::new(*w, *so, *e, *n)),
            _ => Err(anyhow!("bbox must be four finite numbers: west,south,east,north")),
        }
    }
}

/// A feature in a query result: an aggregate or a raw point.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterFeature {
    Cluster {
        cluster_id: u64,
        point_count: usize,
        lat: f64,
        lon: f64,
    },
    Point(ClusterPoint),
}

impl ClusterFeature {
    pub fn is_cluster(&self) -> bool {
        matches!(self, ClusterFeature::Cluster { .. })
    }

    /// GeoJSON `Feature` object.
    pub fn to_geojson(&self) -> Value {
        match self {
            ClusterFeature::Cluster {
                cluster_id,
                point_count,
                lat,
                lon,
            } => json!({
                "type": "Feature",
                "id": cluster_id,
                "geometry": { "type": "Point", "coordinates": [lon, lat] },
                "properties": {
                    "cluster": true,
                    "cluster_id": cluster_id,
                    "point_count": point_count,
                    "point_count_abbreviated": abbreviate(*point_count),
                },
            }),
            ClusterFeature::Point(p) => {
                let mut props = match &p.properties {
                    Value::Object(m) => m.clone(),
                    Value::Null => serde_json::Map::new(),
                    other => {
                        let mut m = serde_json::Map::new();
                        m.insert("value".into(), other.clone());
                        m
                    }
                };
                props.insert("cluster".into(), Value::Bool(false));
                json!({
                    "type": "Feature",
                    "geometry": { "type": "Point", "coordinates": [p.lon, p.lat] },
                    "properties": Value::Object(props),
                })
            }
        }
    }
}

fn abbreviate(count: usize) -> String {
    match count {
        c if c >= 10_000 => format!("{}k", c / 1000),
        c if c >= 1000 => format!("{:.1}k", c as f64 / 1000.0),
        c => c.to_string(),
    }
}

/// `FeatureCollection` for one named point collection.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureCollection {
    pub source_id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub features: Vec<Value>,
}

impl FeatureCollection {
    pub fn new(source_id: impl Into<String>, features: &[ClusterFeature]) -> Self {
        Self {
            source_id: source_id.into(),
            kind: "FeatureCollection",
            features: features.iter().map(ClusterFeature::to_geojson).collect(),
        }
    }
}

/// Where the map should move when a cluster is clicked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExpansionTarget {
    pub lat: f64,
    pub lon: f64,
    pub zoom: u8,
}

/// Build/query contract for a clustering index.
pub trait ClusterIndex: Send + Sync + Sized {
    fn build(points: Vec<ClusterPoint>, options: ClusterOptions) -> Self;

    /// Clusters and raw points inside `bounds` at `zoom`.
    fn query(&self, bounds: &Bounds, zoom: i32) -> Vec<ClusterFeature>;

    fn options(&self) -> &ClusterOptions;

    /// Centroid and point count of a cluster produced by `query`.
    fn cluster_center(&self, cluster_id: u64) -> Option<(f64, f64, usize)>;

    /// Raw points under a cluster.
    fn cluster_leaves(&self, cluster_id: u64) -> Vec<ClusterPoint>;

    fn point_count(&self) -> usize;

    fn expansion_zoom(&self, current_zoom: i32) -> u8 {
        let max = self.options().max_zoom;
        let target = current_zoom.saturating_add(EXPANSION_ZOOM_STEP as i32);
        target.clamp(0, max as i32) as u8
    }

    fn expansion_target(&self, cluster_id: u64, current_zoom: i32) -> Option<ExpansionTarget> {
        let (lat, lon, _) = self.cluster_center(cluster_id)?;
        Some(ExpansionTarget {
            lat,
            lon,
            zoom: self.expansion_zoom(current_zoom),
        })
    }
}

/// SHA-256 over ids, coordinates and properties; order-sensitive.
pub fn content_hash(points: &[ClusterPoint]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update((points.len() as u64).to_le_bytes());
    for p in points {
        hasher.update(p.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(p.lat.to_bits().to_le_bytes());
        hasher.update(p.lon.to_bits().to_le_bytes());
        hasher.update(p.properties.to_string().as_bytes());
        hasher.update([0u8]);
    }
    hasher.finalize().into()
}

struct MemoEntry<I> {
    hash: [u8; 32],
    index: Arc<I>,
}

/// Per-collection memo of built indexes, keyed on the point-set content hash.
pub struct IndexMemo<I: ClusterIndex = HierarchicalIndex> {
    options: ClusterOptions,
    entries: HashMap<String, MemoEntry<I>>,
    builds: u64,
}

impl<I: ClusterIndex> IndexMemo<I> {
    pub fn new(options: ClusterOptions) -> Self {
        Self {
            options,
            entries: HashMap::new(),
            builds: 0,
        }
    }

    /// Reuse the index for `collection` if the points are unchanged, else rebuild.
    pub fn get_or_build(&mut self, collection: &str, points: Vec<ClusterPoint>) -> Arc<I> {
        let hash = content_hash(&points);
        if let Some(e) = self.entries.get(collection) {
            if e.hash == hash {
                return e.index.clone();
            }
        }
        let n = points.len();
        let index = Arc::new(I::build(points, self.options));
        self.builds += 1;
        debug!(target: "cluster", collection, points = n, "cluster index rebuilt");
        self.entries.insert(
            collection.to_string(),
            MemoEntry {
                hash,
                index: index.clone(),
            },
        );
        index
    }

    pub fn get(&self, collection: &str) -> Option<Arc<I>> {
        self.entries.get(collection).map(|e| e.index.clone())
    }

    /// Total number of index builds (memo misses) so far.
    pub fn builds(&self) -> u64 {
        self.builds
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(id: &str, lat: f64, lon: f64) -> ClusterPoint {
        ClusterPoint {
            id: id.into(),
            lat,
            lon,
            properties: json!({ "id": id }),
        }
    }

    #[test]
    fn bbox_parsing() {
        let b = Bounds::from_bbox_str("102.1, 8.5,109.5,23.4").unwrap();
        assert_eq!(b, Bounds::new(102.1, 8.5, 109.5, 23.4));
        assert!(Bounds::from_bbox_str("1,2,3").is_err());
        assert!(Bounds::from_bbox_str("a,2,3,4").is_err());
    }

    #[test]
    fn memo_reuses_until_points_change() {
        let mut memo: IndexMemo = IndexMemo::new(ClusterOptions::default());
        let a = memo.get_or_build("requests", vec![pt("1", 16.0, 108.0)]);
        let b = memo.get_or_build("requests", vec![pt("1", 16.0, 108.0)]);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(memo.builds(), 1);

        memo.get_or_build("offers", vec![pt("1", 16.0, 108.0)]);
        assert_eq!(memo.builds(), 2);

        let c = memo.get_or_build("requests", vec![pt("1", 16.0, 108.1)]);
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(memo.builds(), 3);
    }

    #[test]
    fn point_feature_echoes_properties() {
        let f = ClusterFeature::Point(pt("r9", 10.0, 106.0));
        let v = f.to_geojson();
        assert_eq!(v["properties"]["id"], "r9");
        assert_eq!(v["properties"]["cluster"], false);
        assert_eq!(v["geometry"]["coordinates"][0], 106.0);
    }

    #[test]
    fn abbreviations() {
        assert_eq!(abbreviate(12), "12");
        assert_eq!(abbreviate(1500), "1.5k");
        assert_eq!(abbreviate(25_000), "25k");
    }
}
