// src/cluster/hierarchy.rs
//! Hierarchical greedy clustering in Web-Mercator space.
//!
//! One level per zoom. The level at `max_zoom` holds the raw points; each
//! coarser level is built from the one above it by merging every node with
//! its unvisited neighbours inside `radius / (extent * 2^z)`. Every level
//! keeps its nodes sorted by x so neighbour and viewport lookups are a
//! binary search plus a short scan.

use std::collections::HashMap;
use std::f64::consts::PI;

use super::{Bounds, ClusterFeature, ClusterIndex, ClusterOptions, ClusterPoint};

#[derive(Debug, Clone, Copy, PartialEq)]
enum NodeKind {
    /// Index into `HierarchicalIndex::points`.
    Point(usize),
    Cluster(u64),
}

#[derive(Debug, Clone)]
struct Node {
    x: f64,
    y: f64,
    count: usize,
    kind: NodeKind,
    /// Cluster that absorbed this node one level down, if any.
    parent: Option<u64>,
}

#[derive(Debug, Default)]
struct Level {
    nodes: Vec<Node>,
    /// Node indices ordered by x.
    by_x: Vec<usize>,
}

impl Level {
    fn new(nodes: Vec<Node>) -> Self {
        let mut by_x: Vec<usize> = (0..nodes.len()).collect();
        by_x.sort_by(|&a, &b| nodes[a].x.total_cmp(&nodes[b].x));
        Self { nodes, by_x }
    }

    /// Indices of nodes inside the axis-aligned box.
    fn range(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Vec<usize> {
        let start = self.by_x.partition_point(|&i| self.nodes[i].x < min_x);
        self.by_x[start..]
            .iter()
            .copied()
            .take_while(|&i| self.nodes[i].x <= max_x)
            .filter(|&i| {
                let y = self.nodes[i].y;
                y >= min_y && y <= max_y
            })
            .collect()
    }

    fn within(&self, x: f64, y: f64, r: f64) -> Vec<usize> {
        let r2 = r * r;
        self.range(x - r, y - r, x + r, y + r)
            .into_iter()
            .filter(|&i| {
                let dx = self.nodes[i].x - x;
                let dy = self.nodes[i].y - y;
                dx * dx + dy * dy <= r2
            })
            .collect()
    }
}

/// Default clustering index.
#[derive(Debug)]
pub struct HierarchicalIndex {
    options: ClusterOptions,
    points: Vec<ClusterPoint>,
    /// `levels[z]` for `min_zoom..=max_zoom`; lower slots stay empty.
    levels: Vec<Level>,
    /// cluster id → (zoom, node index in that level)
    clusters: HashMap<u64, (usize, usize)>,
}

fn lng_x(lon: f64) -> f64 {
    lon / 360.0 + 0.5
}

fn lat_y(lat: f64) -> f64 {
    let sin = lat.to_radians().sin();
    let y = 0.5 - 0.25 * ((1.0 + sin) / (1.0 - sin)).ln() / PI;
    y.clamp(0.0, 1.0)
}

fn x_lng(x: f64) -> f64 {
    (x - 0.5) * 360.0
}

fn y_lat(y: f64) -> f64 {
    let y2 = (180.0 - y * 360.0) * PI / 180.0;
    360.0 * y2.exp().atan() / PI - 90.0
}

impl HierarchicalIndex {
    fn limit_zoom(&self, zoom: i32) -> usize {
        let max = self.options.max_zoom as i32;
        let min = (self.options.min_zoom as i32).min(max);
        zoom.clamp(min, max) as usize
    }

    /// Merge `finer` into the level for zoom `z`.
    fn cluster_level(
        finer: &mut Level,
        z: u8,
        options: &ClusterOptions,
        next_id: &mut u64,
    ) -> Vec<Node> {
        let r = options.radius / (options.extent * 2f64.powi(z as i32));
        let mut visited = vec![false; finer.nodes.len()];
        let mut out = Vec::with_capacity(finer.nodes.len());

        for i in 0..finer.nodes.len() {
            if visited[i] {
                continue;
            }
            visited[i] = true;

            let (x, y, count) = {
                let p = &finer.nodes[i];
                (p.x, p.y, p.count)
            };
            let neighbours: Vec<usize> = finer
                .within(x, y, r)
                .into_iter()
                .filter(|&j| !visited[j])
                .collect();
            let total: usize = count + neighbours.iter().map(|&j| finer.nodes[j].count).sum::<usize>();

            if neighbours.is_empty() || total < options.min_points {
                out.push(Node {
                    parent: None,
                    ..finer.nodes[i].clone()
                });
                continue;
            }

            let id = *next_id;
            *next_id += 1;

            let mut wx = x * count as f64;
            let mut wy = y * count as f64;
            finer.nodes[i].parent = Some(id);
            for &j in &neighbours {
                visited[j] = true;
                let n = &mut finer.nodes[j];
                n.parent = Some(id);
                wx += n.x * n.count as f64;
                wy += n.y * n.count as f64;
            }

            out.push(Node {
                x: wx / total as f64,
                y: wy / total as f64,
                count: total,
                kind: NodeKind::Cluster(id),
                parent: None,
            });
        }
        out
    }

    fn feature(&self, node: &Node) -> ClusterFeature {
        match node.kind {
            NodeKind::Point(i) => ClusterFeature::Point(self.points[i].clone()),
            NodeKind::Cluster(id) => ClusterFeature::Cluster {
                cluster_id: id,
                point_count: node.count,
                lat: y_lat(node.y),
                lon: x_lng(node.x),
            },
        }
    }

    fn children(&self, cluster_id: u64) -> Vec<&Node> {
        let Some(&(z, _)) = self.clusters.get(&cluster_id) else {
            return Vec::new();
        };
        match self.levels.get(z + 1) {
            Some(level) => level
                .nodes
                .iter()
                .filter(|n| n.parent == Some(cluster_id))
                .collect(),
            None => Vec::new(),
        }
    }

    fn collect_leaves(&self, cluster_id: u64, out: &mut Vec<ClusterPoint>) {
        for child in self.children(cluster_id) {
            match child.kind {
                NodeKind::Point(i) => out.push(self.points[i].clone()),
                NodeKind::Cluster(id) => self.collect_leaves(id, out),
            }
        }
    }
}

impl ClusterIndex for HierarchicalIndex {
    fn build(points: Vec<ClusterPoint>, options: ClusterOptions) -> Self {
        let max_zoom = options.max_zoom as usize;
        let min_zoom = (options.min_zoom as usize).min(max_zoom);

        let leaf_nodes = points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.lat.is_finite() && p.lon.is_finite())
            .map(|(i, p)| Node {
                x: lng_x(p.lon),
                y: lat_y(p.lat),
                count: 1,
                kind: NodeKind::Point(i),
                parent: None,
            })
            .collect();

        let mut levels: Vec<Level> = (0..=max_zoom).map(|_| Level::default()).collect();
        levels[max_zoom] = Level::new(leaf_nodes);

        let mut next_id = 0u64;
        let mut clusters = HashMap::new();
        for z in (min_zoom..max_zoom).rev() {
            let coarse = Self::cluster_level(&mut levels[z + 1], z as u8, &options, &mut next_id);
            for (idx, n) in coarse.iter().enumerate() {
                // Unmerged clusters are copied down; keep the level that created them.
                if let NodeKind::Cluster(id) = n.kind {
                    clusters.entry(id).or_insert((z, idx));
                }
            }
            levels[z] = Level::new(coarse);
        }

        Self {
            options,
            points,
            levels,
            clusters,
        }
    }

    fn query(&self, bounds: &Bounds, zoom: i32) -> Vec<ClusterFeature> {
        let level = &self.levels[self.limit_zoom(zoom)];

        let mut west = ((bounds.west + 180.0) % 360.0 + 360.0) % 360.0 - 180.0;
        let south = bounds.south.clamp(-90.0, 90.0);
        let mut east = if bounds.east == 180.0 {
            180.0
        } else {
            ((bounds.east + 180.0) % 360.0 + 360.0) % 360.0 - 180.0
        };
        let north = bounds.north.clamp(-90.0, 90.0);

        if bounds.east - bounds.west >= 360.0 {
            west = -180.0;
            east = 180.0;
        } else if west > east {
            // Viewport crosses the antimeridian: query both halves.
            let mut out = self.query(&Bounds::new(west, south, 180.0, north), zoom);
            out.extend(self.query(&Bounds::new(-180.0, south, east, north), zoom));
            return out;
        }

        level
            .range(lng_x(west), lat_y(north), lng_x(east), lat_y(south))
            .into_iter()
            .map(|i| self.feature(&level.nodes[i]))
            .collect()
    }

    fn options(&self) -> &ClusterOptions {
        &self.options
    }

    fn cluster_center(&self, cluster_id: u64) -> Option<(f64, f64, usize)> {
        let &(z, idx) = self.clusters.get(&cluster_id)?;
        let n = &self.levels[z].nodes[idx];
        Some((y_lat(n.y), x_lng(n.x), n.count))
    }

    fn cluster_leaves(&self, cluster_id: u64) -> Vec<ClusterPoint> {
        let mut out = Vec::new();
        self.collect_leaves(cluster_id, &mut out);
        out
    }

    fn point_count(&self) -> usize {
        self.points.len()
    }
}
