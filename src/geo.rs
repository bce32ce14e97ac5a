//! Great-circle distance plus radius filtering and nearest-first ordering.

use crate::report::{RankedReport, Report};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine great-circle distance between two lat/lon points in kilometers.
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lon / 2.0).sin().powi(2);
    // Guard tiny float overshoot above 1.0 for antipodal points.
    let c = 2.0 * a.min(1.0).sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Reports within `radius_km` of `(lat, lon)`, nearest first.
///
/// Reports without coordinates are skipped.
pub fn within_radius(reports: &[Report], lat: f64, lon: f64, radius_km: f64) -> Vec<RankedReport> {
    let mut out: Vec<RankedReport> = reports
        .iter()
        .filter_map(|r| {
            let (rlat, rlon) = r.coords()?;
            let d = distance_km(lat, lon, rlat, rlon);
            (d <= radius_km).then(|| RankedReport {
                report: r.clone(),
                distance_km: d,
            })
        })
        .collect();
    sort_nearest(&mut out);
    out
}

/// Every located report annotated with its distance, nearest first.
pub fn rank_by_distance(reports: &[Report], lat: f64, lon: f64) -> Vec<RankedReport> {
    within_radius(reports, lat, lon, f64::INFINITY)
}

/// Ascending by distance; ties keep their input order.
pub fn sort_nearest(items: &mut [RankedReport]) {
    items.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
}

#[cfg(test)]
mod tests {
    use super::*;

    const HANOI: (f64, f64) = (21.0285, 105.8542);
    const HCMC: (f64, f64) = (10.8231, 106.6297);

    #[test]
    fn zero_for_same_point_and_symmetric() {
        assert_eq!(distance_km(HANOI.0, HANOI.1, HANOI.0, HANOI.1), 0.0);
        let ab = distance_km(HANOI.0, HANOI.1, HCMC.0, HCMC.1);
        let ba = distance_km(HCMC.0, HCMC.1, HANOI.0, HANOI.1);
        assert!((ab - ba).abs() < 1e-9);
    }

    #[test]
    fn hanoi_to_saigon_is_about_1140_km() {
        let d = distance_km(HANOI.0, HANOI.1, HCMC.0, HCMC.1);
        assert!((d - 1140.0).abs() <= 50.0, "d={d}");
    }

    #[test]
    fn radius_filter_skips_unlocated_and_sorts() {
        let reports = vec![
            Report::new("far", "x").with_coords(HCMC.0, HCMC.1),
            Report::new("none", "x"),
            Report::new("near", "x").with_coords(21.03, 105.85),
            Report::new("mid", "x").with_coords(21.2, 105.9),
        ];
        let out = within_radius(&reports, HANOI.0, HANOI.1, 50.0);
        let ids: Vec<&str> = out.iter().map(|r| r.report.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert!(out[0].distance_km <= out[1].distance_km);

        let all = rank_by_distance(&reports, HANOI.0, HANOI.1);
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].report.id, "far");
    }
}
