//! Geohash cells covering a circle.

use super::geohash::{self, MAX_PRECISION};
use crate::error::IndexResult;
use std::collections::{BTreeMap, BTreeSet};

const EARTH_RADIUS_M: f64 = 6_371_000.0;
const METERS_PER_DEGREE_LAT: f64 = 110_540.0;
const METERS_PER_DEGREE_LON: f64 = 111_320.0;

/// Approximate cell width in meters per geohash precision.
const GRID_WIDTH: [f64; MAX_PRECISION] = [
    5_009_400.0, 1_252_300.0, 156_500.0, 39_100.0, 4_900.0, 1_200.0, 152.9, 38.2, 4.8, 1.2,
    0.149, 0.0370,
];

/// Approximate cell height in meters per geohash precision.
const GRID_HEIGHT: [f64; MAX_PRECISION] = [
    4_992_600.0, 624_100.0, 156_000.0, 19_500.0, 4_900.0, 609.4, 152.4, 19.0, 4.8, 0.595,
    0.149, 0.0199,
];

/// Upper radius bounds (meters) for precisions 12 down to 2.
const RADIUS_LIMITS: [(f64, usize); 11] = [
    (0.01, 12),
    (0.075, 11),
    (0.6, 10),
    (2.3, 9),
    (19.0, 8),
    (76.0, 7),
    (610.0, 6),
    (2_400.0, 5),
    (19_500.0, 4),
    (78_700.0, 3),
    (626_000.0, 2),
];

/// Geohash precision suited to searching within `radius` meters.
pub fn precision_for_radius(radius: f64) -> usize {
    RADIUS_LIMITS
        .iter()
        .find(|(limit, _)| radius < *limit)
        .map_or(1, |(_, precision)| *precision)
}

/// Planar squared distance in square meters, using a local flat-earth
/// projection around the first point.
pub fn distance_squared(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dx = (lon2 - lon1) * METERS_PER_DEGREE_LON * lat1.to_radians().cos();
    let dy = (lat2 - lat1) * METERS_PER_DEGREE_LAT;
    dx * dx + dy * dy
}

/// Returns true if `(lat, lon)` lies within `radius` meters of the centre.
pub fn within_radius(center_lat: f64, center_lon: f64, radius: f64, lat: f64, lon: f64) -> bool {
    distance_squared(center_lat, center_lon, lat, lon) <= radius * radius * (1.0 + 1e-9)
}

/// Offsets a coordinate by `(dy, dx)` meters.
fn offset(lat: f64, lon: f64, dy: f64, dx: f64) -> (f64, f64) {
    let dlat = (dy / EARTH_RADIUS_M).to_degrees();
    let dlon = (dx / EARTH_RADIUS_M).to_degrees() / lat.to_radians().cos();
    (lat + dlat, lon + dlon)
}

/// Samples a half-size grid over one quadrant of the circle and mirrors
/// every cell centroid whose near corner lies in the circle into all four
/// quadrants.
fn sample_cells(lat: f64, lon: f64, radius: f64, precision: usize) -> BTreeSet<String> {
    let height = GRID_HEIGHT[precision - 1] / 2.0;
    let width = GRID_WIDTH[precision - 1] / 2.0;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lat_moves = (radius / height).ceil() as u64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lon_moves = (radius / width).ceil() as u64;

    let mut cells = BTreeSet::new();
    for i in 0..=lat_moves {
        #[allow(clippy::cast_precision_loss)]
        let y = height * i as f64;
        for j in 0..=lon_moves {
            #[allow(clippy::cast_precision_loss)]
            let x = width * j as f64;
            if x * x + y * y > radius * radius {
                continue;
            }
            let (cy, cx) = (y + height / 2.0, x + width / 2.0);
            for (sy, sx) in [(1.0, 1.0), (-1.0, 1.0), (1.0, -1.0), (-1.0, -1.0)] {
                let (p_lat, p_lon) = offset(lat, lon, sy * cy, sx * cx);
                if (-90.0..=90.0).contains(&p_lat) {
                    cells.insert(geohash::encode(p_lat, wrap_lon(p_lon), precision));
                }
            }
        }
    }
    cells.insert(geohash::encode(lat, lon, precision));
    cells
}

fn wrap_lon(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped.is_finite() {
        wrapped
    } else {
        lon
    }
}

/// Replaces every complete set of 32 sibling cells by their parent cell.
pub fn compress(cells: BTreeSet<String>) -> BTreeSet<String> {
    let mut cells = cells;
    loop {
        let mut by_parent: BTreeMap<String, usize> = BTreeMap::new();
        for cell in cells.iter().filter(|c| c.len() > 1) {
            *by_parent.entry(cell[..cell.len() - 1].to_string()).or_default() += 1;
        }
        let complete: Vec<String> = by_parent
            .into_iter()
            .filter(|(_, count)| *count == 32)
            .map(|(parent, _)| parent)
            .collect();
        if complete.is_empty() {
            return cells;
        }
        cells.retain(|c| {
            c.len() <= 1 || !complete.iter().any(|p| c.len() == p.len() + 1 && c.starts_with(p.as_str()))
        });
        cells.extend(complete);
    }
}

/// Geohash cells whose union covers the circle of `radius` meters around
/// `(lat, lon)`.
///
/// The sampled cells are widened by their neighbours before compression so
/// that cells only clipped by the circle are included.
///
/// # Errors
///
/// Fails only if an internally generated geohash is malformed.
pub fn cover_circle(lat: f64, lon: f64, radius: f64) -> IndexResult<Vec<String>> {
    let precision = precision_for_radius(radius).min(10);
    let sampled = sample_cells(lat, lon, radius.max(0.0), precision);
    let mut cells = sampled.clone();
    for cell in &sampled {
        cells.extend(geohash::neighbours(cell)?);
    }
    Ok(compress(cells).into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radius_precision_table() {
        assert_eq!(precision_for_radius(0.005), 12);
        assert_eq!(precision_for_radius(1.0), 9);
        assert_eq!(precision_for_radius(100.0), 6);
        assert_eq!(precision_for_radius(1_000.0), 5);
        assert_eq!(precision_for_radius(50_000.0), 3);
        assert_eq!(precision_for_radius(1_000_000.0), 1);
    }

    #[test]
    fn planar_distance() {
        let north = 52.0 + 1_000.0 / METERS_PER_DEGREE_LAT;
        assert!((distance_squared(52.0, 5.0, north, 5.0).sqrt() - 1_000.0).abs() < 1e-6);
        assert!(within_radius(52.0, 5.0, 1_000.0, north, 5.0));
        assert!(!within_radius(52.0, 5.0, 999.0, north, 5.0));
    }

    #[test]
    fn compress_merges_complete_siblings() {
        let mut cells: BTreeSet<String> = "0123456789bcdefghjkmnpqrstuvwxyz"
            .chars()
            .map(|c| format!("u1{c}"))
            .collect();
        cells.insert("u20".to_string());
        let compressed = compress(cells);
        assert_eq!(
            compressed.into_iter().collect::<Vec<_>>(),
            vec!["u1".to_string(), "u20".to_string()]
        );
    }

    #[test]
    fn cover_contains_points_inside_circle() {
        let (lat, lon, radius) = (52.37, 4.89, 1_500.0);
        let cells = cover_circle(lat, lon, radius).unwrap();
        assert!(!cells.is_empty());
        for (dy, dx) in [(0.0, 0.0), (1_400.0, 0.0), (0.0, -1_400.0), (-1_000.0, 1_000.0)] {
            let p_lat = lat + dy / METERS_PER_DEGREE_LAT;
            let p_lon = lon + dx / (METERS_PER_DEGREE_LON * lat.to_radians().cos());
            let hash = geohash::encode(p_lat, p_lon, 10);
            assert!(
                cells.iter().any(|c| hash.starts_with(c.as_str())),
                "{hash} not covered"
            );
        }
    }
}
