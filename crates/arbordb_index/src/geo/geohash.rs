//! Geohash encoding.
//!
//! A geohash interleaves longitude and latitude bisection bits, starting
//! with longitude, and writes them five at a time in base 32.

use crate::error::{IndexError, IndexResult};

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Longest supported geohash.
pub const MAX_PRECISION: usize = 12;

/// The rectangle covered by a geohash cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    /// Southern edge.
    pub min_lat: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Western edge.
    pub min_lon: f64,
    /// Eastern edge.
    pub max_lon: f64,
}

impl GeoBounds {
    /// Centre of the cell.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }
}

/// Encodes a coordinate with `precision` characters (clamped to 1..=12).
pub fn encode(lat: f64, lon: f64, precision: usize) -> String {
    let precision = precision.clamp(1, MAX_PRECISION);
    let (mut lat_min, mut lat_max) = (-90.0, 90.0);
    let (mut lon_min, mut lon_max) = (-180.0, 180.0);
    let mut hash = String::with_capacity(precision);
    let mut even = true;
    let mut bits = 0;
    let mut index = 0usize;

    while hash.len() < precision {
        if even {
            let mid = (lon_min + lon_max) / 2.0;
            if lon >= mid {
                index = index * 2 + 1;
                lon_min = mid;
            } else {
                index *= 2;
                lon_max = mid;
            }
        } else {
            let mid = (lat_min + lat_max) / 2.0;
            if lat >= mid {
                index = index * 2 + 1;
                lat_min = mid;
            } else {
                index *= 2;
                lat_max = mid;
            }
        }
        even = !even;
        bits += 1;
        if bits == 5 {
            hash.push(char::from(BASE32[index]));
            bits = 0;
            index = 0;
        }
    }
    hash
}

/// Returns the cell covered by `hash`.
///
/// # Errors
///
/// Returns [`IndexError::InvalidArgument`] for empty hashes or characters
/// outside the geohash alphabet.
pub fn bounds(hash: &str) -> IndexResult<GeoBounds> {
    if hash.is_empty() {
        return Err(IndexError::invalid_argument("empty geohash"));
    }
    let (mut lat_min, mut lat_max) = (-90.0, 90.0);
    let (mut lon_min, mut lon_max) = (-180.0, 180.0);
    let mut even = true;
    for ch in hash.to_ascii_lowercase().bytes() {
        let index = BASE32.iter().position(|&c| c == ch).ok_or_else(|| {
            IndexError::invalid_argument(format!("invalid geohash \"{hash}\""))
        })?;
        for n in (0..5).rev() {
            let bit = (index >> n) & 1;
            if even {
                let mid = (lon_min + lon_max) / 2.0;
                if bit == 1 {
                    lon_min = mid;
                } else {
                    lon_max = mid;
                }
            } else {
                let mid = (lat_min + lat_max) / 2.0;
                if bit == 1 {
                    lat_min = mid;
                } else {
                    lat_max = mid;
                }
            }
            even = !even;
        }
    }
    Ok(GeoBounds {
        min_lat: lat_min,
        max_lat: lat_max,
        min_lon: lon_min,
        max_lon: lon_max,
    })
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals.max(0));
    (value * factor).round() / factor
}

/// Decodes `hash` to the centre of its cell, rounded to the precision the
/// cell size justifies.
///
/// # Errors
///
/// See [`bounds`].
pub fn decode(hash: &str) -> IndexResult<(f64, f64)> {
    let cell = bounds(hash)?;
    let (lat, lon) = cell.center();
    #[allow(clippy::cast_possible_truncation)]
    let lat_decimals = (2.0 - (cell.max_lat - cell.min_lat).log10()).floor() as i32;
    #[allow(clippy::cast_possible_truncation)]
    let lon_decimals = (2.0 - (cell.max_lon - cell.min_lon).log10()).floor() as i32;
    Ok((round_to(lat, lat_decimals), round_to(lon, lon_decimals)))
}

/// The up to eight cells surrounding `hash`, at the same precision.
///
/// Cells beyond a pole are omitted; longitude wraps around.
///
/// # Errors
///
/// See [`bounds`].
pub fn neighbours(hash: &str) -> IndexResult<Vec<String>> {
    let cell = bounds(hash)?;
    let (lat, lon) = cell.center();
    let height = cell.max_lat - cell.min_lat;
    let width = cell.max_lon - cell.min_lon;
    let mut result = Vec::with_capacity(8);
    for dlat in [-1.0, 0.0, 1.0] {
        for dlon in [-1.0, 0.0, 1.0] {
            if dlat == 0.0 && dlon == 0.0 {
                continue;
            }
            let n_lat = lat + dlat * height;
            if !(-90.0..=90.0).contains(&n_lat) {
                continue;
            }
            let mut n_lon = lon + dlon * width;
            if n_lon >= 180.0 {
                n_lon -= 360.0;
            } else if n_lon < -180.0 {
                n_lon += 360.0;
            }
            let neighbour = encode(n_lat, n_lon, hash.len());
            if !result.contains(&neighbour) {
                result.push(neighbour);
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_vectors() {
        assert_eq!(encode(52.205, 0.119, 7), "u120fxw");
        assert_eq!(decode("u120fxw").unwrap(), (52.205, 0.1188));
        assert_eq!(encode(57.64911, 10.40744, 11), "u4pruydqqvj");
    }

    #[test]
    fn encoding_is_a_prefix_chain() {
        let long = encode(48.8584, 2.2945, 12);
        for precision in 1..12 {
            assert_eq!(encode(48.8584, 2.2945, precision), long[..precision]);
        }
    }

    #[test]
    fn bounds_contain_the_point() {
        let cell = bounds(&encode(-33.8568, 151.2153, 9)).unwrap();
        assert!(cell.min_lat <= -33.8568 && -33.8568 <= cell.max_lat);
        assert!(cell.min_lon <= 151.2153 && 151.2153 <= cell.max_lon);
        assert!(bounds("u12a").is_err());
        assert!(bounds("").is_err());
    }

    #[test]
    fn neighbours_surround_the_cell() {
        let hash = "u120fxw";
        let around = neighbours(hash).unwrap();
        assert_eq!(around.len(), 8);
        assert!(!around.contains(&hash.to_string()));
        assert!(around.contains(&"u120fxq".to_string()));
        assert!(around.contains(&"u120fxx".to_string()));
    }

    #[test]
    fn neighbours_wrap_longitude() {
        let east = encode(0.0, 179.99, 3);
        let around = neighbours(&east).unwrap();
        assert!(around.iter().any(|h| bounds(h).unwrap().min_lon < -170.0));
    }
}
