//! Geospatial indexes.
//!
//! A `{ lat, long }` value is stored under its precision 10 geohash, with
//! the exact coordinates kept in the `_lat` and `_long` metadata values.
//! `geo:nearby` searches every geohash cell covering the query circle and
//! then drops the points outside the radius.

use super::base::DataIndex;
use super::descriptor::{IndexDescriptor, IndexKind};
use super::query::{QueryOperator, QueryOptions};
use super::results::{IndexQueryResults, IndexQueryStats};
use super::variant::IndexVariant;
use crate::error::{IndexError, IndexResult};
use crate::geo::{cover_circle, geohash, within_radius};
use crate::tree::TreeQuery;
use arbordb_codec::{IndexValue, Metadata, Value};
use std::time::Instant;
use tracing::debug;

/// Geohash precision of indexed points.
pub const GEOHASH_PRECISION: usize = 10;

const LAT_KEY: &str = "_lat";
const LONG_KEY: &str = "_long";

const OPERATORS: &[QueryOperator] = &[QueryOperator::GeoNearby];

/// Indexes `{ lat, long }` locations.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoIndex;

fn coordinates(value: &Value) -> Option<(f64, f64)> {
    let lat = value.get("lat").and_then(Value::as_f64)?;
    let long = value.get("long").and_then(Value::as_f64)?;
    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&long)).then_some((lat, long))
}

/// The centre and radius of a `geo:nearby` argument.
fn circle(arg: &Value) -> IndexResult<(f64, f64, f64)> {
    let (lat, long) = coordinates(arg).ok_or_else(|| {
        IndexError::invalid_argument("geo:nearby needs numeric lat and long within range")
    })?;
    let radius = arg
        .get("radius")
        .and_then(Value::as_f64)
        .filter(|r| *r >= 0.0)
        .ok_or_else(|| IndexError::invalid_argument("geo:nearby needs a radius in meters"))?;
    Ok((lat, long, radius))
}

fn metadata_coordinates(metadata: &Metadata) -> Option<(f64, f64)> {
    let lat = metadata.get(LAT_KEY).and_then(IndexValue::as_f64)?;
    let long = metadata.get(LONG_KEY).and_then(IndexValue::as_f64)?;
    Some((lat, long))
}

impl IndexVariant for GeoIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Geo
    }

    fn valid_operators(&self) -> &'static [QueryOperator] {
        OPERATORS
    }

    fn extract(
        &self,
        _descriptor: &IndexDescriptor,
        value: &Value,
        _locale: &str,
    ) -> IndexResult<Vec<(IndexValue, Metadata)>> {
        let Some((lat, long)) = coordinates(value) else {
            return Ok(Vec::new());
        };
        let mut metadata = Metadata::new();
        metadata.insert(LAT_KEY.to_string(), IndexValue::Number(lat));
        metadata.insert(LONG_KEY.to_string(), IndexValue::Number(long));
        Ok(vec![(
            IndexValue::String(geohash::encode(lat, long, GEOHASH_PRECISION)),
            metadata,
        )])
    }

    fn query(
        &self,
        index: &DataIndex,
        op: QueryOperator,
        arg: &Value,
        options: &QueryOptions<'_>,
    ) -> IndexResult<IndexQueryResults> {
        if op != QueryOperator::GeoNearby {
            return Err(IndexError::UnsupportedOperator {
                operator: op.as_str().to_string(),
                kind: IndexKind::Geo.as_str(),
            });
        }
        let started = Instant::now();
        let (lat, long, radius) = circle(arg)?;
        let cells = cover_circle(lat, long, radius)?;
        debug!(index = %index.description(), cells = cells.len(), radius, "geo cover");

        let mut combined =
            IndexQueryResults::new(Vec::new(), IndexQueryStats::new(op.as_str(), arg.canonical_string()));
        for cell in cells {
            let stats = IndexQueryStats::new("like", format!("{cell}*"));
            combined.union(index.search(&TreeQuery::StartsWith(cell), options, stats)?);
        }
        combined.results.retain(|r| {
            metadata_coordinates(&r.metadata)
                .is_some_and(|(plat, plong)| within_radius(lat, long, radius, plat, plong))
        });
        let count = combined.len();
        combined.stats.finish(started, count);
        Ok(combined)
    }

    fn test(
        &self,
        _index: &DataIndex,
        value: &Value,
        op: QueryOperator,
        arg: &Value,
    ) -> IndexResult<bool> {
        if op != QueryOperator::GeoNearby {
            return Err(IndexError::UnsupportedOperator {
                operator: op.as_str().to_string(),
                kind: IndexKind::Geo.as_str(),
            });
        }
        let (lat, long, radius) = circle(arg)?;
        Ok(coordinates(value)
            .is_some_and(|(plat, plong)| within_radius(lat, long, radius, plat, plong)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexConfig, IndexOptions};
    use crate::index::base::IndexContext;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn built() -> (tempfile::TempDir, DataIndex) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::with_root(Value::from(json!({
            "landmarks": {
                "dam": { "location": { "lat": 52.373, "long": 4.8932 } },
                "rijksmuseum": { "location": { "lat": 52.36, "long": 4.8852 } },
                "utrecht": { "location": { "lat": 52.0907, "long": 5.1214 } },
                "broken": { "location": { "lat": "north" } }
            }
        }))));
        let context = IndexContext::new(dir.path(), store, IndexConfig::default());
        let descriptor =
            IndexDescriptor::new("landmarks", "location", IndexOptions::new(IndexKind::Geo)).unwrap();
        let index = DataIndex::new(context, descriptor).unwrap();
        index.build().unwrap();
        (dir, index)
    }

    fn nearby(index: &DataIndex, radius: f64) -> Vec<String> {
        let arg = Value::from(json!({ "lat": 52.373, "long": 4.8932, "radius": radius }));
        let mut keys: Vec<String> = index
            .query("geo:nearby", &arg, &QueryOptions::default())
            .unwrap()
            .keys()
            .iter()
            .map(|k| k.to_string())
            .collect();
        keys.sort();
        keys
    }

    #[test]
    fn nearby_filters_by_radius() {
        let (_dir, index) = built();
        assert_eq!(nearby(&index, 100.0), vec!["dam"]);
        assert_eq!(nearby(&index, 2_000.0), vec!["dam", "rijksmuseum"]);
        assert_eq!(nearby(&index, 50_000.0), vec!["dam", "rijksmuseum", "utrecht"]);
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        let (_dir, index) = built();
        let arg = Value::from(json!({ "lat": 52.0, "long": 4.0 }));
        let err = index
            .query("geo:nearby", &arg, &QueryOptions::default())
            .unwrap_err();
        assert!(matches!(err.root(), IndexError::InvalidArgument { .. }));
    }

    #[test]
    fn extract_stores_hash_and_coordinates() {
        let descriptor =
            IndexDescriptor::new("landmarks", "location", IndexOptions::new(IndexKind::Geo)).unwrap();
        let entries = GeoIndex
            .extract(&descriptor, &Value::from(json!({ "lat": 52.205, "long": 0.119 })), "en")
            .unwrap();
        let (key, metadata) = &entries[0];
        assert!(key.as_str().unwrap().starts_with("u120fxw"));
        assert_eq!(key.as_str().unwrap().len(), GEOHASH_PRECISION);
        assert_eq!(metadata_coordinates(metadata), Some((52.205, 0.119)));
        assert!(GeoIndex
            .extract(&descriptor, &Value::from(json!({ "lat": 91.0, "long": 0.0 })), "en")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_predicate_uses_planar_distance() {
        let (_dir, index) = built();
        let arg = Value::from(json!({ "lat": 52.373, "long": 4.8932, "radius": 2000.0 }));
        let museum = Value::from(json!({ "lat": 52.36, "long": 4.8852 }));
        let utrecht = Value::from(json!({ "lat": 52.0907, "long": 5.1214 }));
        assert!(index.test(&museum, "geo:nearby", &arg).unwrap());
        assert!(!index.test(&utrecht, "geo:nearby", &arg).unwrap());
        assert!(!index.test(&Value::Null, "geo:nearby", &arg).unwrap());
    }
}
