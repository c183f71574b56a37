//! Geohash encoding and circle covering for geo indexes.

mod cover;
pub mod geohash;

pub use cover::{compress, cover_circle, distance_squared, precision_for_radius, within_radius};
