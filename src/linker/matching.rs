//! Spatial and text matching primitives used to place external entities.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::domain::GeoPoint;

/// Mean Earth radius in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;

/// Great-circle distance between two points in kilometres.
///
/// Uses the haversine formula for accuracy over short distances.
pub fn distance_km(from: GeoPoint, to: GeoPoint) -> f64 {
    let lat1_rad = from.lat * DEG_TO_RAD;
    let lat2_rad = to.lat * DEG_TO_RAD;
    let delta_lat = (to.lat - from.lat) * DEG_TO_RAD;
    let delta_lon = (to.lon - from.lon) * DEG_TO_RAD;

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * c
}

/// Padded character trigrams of every word in `text`.
///
/// Words are runs of alphanumerics, lowercased, padded with two leading
/// spaces and one trailing space.
pub fn trigrams(text: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = format!("  {} ", word.to_lowercase()).chars().collect();
        for window in padded.windows(3) {
            out.insert(window.iter().collect());
        }
    }
    out
}

/// Trigram similarity in [0, 1]: shared trigrams over distinct trigrams.
pub fn similarity(a: &str, b: &str) -> f64 {
    let left = trigrams(a);
    let right = trigrams(b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let shared = left.intersection(&right).count();
    let total = left.len() + right.len() - shared;
    shared as f64 / total as f64
}

/// Stable short hash: first 8 hex chars of SHA-256.
pub fn stable_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(8);
    encoded
}
