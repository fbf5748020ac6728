//! City reference points.
//!
//! Maps `(city, county)` pairs, case-insensitively, to a reference
//! coordinate. Built once from configuration at pipeline start and shared
//! read-only by every stage.

use std::collections::HashMap;

use geo::Point;

use crate::config::CityRef;

#[derive(Debug, Clone, Default)]
pub struct CityIndex {
    points: HashMap<(String, String), Point<f64>>,
}

impl CityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[CityRef]) -> Self {
        let mut index = Self::new();
        for entry in entries {
            index.insert(&entry.city, &entry.county, entry.lat, entry.lng);
        }
        index
    }

    pub fn insert(&mut self, city: &str, county: &str, lat: f64, lng: f64) {
        self.points.insert(key(city, county), Point::new(lng, lat));
    }

    /// Reference point for a city, if known. Lookup is case-insensitive
    /// and ignores surrounding whitespace.
    pub fn get(&self, city: &str, county: &str) -> Option<Point<f64>> {
        self.points.get(&key(city, county)).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn key(city: &str, county: &str) -> (String, String) {
    (
        city.trim().to_uppercase(),
        county.trim().to_uppercase(),
    )
}
