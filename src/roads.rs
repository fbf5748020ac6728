//! Road network: normalized name lookup and geometric queries.
//!
//! Dig tickets spell road names every way imaginable — `HWY 115`,
//! `FM1788`, `County Road 201`, `U.S. 385 HWY` — while the network layer
//! carries one canonical spelling per road. Both sides are therefore
//! normalized to a canonical form before comparison, and when the
//! canonical form still misses, prefix-family variants are tried
//! (`SH 115` ↔ `FM 115` ↔ `CR 115` ↔ `US 115`) in deterministic
//! alphabetical order.
//!
//! The network is loaded once per batch from a GeoJSON layer and shared
//! read-only with every stage.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use geo::{MultiLineString, Point};
use regex::Regex;

use crate::error::PipelineError;
use crate::geometry;

/// Road classification derived from the canonical name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoadClass {
    Interstate,
    Us,
    State,
    Fm,
    Cr,
    Service,
    Other,
}

impl RoadClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interstate => "Interstate",
            Self::Us => "US",
            Self::State => "State",
            Self::Fm => "FM",
            Self::Cr => "CR",
            Self::Service => "Service",
            Self::Other => "Other",
        }
    }

    /// Classify a canonical road name.
    pub fn from_name(canonical: &str) -> Self {
        if canonical.starts_with("I ") || canonical.starts_with("IH ") {
            Self::Interstate
        } else if canonical.starts_with("US ") {
            Self::Us
        } else if canonical.starts_with("SH ") {
            Self::State
        } else if canonical.starts_with("FM ") {
            Self::Fm
        } else if canonical.starts_with("CR ") {
            Self::Cr
        } else if canonical.contains("SVC") || canonical.contains("FRONTAGE") {
            Self::Service
        } else {
            Self::Other
        }
    }
}

/// One road with a canonical name and its line geometry (lng/lat order).
#[derive(Debug, Clone)]
pub struct RoadSegment {
    pub name: String,
    pub class: RoadClass,
    pub geometry: geo::LineString<f64>,
}

/// Result of a name lookup: the canonical name that matched, the combined
/// geometry of every segment carrying it, and whether a prefix-family
/// variant was needed.
#[derive(Debug, Clone)]
pub struct RoadMatch {
    pub matched_name: String,
    pub class: RoadClass,
    pub segment_count: usize,
    pub geometry: MultiLineString<f64>,
    pub variant_used: bool,
}

/// Loaded road network with a canonical-name index.
#[derive(Debug, Clone, Default)]
pub struct RoadNetwork {
    segments: Vec<RoadSegment>,
    by_name: HashMap<String, Vec<usize>>,
}

impl RoadNetwork {
    /// Load a GeoJSON road layer. Feature properties are probed for the
    /// road name under `name`, `road_name`, `ref`, then `road_ref`;
    /// nameless features are skipped.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!(
                "failed to read road network {}: {e}",
                path.display()
            ))
        })?;
        let doc: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
            PipelineError::Configuration(format!(
                "invalid GeoJSON road network {}: {e}",
                path.display()
            ))
        })?;

        let mut segments = Vec::new();
        for feature in doc["features"].as_array().into_iter().flatten() {
            let props = &feature["properties"];
            let raw_name = ["name", "road_name", "ref", "road_ref"]
                .iter()
                .find_map(|key| props[*key].as_str())
                .unwrap_or("");
            let canonical = normalize_road_name(raw_name);
            if canonical.is_empty() {
                continue;
            }
            let class = RoadClass::from_name(&canonical);

            let mut lines = Vec::new();
            geometry::collect_linework(&feature["geometry"], &mut lines);
            for line in lines {
                segments.push(RoadSegment {
                    name: canonical.clone(),
                    class,
                    geometry: line,
                });
            }
        }

        tracing::info!(
            segments = segments.len(),
            path = %path.display(),
            "loaded road network"
        );
        Ok(Self::from_segments(segments))
    }

    /// Build a network from pre-normalized segments.
    pub fn from_segments(segments: Vec<RoadSegment>) -> Self {
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, segment) in segments.iter().enumerate() {
            by_name.entry(segment.name.clone()).or_default().push(idx);
        }
        Self { segments, by_name }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Look a road up by any spelling. The caller's name is normalized;
    /// if the canonical form misses, prefix-family variants are tried in
    /// deterministic order.
    pub fn find_by_name(&self, name: &str) -> Option<RoadMatch> {
        let canonical = normalize_road_name(name);
        if canonical.is_empty() {
            return None;
        }

        if let Some(m) = self.match_exact(&canonical, false) {
            return Some(m);
        }
        for variant in name_variants(&canonical) {
            if let Some(m) = self.match_exact(&variant, true) {
                return Some(m);
            }
        }
        None
    }

    fn match_exact(&self, canonical: &str, variant_used: bool) -> Option<RoadMatch> {
        let indices = self.by_name.get(canonical)?;
        let lines: Vec<_> = indices
            .iter()
            .map(|&idx| self.segments[idx].geometry.clone())
            .collect();
        Some(RoadMatch {
            matched_name: canonical.to_string(),
            class: self.segments[indices[0]].class,
            segment_count: indices.len(),
            geometry: MultiLineString(lines),
            variant_used,
        })
    }

    /// Crossing points between two road geometries.
    pub fn intersections(a: &MultiLineString<f64>, b: &MultiLineString<f64>) -> Vec<Point<f64>> {
        geometry::intersections(a, b)
    }

    /// Closest pair of points between two non-crossing road geometries.
    pub fn closest_point_pair(
        a: &MultiLineString<f64>,
        b: &MultiLineString<f64>,
    ) -> Option<(Point<f64>, Point<f64>, f64)> {
        geometry::closest_point_pair(a, b)
    }
}

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
/// Glued or hyphenated prefix: `FM1788`, `TX-115`, `US-385`, `I-20`.
static GLUED_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(FM|CR|SH|TX|US|HWY|IH|I)-?\s*(\d+)$").unwrap());
static NUMBERED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([A-Z ]+?) (\d+)$").unwrap());

/// Trailing road-type words stripped before prefix canonicalization.
const TRAILING_TYPES: &[&str] = &[
    "RD", "ROAD", "AVE", "AVENUE", "ST", "STREET", "DR", "DRIVE", "HWY", "HIGHWAY", "LN", "LANE",
    "BLVD",
];

/// Normalize a raw road name to its canonical form.
///
/// Applied in order: uppercase and trim; collapse whitespace; strip
/// trailing road-type words; split glued prefixes (`FM1788` → `FM 1788`);
/// canonicalize prefix families (`HWY 115`/`TX 115`/`HIGHWAY 115` →
/// `SH 115`, `US HWY 385` → `US 385`, `FARM TO MARKET 1788` → `FM 1788`,
/// `COUNTY ROAD 201` → `CR 201`).
pub fn normalize_road_name(raw: &str) -> String {
    let mut name = raw.trim().to_uppercase().replace('.', "");
    name = WHITESPACE.replace_all(&name, " ").trim().to_string();
    if name.is_empty() {
        return name;
    }

    // Strip trailing road-type words ("FRYING PAN RANCH RD" → "FRYING PAN RANCH")
    loop {
        let mut words: Vec<&str> = name.split(' ').collect();
        if words.len() > 1 && TRAILING_TYPES.contains(words.last().unwrap()) {
            words.pop();
            name = words.join(" ");
        } else {
            break;
        }
    }

    if let Some(caps) = GLUED_PREFIX.captures(&name) {
        name = format!("{} {}", &caps[1], &caps[2]);
    }

    if let Some(caps) = NUMBERED.captures(&name) {
        let prefix = caps[1].to_string();
        let number = caps[2].to_string();
        let family = match prefix.as_str() {
            "HWY" | "HIGHWAY" | "TX" | "SH" | "STATE HWY" | "STATE HIGHWAY" => Some("SH"),
            "US" | "US HWY" | "US HIGHWAY" | "U S" => Some("US"),
            "FM" | "FARM TO MARKET" | "FARM MARKET" => Some("FM"),
            "CR" | "COUNTY ROAD" | "CO RD" => Some("CR"),
            "I" | "IH" | "INTERSTATE" => Some("I"),
            _ => None,
        };
        if let Some(family) = family {
            name = format!("{family} {number}");
        }
    }

    name
}

/// Prefix-family variants for a canonical numbered name, in deterministic
/// alphabetical family order. Non-numbered names have no variants.
pub fn name_variants(canonical: &str) -> Vec<String> {
    const FAMILIES: &[&str] = &["CR", "FM", "SH", "US"];

    let Some(caps) = NUMBERED.captures(canonical) else {
        return Vec::new();
    };
    let prefix = &caps[1];
    let number = &caps[2];
    if !FAMILIES.contains(&prefix) {
        return Vec::new();
    }

    FAMILIES
        .iter()
        .filter(|family| **family != prefix)
        .map(|family| format!("{family} {number}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::LineString;

    fn segment(name: &str, coords: Vec<(f64, f64)>) -> RoadSegment {
        let canonical = normalize_road_name(name);
        RoadSegment {
            class: RoadClass::from_name(&canonical),
            name: canonical,
            geometry: LineString::from(coords),
        }
    }

    #[test]
    fn test_normalize_prefix_families() {
        assert_eq!(normalize_road_name("HWY 115"), "SH 115");
        assert_eq!(normalize_road_name("Highway 115"), "SH 115");
        assert_eq!(normalize_road_name("TX-115"), "SH 115");
        assert_eq!(normalize_road_name("US HWY 385"), "US 385");
        assert_eq!(normalize_road_name("US-385"), "US 385");
        assert_eq!(normalize_road_name("Farm to Market 1788"), "FM 1788");
        assert_eq!(normalize_road_name("FM-1788"), "FM 1788");
        assert_eq!(normalize_road_name("County Road 201"), "CR 201");
        assert_eq!(normalize_road_name("CR 201"), "CR 201");
    }

    #[test]
    fn test_normalize_glued_numbers() {
        assert_eq!(normalize_road_name("FM516"), "FM 516");
        assert_eq!(normalize_road_name("CR432"), "CR 432");
        assert_eq!(normalize_road_name("fm 516"), "FM 516");
    }

    #[test]
    fn test_normalize_strips_trailing_type_words() {
        assert_eq!(normalize_road_name("FRYING PAN RANCH RD"), "FRYING PAN RANCH");
        assert_eq!(normalize_road_name("Lakeview Drive"), "LAKEVIEW");
        assert_eq!(normalize_road_name("MAIN STREET"), "MAIN");
        // A lone type word is left alone
        assert_eq!(normalize_road_name("HWY"), "HWY");
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize_road_name("  CR   201  "), "CR 201");
    }

    #[test]
    fn test_variants_deterministic_alphabetical() {
        assert_eq!(name_variants("SH 115"), vec!["CR 115", "FM 115", "US 115"]);
        assert_eq!(name_variants("CR 516"), vec!["FM 516", "SH 516", "US 516"]);
        assert_eq!(name_variants("FRYING PAN RANCH"), Vec::<String>::new());
    }

    #[test]
    fn test_find_exact_match() {
        let network = RoadNetwork::from_segments(vec![
            segment("US 385", vec![(-102.54, 32.30), (-102.54, 32.34)]),
            segment("US 385", vec![(-102.54, 32.34), (-102.54, 32.38)]),
            segment("FM 1788", vec![(-102.56, 32.32), (-102.52, 32.32)]),
        ]);

        let m = network.find_by_name("US 385").unwrap();
        assert_eq!(m.matched_name, "US 385");
        assert_eq!(m.segment_count, 2);
        assert_eq!(m.class, RoadClass::Us);
        assert!(!m.variant_used);
    }

    #[test]
    fn test_find_via_normalization() {
        let network = RoadNetwork::from_segments(vec![segment(
            "SH 115",
            vec![(-103.0, 31.8), (-103.0, 31.9)],
        )]);

        // "HWY 115" normalizes straight to the canonical "SH 115"
        let m = network.find_by_name("HWY 115").unwrap();
        assert_eq!(m.matched_name, "SH 115");
        assert!(!m.variant_used);
    }

    #[test]
    fn test_find_via_variant_family_swap() {
        let network = RoadNetwork::from_segments(vec![segment(
            "FM 115",
            vec![(-103.0, 31.8), (-103.0, 31.9)],
        )]);

        // Canonical "SH 115" misses; the FM variant hits
        let m = network.find_by_name("HWY 115").unwrap();
        assert_eq!(m.matched_name, "FM 115");
        assert!(m.variant_used);
    }

    #[test]
    fn test_find_missing_road() {
        let network = RoadNetwork::from_segments(vec![segment(
            "CR 201",
            vec![(-103.0, 31.8), (-103.0, 31.9)],
        )]);
        assert!(network.find_by_name("FRYING PAN RANCH RD").is_none());
        assert!(network.find_by_name("").is_none());
    }

    #[test]
    fn test_road_class_from_name() {
        assert_eq!(RoadClass::from_name("US 385"), RoadClass::Us);
        assert_eq!(RoadClass::from_name("SH 115"), RoadClass::State);
        assert_eq!(RoadClass::from_name("FM 1788"), RoadClass::Fm);
        assert_eq!(RoadClass::from_name("CR 201"), RoadClass::Cr);
        assert_eq!(RoadClass::from_name("I 20"), RoadClass::Interstate);
        assert_eq!(normalize_road_name("I-20"), "I 20");
        assert_eq!(normalize_road_name("IH 20"), "I 20");
        assert_eq!(RoadClass::from_name("FRYING PAN RANCH"), RoadClass::Other);
    }
}
