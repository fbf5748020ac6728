//! Proximity geocoder.
//!
//! Produces coordinates for a ticket naming a street and an intersecting
//! (or nearby) reference road, even when one or both roads are missing
//! from the network. Strategies, in attempt order:
//!
//! 1. **Closest point** — both roads found but not crossing: midpoint of
//!    the nearest pair of points, when they approach within 1 500 m.
//! 2. **Corridor midpoint** — both roads found and crossing: the crossing
//!    nearest the city reference point.
//! 3. **City + primary street** — one road found: the city reference
//!    point snapped onto that road, within 5 km.
//! 4. **City-centroid fallback** — neither road found: the city reference
//!    point itself, at low confidence.
//!
//! Ticket metadata (type, duration, work type) nudges the base confidence
//! additively; the result is clamped once at the end. A configured
//! pipeline-proximity analyzer can add a further boost near known
//! pipeline infrastructure.

use std::collections::BTreeMap;
use std::sync::Arc;

use geo::Point;

use crate::cities::CityIndex;
use crate::corridor::PipelineProximityAnalyzer;
use crate::error::PipelineError;
use crate::geometry;
use crate::models::Ticket;
use crate::roads::{RoadMatch, RoadNetwork};

pub const APPROACH_CLOSEST_POINT: &str = "closest_point";
pub const APPROACH_CORRIDOR_MIDPOINT: &str = "corridor_midpoint";
pub const APPROACH_CITY_PRIMARY: &str = "city_primary";
pub const APPROACH_CITY_CENTROID_FALLBACK: &str = "city_centroid_fallback";

/// Maximum separation for the closest-point strategy, meters.
pub const CLOSEST_POINT_MAX_M: f64 = 1_500.0;
/// Maximum city-to-road snap distance for city-primary, meters.
pub const CITY_SNAP_MAX_M: f64 = 5_000.0;

const CLOSEST_POINT_BASE: f64 = 0.70;
const CLOSEST_POINT_FLOOR: f64 = 0.55;
const CORRIDOR_MIDPOINT_BASE: f64 = 0.85;
const CITY_PRIMARY_BASE: f64 = 0.65;
const FALLBACK_BASE: f64 = 0.35;
/// Fallback results never exceed this confidence, no matter the boosts.
const FALLBACK_CAP: f64 = 0.50;

/// Successful geocode: coordinates, confidence, strategy tag, and a
/// human-readable account of how the point was chosen.
#[derive(Debug, Clone)]
pub struct GeocodeOutcome {
    pub latitude: f64,
    pub longitude: f64,
    pub confidence: f64,
    pub approach: &'static str,
    pub reasoning: String,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Proximity geocoder over a shared road network and city reference map.
///
/// Pure with respect to its inputs: the same ticket against the same
/// network always produces the same outcome.
#[derive(Debug)]
pub struct ProximityGeocoder {
    network: Arc<RoadNetwork>,
    cities: Arc<CityIndex>,
    pipeline_proximity: Option<Arc<PipelineProximityAnalyzer>>,
}

impl ProximityGeocoder {
    pub fn new(
        network: Arc<RoadNetwork>,
        cities: Arc<CityIndex>,
        pipeline_proximity: Option<Arc<PipelineProximityAnalyzer>>,
    ) -> Self {
        Self {
            network,
            cities,
            pipeline_proximity,
        }
    }

    /// Geocode a ticket. Returns [`PipelineError::StrategyExhausted`] when
    /// every strategy fails (no roads found and no city reference point).
    pub fn geocode(&self, ticket: &Ticket) -> Result<GeocodeOutcome, PipelineError> {
        let street = ticket.street.as_deref().unwrap_or("").trim();
        let intersection = ticket.intersection.as_deref().unwrap_or("").trim();
        let city = ticket.city.as_deref().unwrap_or("").trim();
        let county = ticket.county.as_deref().unwrap_or("").trim();

        let street_match = self.lookup(street);
        let intersection_match = self.lookup(intersection);
        let city_ref = self.cities.get(city, county);

        let mut notes = Vec::new();
        push_match_note(&mut notes, street, street_match.as_ref());
        push_match_note(&mut notes, intersection, intersection_match.as_ref());

        match (street_match, intersection_match) {
            (Some(a), Some(b)) => {
                let crossings = geometry::intersections(&a.geometry, &b.geometry);
                if !crossings.is_empty() {
                    return Ok(self.corridor_midpoint(ticket, &a, &b, crossings, city_ref, notes));
                }
                if let Some((on_a, on_b, distance_m)) =
                    geometry::closest_point_pair(&a.geometry, &b.geometry)
                {
                    if distance_m <= CLOSEST_POINT_MAX_M {
                        return Ok(
                            self.closest_point(ticket, &a, &b, on_a, on_b, distance_m, notes)
                        );
                    }
                    notes.push(format!(
                        "{} and {} never approach within {:.0} m (closest {:.0} m)",
                        a.matched_name, b.matched_name, CLOSEST_POINT_MAX_M, distance_m
                    ));
                }
                self.fallback(ticket, city, county, city_ref, notes)
            }
            (Some(road), None) | (None, Some(road)) => {
                if let Some(city_point) = city_ref {
                    if let Some(snapped) = geometry::closest_point_on(&road.geometry, city_point) {
                        let snap_m = geometry::haversine_m(city_point, snapped);
                        if snap_m <= CITY_SNAP_MAX_M {
                            return Ok(self.city_primary(ticket, &road, snapped, snap_m, notes));
                        }
                        notes.push(format!(
                            "{} runs {:.0} m from the {} reference point, beyond the {:.0} m snap limit",
                            road.matched_name, snap_m, city, CITY_SNAP_MAX_M
                        ));
                    }
                }
                self.fallback(ticket, city, county, city_ref, notes)
            }
            (None, None) => self.fallback(ticket, city, county, city_ref, notes),
        }
    }

    /// Resolve a road name. A lookup miss is non-fatal: the strategy
    /// cascade absorbs it and falls through to the next approach.
    fn lookup(&self, name: &str) -> Option<RoadMatch> {
        if name.is_empty() {
            return None;
        }
        match self.network.find_by_name(name) {
            Some(road) => Some(road),
            None => {
                let miss = PipelineError::SpatialLookupMiss(name.to_string());
                tracing::debug!(%miss, "continuing without this road");
                None
            }
        }
    }

    fn corridor_midpoint(
        &self,
        ticket: &Ticket,
        a: &RoadMatch,
        b: &RoadMatch,
        crossings: Vec<Point<f64>>,
        city_ref: Option<Point<f64>>,
        mut notes: Vec<String>,
    ) -> GeocodeOutcome {
        let crossing_count = crossings.len();
        let point = match city_ref {
            Some(city_point) if crossing_count > 1 => crossings
                .into_iter()
                .min_by(|p, q| {
                    geometry::haversine_m(*p, city_point)
                        .total_cmp(&geometry::haversine_m(*q, city_point))
                })
                .unwrap(),
            _ => crossings[0],
        };

        notes.insert(
            0,
            format!(
                "Corridor midpoint: {} crosses {} at {} point(s); {}",
                a.matched_name,
                b.matched_name,
                crossing_count,
                if crossing_count > 1 && city_ref.is_some() {
                    "chose the crossing nearest the city reference point"
                } else {
                    "used the crossing"
                }
            ),
        );

        let mut metadata = road_pair_metadata(a, b);
        metadata.insert("crossing_count".into(), crossing_count.into());

        self.finish(
            ticket,
            point,
            CORRIDOR_MIDPOINT_BASE,
            None,
            APPROACH_CORRIDOR_MIDPOINT,
            notes,
            metadata,
        )
    }

    fn closest_point(
        &self,
        ticket: &Ticket,
        a: &RoadMatch,
        b: &RoadMatch,
        on_a: Point<f64>,
        on_b: Point<f64>,
        distance_m: f64,
        mut notes: Vec<String>,
    ) -> GeocodeOutcome {
        let point = geometry::midpoint(on_a, on_b);
        let base = closest_point_confidence(distance_m);

        notes.insert(
            0,
            format!(
                "Closest point: {} and {} do not cross; nearest approach {:.0} m, \
                 midpoint of the closest pair used",
                a.matched_name, b.matched_name, distance_m
            ),
        );

        let mut metadata = road_pair_metadata(a, b);
        metadata.insert(
            "closest_distance_m".into(),
            serde_json::json!((distance_m * 100.0).round() / 100.0),
        );

        self.finish(
            ticket,
            point,
            base,
            None,
            APPROACH_CLOSEST_POINT,
            notes,
            metadata,
        )
    }

    fn city_primary(
        &self,
        ticket: &Ticket,
        road: &RoadMatch,
        snapped: Point<f64>,
        snap_m: f64,
        mut notes: Vec<String>,
    ) -> GeocodeOutcome {
        notes.insert(
            0,
            format!(
                "City + primary street: one road not found in network; snapped the city \
                 reference point onto {} ({:.0} m away)",
                road.matched_name, snap_m
            ),
        );

        let mut metadata = BTreeMap::new();
        metadata.insert(
            "available_road".into(),
            serde_json::json!(road.matched_name),
        );
        metadata.insert(
            "city_snap_m".into(),
            serde_json::json!((snap_m * 100.0).round() / 100.0),
        );

        self.finish(
            ticket,
            snapped,
            CITY_PRIMARY_BASE,
            None,
            APPROACH_CITY_PRIMARY,
            notes,
            metadata,
        )
    }

    fn fallback(
        &self,
        ticket: &Ticket,
        city: &str,
        county: &str,
        city_ref: Option<Point<f64>>,
        mut notes: Vec<String>,
    ) -> Result<GeocodeOutcome, PipelineError> {
        let Some(city_point) = city_ref else {
            let street = ticket.street.as_deref().unwrap_or("");
            let intersection = ticket.intersection.as_deref().unwrap_or("");
            return Err(PipelineError::StrategyExhausted(format!(
                "neither road located in network ({street} / {intersection}) and no city \
                 reference point for {city}, {county}"
            )));
        };

        notes.insert(
            0,
            format!(
                "City-centroid fallback: using the approximate center of {city}, {county}; \
                 manual review recommended"
            ),
        );

        let mut metadata = BTreeMap::new();
        metadata.insert(
            "fallback_reason".into(),
            serde_json::json!("roads missing from network"),
        );

        Ok(self.finish(
            ticket,
            city_point,
            FALLBACK_BASE,
            Some(FALLBACK_CAP),
            APPROACH_CITY_CENTROID_FALLBACK,
            notes,
            metadata,
        ))
    }

    /// Apply metadata adjustments and the optional pipeline boost, clamp
    /// once, and assemble the outcome.
    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        ticket: &Ticket,
        point: Point<f64>,
        base: f64,
        cap: Option<f64>,
        approach: &'static str,
        mut notes: Vec<String>,
        mut metadata: BTreeMap<String, serde_json::Value>,
    ) -> GeocodeOutcome {
        let (adjustment, adjustment_notes) = metadata_adjustment(ticket);
        notes.extend(adjustment_notes);

        let mut boost = 0.0;
        if let Some(analyzer) = &self.pipeline_proximity {
            let analysis = analyzer.analyze(point.y(), point.x());
            if let Some(distance_m) = analysis.distance_m {
                metadata.insert(
                    "pipeline_proximity_m".into(),
                    serde_json::json!((distance_m * 100.0).round() / 100.0),
                );
            }
            if analysis.within_boost_zone {
                boost = analysis.confidence_boost;
                metadata.insert("pipeline_boost".into(), serde_json::json!(boost));
                notes.push(format!("within pipeline boost zone (+{boost:.2})"));
            }
        }

        let mut confidence = (base + adjustment + boost).clamp(0.0, 1.0);
        if let Some(cap) = cap {
            confidence = confidence.min(cap);
        }

        metadata.insert("base_confidence".into(), serde_json::json!(base));
        metadata.insert("confidence_adjustment".into(), serde_json::json!(adjustment));

        notes.push(format!(
            "base confidence {base:.2}, final {confidence:.2}"
        ));

        GeocodeOutcome {
            latitude: point.y(),
            longitude: point.x(),
            confidence,
            approach,
            reasoning: notes.join(". "),
            metadata,
        }
    }
}

/// Linear confidence for the closest-point strategy: 0.70 at 0 m down to
/// 0.55 at the 1 500 m limit.
pub fn closest_point_confidence(distance_m: f64) -> f64 {
    let ratio = (distance_m / CLOSEST_POINT_MAX_M).clamp(0.0, 1.0);
    CLOSEST_POINT_BASE - (CLOSEST_POINT_BASE - CLOSEST_POINT_FLOOR) * ratio
}

/// Additive confidence adjustment from ticket metadata, with notes for
/// the reasoning string. Clamping happens once, in `finish`.
fn metadata_adjustment(ticket: &Ticket) -> (f64, Vec<String>) {
    let mut delta = 0.0;
    let mut notes = Vec::new();

    if ticket.ticket_type.as_deref() == Some("Emergency") {
        delta += 0.05;
        notes.push("emergency ticket (+0.05)".to_string());
    }

    if let Some(duration) = &ticket.duration {
        match duration.trim().to_uppercase().as_str() {
            "1 DAY" => {
                delta += 0.10;
                notes.push("short duration (+0.10)".to_string());
            }
            "2 MONTHS" | "6 MONTHS" => {
                delta -= 0.05;
                notes.push("long duration (-0.05)".to_string());
            }
            _ => {}
        }
    }

    if let Some(work_type) = &ticket.work_type {
        let upper = work_type.to_uppercase();
        if upper.contains("HYDRO-EXCAVATION") {
            delta += 0.10;
            notes.push("point work type (+0.10)".to_string());
        }
        if upper.contains("PIPELINE") {
            delta -= 0.05;
            notes.push("corridor work type (-0.05)".to_string());
        }
    }

    (delta, notes)
}

fn push_match_note(notes: &mut Vec<String>, query: &str, road: Option<&RoadMatch>) {
    if let Some(road) = road {
        if !road.matched_name.eq_ignore_ascii_case(query.trim()) {
            notes.push(format!("{} matched network road {}", query, road.matched_name));
        }
    } else if !query.is_empty() {
        notes.push(format!("{query} not found in road network"));
    }
}

fn road_pair_metadata(a: &RoadMatch, b: &RoadMatch) -> BTreeMap<String, serde_json::Value> {
    let mut metadata = BTreeMap::new();
    metadata.insert("matched_street".into(), serde_json::json!(a.matched_name));
    metadata.insert(
        "matched_intersection".into(),
        serde_json::json!(b.matched_name),
    );
    metadata.insert("street_segments".into(), serde_json::json!(a.segment_count));
    metadata.insert(
        "intersection_segments".into(),
        serde_json::json!(b.segment_count),
    );
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roads::{normalize_road_name, RoadClass, RoadSegment};
    use geo::LineString;

    const ANDREWS: (f64, f64) = (32.3185, -102.5457);

    /// Degrees of longitude spanning `meters` east-west at `lat`.
    fn lng_offset(lat_deg: f64, meters: f64) -> f64 {
        meters / (111_195.0 * lat_deg.to_radians().cos())
    }

    fn segment(name: &str, coords: Vec<(f64, f64)>) -> RoadSegment {
        let canonical = normalize_road_name(name);
        RoadSegment {
            class: RoadClass::from_name(&canonical),
            name: canonical,
            geometry: LineString::from(coords),
        }
    }

    fn cities() -> Arc<CityIndex> {
        let mut index = CityIndex::new();
        index.insert("Andrews", "Andrews", ANDREWS.0, ANDREWS.1);
        Arc::new(index)
    }

    fn geocoder(segments: Vec<RoadSegment>) -> ProximityGeocoder {
        ProximityGeocoder::new(
            Arc::new(RoadNetwork::from_segments(segments)),
            cities(),
            None,
        )
    }

    fn ticket(street: &str, intersection: &str) -> Ticket {
        Ticket {
            ticket_number: "T1".into(),
            street: Some(street.into()),
            intersection: Some(intersection.into()),
            city: Some("Andrews".into()),
            county: Some("Andrews".into()),
            ticket_type: Some("Normal".into()),
            ..Ticket::default()
        }
    }

    /// A vertical US 385 and a horizontal FM 1788 crossing at the city.
    fn crossing_network() -> Vec<RoadSegment> {
        vec![
            segment("US 385", vec![(ANDREWS.1, 32.28), (ANDREWS.1, 32.36)]),
            segment(
                "FM 1788",
                vec![(ANDREWS.1 - 0.03, ANDREWS.0), (ANDREWS.1 + 0.03, ANDREWS.0)],
            ),
        ]
    }

    #[test]
    fn test_corridor_midpoint_on_crossing_roads() {
        let geocoder = geocoder(crossing_network());
        let outcome = geocoder.geocode(&ticket("US 385", "FM 1788")).unwrap();

        assert_eq!(outcome.approach, APPROACH_CORRIDOR_MIDPOINT);
        assert_eq!(outcome.confidence, 0.85);
        assert!((outcome.latitude - ANDREWS.0).abs() < 1e-6);
        assert!((outcome.longitude - ANDREWS.1).abs() < 1e-6);
        assert!(outcome.reasoning.contains("Corridor midpoint"));
    }

    #[test]
    fn test_corridor_midpoint_prefers_crossing_near_city() {
        // FM 1788 crosses US 385 twice: at the city and 3 km north
        let far_lat = 32.3185 + 3_000.0 / 111_195.0;
        let mut segments = crossing_network();
        segments.push(segment(
            "FM 1788",
            vec![(ANDREWS.1 - 0.03, far_lat), (ANDREWS.1 + 0.03, far_lat)],
        ));

        let outcome = geocoder(segments)
            .geocode(&ticket("US 385", "FM 1788"))
            .unwrap();
        assert!((outcome.latitude - ANDREWS.0).abs() < 1e-6);
    }

    #[test]
    fn test_closest_point_confidence_curve() {
        assert!((closest_point_confidence(0.0) - 0.70).abs() < 1e-9);
        assert!((closest_point_confidence(750.0) - 0.625).abs() < 1e-9);
        assert!((closest_point_confidence(1_500.0) - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_closest_point_on_parallel_roads() {
        // Two parallel north-south county roads ~600 m apart
        let lng_b = ANDREWS.1 + lng_offset(32.32, 600.0);
        let segments = vec![
            segment("CR 201", vec![(ANDREWS.1, 32.30), (ANDREWS.1, 32.34)]),
            segment("CR 203", vec![(lng_b, 32.30), (lng_b, 32.34)]),
        ];

        let outcome = geocoder(segments)
            .geocode(&ticket("CR 201", "CR 203"))
            .unwrap();

        assert_eq!(outcome.approach, APPROACH_CLOSEST_POINT);
        assert!(
            (outcome.confidence - 0.64).abs() < 0.005,
            "confidence {}",
            outcome.confidence
        );
        // Midpoint sits between the two roads
        let mid = ANDREWS.1 + lng_offset(32.32, 300.0);
        assert!((outcome.longitude - mid).abs() < 1e-4);
    }

    #[test]
    fn test_parallel_roads_too_far_fall_back() {
        let lng_b = ANDREWS.1 + lng_offset(32.32, 4_000.0);
        let segments = vec![
            segment("CR 201", vec![(ANDREWS.1, 32.30), (ANDREWS.1, 32.34)]),
            segment("CR 203", vec![(lng_b, 32.30), (lng_b, 32.34)]),
        ];

        let outcome = geocoder(segments)
            .geocode(&ticket("CR 201", "CR 203"))
            .unwrap();
        assert_eq!(outcome.approach, APPROACH_CITY_CENTROID_FALLBACK);
        assert_eq!(outcome.confidence, 0.35);
    }

    #[test]
    fn test_city_primary_snaps_city_onto_road() {
        // Only US 385 exists, passing ~1 km east of the city point
        let lng_road = ANDREWS.1 + lng_offset(ANDREWS.0, 1_000.0);
        let segments = vec![segment("US 385", vec![(lng_road, 32.28), (lng_road, 32.36)])];

        let outcome = geocoder(segments)
            .geocode(&ticket("LAKEVIEW DR", "US 385"))
            .unwrap();

        assert_eq!(outcome.approach, APPROACH_CITY_PRIMARY);
        assert_eq!(outcome.confidence, 0.65);
        assert!((outcome.longitude - lng_road).abs() < 1e-6);
        assert!((outcome.latitude - ANDREWS.0).abs() < 1e-4);
        assert!(outcome.reasoning.contains("LAKEVIEW DR not found in road network"));
    }

    #[test]
    fn test_city_primary_beyond_snap_limit_falls_back() {
        let lng_road = ANDREWS.1 + lng_offset(ANDREWS.0, 8_000.0);
        let segments = vec![segment("US 385", vec![(lng_road, 32.28), (lng_road, 32.36)])];

        let outcome = geocoder(segments)
            .geocode(&ticket("LAKEVIEW DR", "US 385"))
            .unwrap();
        assert_eq!(outcome.approach, APPROACH_CITY_CENTROID_FALLBACK);
    }

    #[test]
    fn test_fallback_emergency_bonus() {
        let mut t = ticket("FRYING PAN RANCH RD", "P15");
        t.ticket_type = Some("Emergency".into());

        let outcome = geocoder(vec![]).geocode(&t).unwrap();
        assert_eq!(outcome.approach, APPROACH_CITY_CENTROID_FALLBACK);
        assert!((outcome.confidence - 0.40).abs() < 1e-9);
        assert!((outcome.latitude - ANDREWS.0).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_confidence_cap() {
        let mut t = ticket("NOWHERE RD", "ALSO NOWHERE");
        t.ticket_type = Some("Emergency".into());
        t.duration = Some("1 DAY".into());
        t.work_type = Some("Hydro-excavation".into());

        // 0.35 + 0.05 + 0.10 + 0.10 would be 0.60; the fallback cap holds it at 0.50
        let outcome = geocoder(vec![]).geocode(&t).unwrap();
        assert_eq!(outcome.confidence, 0.50);
    }

    #[test]
    fn test_no_roads_no_city_exhausts_strategies() {
        let mut t = ticket("NOWHERE RD", "ALSO NOWHERE");
        t.city = Some("Wink".into());
        t.county = Some("Winkler".into());

        let err = geocoder(vec![]).geocode(&t).unwrap_err();
        assert!(matches!(err, PipelineError::StrategyExhausted(_)));
        let msg = err.to_string();
        assert!(msg.contains("NOWHERE RD"));
        assert!(msg.contains("Wink"));
    }

    #[test]
    fn test_variant_lookup_named_in_reasoning() {
        // Network carries SH 115; the ticket says HWY 115
        let segments = vec![
            segment("SH 115", vec![(ANDREWS.1, 32.28), (ANDREWS.1, 32.36)]),
            segment(
                "FM 1788",
                vec![(ANDREWS.1 - 0.03, ANDREWS.0), (ANDREWS.1 + 0.03, ANDREWS.0)],
            ),
        ];

        let outcome = geocoder(segments)
            .geocode(&ticket("HWY 115", "FM 1788"))
            .unwrap();
        assert_eq!(outcome.approach, APPROACH_CORRIDOR_MIDPOINT);
        assert!(
            outcome.reasoning.contains("SH 115"),
            "reasoning should name the matched road: {}",
            outcome.reasoning
        );
    }

    #[test]
    fn test_metadata_adjustments() {
        let mut t = ticket("US 385", "FM 1788");
        t.duration = Some("2 MONTHS".into());
        t.work_type = Some("Pipeline Maintenance".into());

        // 0.85 − 0.05 (duration) − 0.05 (work type) = 0.75
        let outcome = geocoder(crossing_network()).geocode(&t).unwrap();
        assert!((outcome.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_pipeline_boost_applies() {
        // Pipeline runs along US 385, so the crossing is inside the boost zone
        let pipeline = geo::MultiLineString(vec![LineString::from(vec![
            (ANDREWS.1, 32.28),
            (ANDREWS.1, 32.36),
        ])]);
        let geocoder = ProximityGeocoder::new(
            Arc::new(RoadNetwork::from_segments(crossing_network())),
            cities(),
            Some(Arc::new(PipelineProximityAnalyzer::new(pipeline, 500.0))),
        );

        let outcome = geocoder.geocode(&ticket("US 385", "FM 1788")).unwrap();
        // 0.85 + 0.15 boost, clamped to 1.0
        assert!((outcome.confidence - 1.0).abs() < 1e-9);
        assert!(outcome.metadata.contains_key("pipeline_boost"));
    }
}
