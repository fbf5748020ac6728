//! Validation rule engine.
//!
//! A rule is an independent pure function from a geocode record (plus
//! shared spatial context) to an optional hit. The engine runs every
//! enabled rule and collects flags; rule order never changes the flag
//! set. A rule that errors internally is treated as not fired and the
//! record gains a `validator_error` flag instead.

use crate::cities::CityIndex;
use crate::corridor::{PipelineProximityAnalyzer, RouteCorridorValidator};
use crate::error::PipelineError;
use crate::geocoder::{APPROACH_CITY_CENTROID_FALLBACK, APPROACH_CITY_PRIMARY};
use crate::geometry;
use crate::models::GeocodeRecord;

/// Flag added when a validation rule itself errors.
pub const VALIDATOR_ERROR_FLAG: &str = "validator_error";

/// Rule hit severity. The record-level severity is the maximum across
/// all hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// A triggered validation rule.
#[derive(Debug, Clone)]
pub struct RuleHit {
    pub flag: String,
    pub severity: Severity,
    pub message: String,
    pub action: String,
}

/// Shared read-only context handed to every rule.
pub struct ValidationContext<'a> {
    pub cities: &'a CityIndex,
    pub corridor: Option<&'a RouteCorridorValidator>,
    pub pipeline: Option<&'a PipelineProximityAnalyzer>,
    /// Threshold for the `city_distance` rule, kilometers.
    pub city_distance_km: f64,
    /// Threshold for the `pipeline_mismatch` rule, meters.
    pub pipeline_mismatch_m: f64,
}

impl<'a> ValidationContext<'a> {
    pub fn new(cities: &'a CityIndex) -> Self {
        Self {
            cities,
            corridor: None,
            pipeline: None,
            city_distance_km: 50.0,
            pipeline_mismatch_m: 500.0,
        }
    }
}

type Rule = fn(&GeocodeRecord, &ValidationContext) -> Result<Option<RuleHit>, PipelineError>;

/// Every registered rule, keyed by name.
const REGISTRY: &[(&str, Rule)] = &[
    ("low_confidence", low_confidence),
    ("emergency_low_confidence", emergency_low_confidence),
    ("city_distance", city_distance),
    ("fallback_geocode", fallback_geocode),
    ("missing_road", missing_road),
    ("out_of_corridor", out_of_corridor),
    ("pipeline_mismatch", pipeline_mismatch),
];

/// Result of running the engine over one record.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub hits: Vec<RuleHit>,
    pub validator_errors: usize,
}

impl ValidationReport {
    pub fn flags(&self) -> Vec<String> {
        let mut flags: Vec<String> = self.hits.iter().map(|h| h.flag.clone()).collect();
        if self.validator_errors > 0 {
            flags.push(VALIDATOR_ERROR_FLAG.to_string());
        }
        flags
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.hits.iter().map(|h| h.severity).max()
    }
}

/// Runs an enabled subset of the rule registry.
#[derive(Debug)]
pub struct ValidationEngine {
    rules: Vec<(&'static str, Rule)>,
}

impl ValidationEngine {
    /// Engine with every registered rule enabled.
    pub fn with_default_rules() -> Self {
        Self {
            rules: REGISTRY.to_vec(),
        }
    }

    /// Engine restricted to the named rules. Unknown names are a
    /// configuration error. An empty list means every rule.
    pub fn with_rules(names: &[String]) -> Result<Self, PipelineError> {
        if names.is_empty() {
            return Ok(Self::with_default_rules());
        }
        let mut rules = Vec::new();
        for name in names {
            let rule = REGISTRY
                .iter()
                .find(|(key, _)| *key == name.as_str())
                .ok_or_else(|| {
                    PipelineError::Configuration(format!("unknown validation rule: {name}"))
                })?;
            rules.push(*rule);
        }
        Ok(Self { rules })
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|(name, _)| *name).collect()
    }

    /// Run every enabled rule over a record.
    pub fn validate(&self, record: &GeocodeRecord, ctx: &ValidationContext) -> ValidationReport {
        let mut report = ValidationReport::default();
        for (name, rule) in &self.rules {
            match rule(record, ctx) {
                Ok(Some(hit)) => report.hits.push(hit),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(rule = name, %err, "validation rule errored");
                    report.validator_errors += 1;
                }
            }
        }
        report
    }
}

fn low_confidence(
    record: &GeocodeRecord,
    _ctx: &ValidationContext,
) -> Result<Option<RuleHit>, PipelineError> {
    let Some(confidence) = record.confidence else {
        return Ok(None);
    };
    if confidence < 0.65 {
        return Ok(Some(RuleHit {
            flag: "low_confidence".into(),
            severity: Severity::Warning,
            message: format!("confidence {confidence:.2} is below 0.65"),
            action: "review location accuracy".into(),
        }));
    }
    Ok(None)
}

fn emergency_low_confidence(
    record: &GeocodeRecord,
    _ctx: &ValidationContext,
) -> Result<Option<RuleHit>, PipelineError> {
    if record.ticket_type.as_deref() != Some("Emergency") {
        return Ok(None);
    }
    let Some(confidence) = record.confidence else {
        return Ok(None);
    };
    if confidence < 0.75 {
        return Ok(Some(RuleHit {
            flag: "emergency_low_confidence".into(),
            severity: Severity::Error,
            message: format!("emergency ticket geocoded at {confidence:.2} confidence"),
            action: "priority review; emergency response location must be accurate".into(),
        }));
    }
    Ok(None)
}

fn city_distance(
    record: &GeocodeRecord,
    ctx: &ValidationContext,
) -> Result<Option<RuleHit>, PipelineError> {
    let (Some(lat), Some(lng)) = (record.latitude, record.longitude) else {
        return Ok(None);
    };
    let (Some(city), Some(county)) = (record.city.as_deref(), record.county.as_deref()) else {
        return Ok(None);
    };
    let Some(city_point) = ctx.cities.get(city, county) else {
        return Ok(None);
    };

    let distance_km = geometry::haversine_m(geo::Point::new(lng, lat), city_point) / 1_000.0;
    if distance_km > ctx.city_distance_km {
        return Ok(Some(RuleHit {
            flag: "city_distance".into(),
            severity: Severity::Warning,
            message: format!(
                "location is {distance_km:.1} km from the {city} reference point (max {:.0} km)",
                ctx.city_distance_km
            ),
            action: "verify the location belongs to this city".into(),
        }));
    }
    Ok(None)
}

fn fallback_geocode(
    record: &GeocodeRecord,
    _ctx: &ValidationContext,
) -> Result<Option<RuleHit>, PipelineError> {
    if record.approach.as_deref() == Some(APPROACH_CITY_CENTROID_FALLBACK) {
        return Ok(Some(RuleHit {
            flag: "fallback_geocode".into(),
            severity: Severity::Error,
            message: "both roads missing from network; city centroid used".into(),
            action: "locate the actual work area; a city centroid is very approximate".into(),
        }));
    }
    Ok(None)
}

fn missing_road(
    record: &GeocodeRecord,
    _ctx: &ValidationContext,
) -> Result<Option<RuleHit>, PipelineError> {
    let one_road_missing = record.approach.as_deref() == Some(APPROACH_CITY_PRIMARY)
        || record
            .reasoning
            .as_deref()
            .is_some_and(|r| r.contains("not found in road network"));
    if one_road_missing && record.approach.as_deref() != Some(APPROACH_CITY_CENTROID_FALLBACK) {
        return Ok(Some(RuleHit {
            flag: "missing_road".into(),
            severity: Severity::Warning,
            message: "a named road was not located in the network".into(),
            action: "consider adding the missing road for a more precise location".into(),
        }));
    }
    Ok(None)
}

fn out_of_corridor(
    record: &GeocodeRecord,
    ctx: &ValidationContext,
) -> Result<Option<RuleHit>, PipelineError> {
    let Some(corridor) = ctx.corridor else {
        return Ok(None);
    };
    let (Some(lat), Some(lng)) = (record.latitude, record.longitude) else {
        return Ok(None);
    };

    let check = corridor.check(lat, lng);
    if !check.within {
        let distance = check
            .distance_m
            .map(|d| format!("{d:.0} m"))
            .unwrap_or_else(|| "unknown distance".into());
        return Ok(Some(RuleHit {
            flag: "out_of_corridor".into(),
            severity: Severity::Warning,
            message: format!(
                "location is outside the route corridor ({distance} from centerline, buffer {:.0} m)",
                corridor.buffer_m()
            ),
            action: "confirm the work site is on the planned route".into(),
        }));
    }
    Ok(None)
}

fn pipeline_mismatch(
    record: &GeocodeRecord,
    ctx: &ValidationContext,
) -> Result<Option<RuleHit>, PipelineError> {
    let Some(pipeline) = ctx.pipeline else {
        return Ok(None);
    };
    let (Some(lat), Some(lng)) = (record.latitude, record.longitude) else {
        return Ok(None);
    };

    let analysis = pipeline.analyze(lat, lng);
    if let Some(distance_m) = analysis.distance_m {
        if distance_m > ctx.pipeline_mismatch_m {
            return Ok(Some(RuleHit {
                flag: "pipeline_mismatch".into(),
                severity: Severity::Warning,
                message: format!(
                    "location is {distance_m:.0} m from the nearest known pipeline (max {:.0} m)",
                    ctx.pipeline_mismatch_m
                ),
                action: "check whether the work references pipeline infrastructure".into(),
            }));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Ticket;
    use geo::{LineString, MultiLineString};

    fn record(confidence: Option<f64>, approach: Option<&str>) -> GeocodeRecord {
        let ticket = Ticket {
            ticket_number: "T1".into(),
            street: Some("CR 426".into()),
            intersection: Some("CR 432".into()),
            city: Some("Pyote".into()),
            county: Some("Ward".into()),
            ticket_type: Some("Normal".into()),
            ..Ticket::default()
        };
        let mut record = GeocodeRecord::from_ticket(&ticket, "proximity");
        record.latitude = Some(31.5401);
        record.longitude = Some(-103.1293);
        record.confidence = confidence;
        record.approach = approach.map(|a| a.to_string());
        record
    }

    fn pyote_cities() -> CityIndex {
        let mut cities = CityIndex::new();
        cities.insert("Pyote", "Ward", 31.5401, -103.1293);
        cities
    }

    #[test]
    fn test_low_confidence_fires_below_threshold() {
        let cities = pyote_cities();
        let ctx = ValidationContext::new(&cities);
        let engine = ValidationEngine::with_default_rules();

        let report = engine.validate(&record(Some(0.64), Some("closest_point")), &ctx);
        assert!(report.flags().contains(&"low_confidence".to_string()));

        let report = engine.validate(&record(Some(0.65), Some("closest_point")), &ctx);
        assert!(!report.flags().contains(&"low_confidence".to_string()));
    }

    #[test]
    fn test_emergency_low_confidence() {
        let cities = pyote_cities();
        let ctx = ValidationContext::new(&cities);
        let engine = ValidationEngine::with_default_rules();

        let mut rec = record(Some(0.74), Some("closest_point"));
        rec.ticket_type = Some("Emergency".into());
        let report = engine.validate(&rec, &ctx);
        let flags = report.flags();
        assert!(flags.contains(&"emergency_low_confidence".to_string()));
        assert_eq!(report.max_severity(), Some(Severity::Error));

        // A normal ticket at the same confidence does not fire the rule
        let report = engine.validate(&record(Some(0.74), Some("closest_point")), &ctx);
        assert!(!report
            .flags()
            .contains(&"emergency_low_confidence".to_string()));
    }

    #[test]
    fn test_city_distance() {
        let cities = pyote_cities();
        let ctx = ValidationContext::new(&cities);
        let engine = ValidationEngine::with_default_rules();

        // ~0.6° of latitude is well past 50 km
        let mut rec = record(Some(0.85), Some("corridor_midpoint"));
        rec.latitude = Some(32.2);
        let report = engine.validate(&rec, &ctx);
        assert!(report.flags().contains(&"city_distance".to_string()));

        let report = engine.validate(&record(Some(0.85), Some("corridor_midpoint")), &ctx);
        assert!(!report.flags().contains(&"city_distance".to_string()));
    }

    #[test]
    fn test_fallback_geocode_flag() {
        let cities = pyote_cities();
        let ctx = ValidationContext::new(&cities);
        let engine = ValidationEngine::with_default_rules();

        let report = engine.validate(
            &record(Some(0.35), Some(APPROACH_CITY_CENTROID_FALLBACK)),
            &ctx,
        );
        assert!(report.flags().contains(&"fallback_geocode".to_string()));
    }

    #[test]
    fn test_missing_road_flag() {
        let cities = pyote_cities();
        let ctx = ValidationContext::new(&cities);
        let engine = ValidationEngine::with_default_rules();

        let report = engine.validate(&record(Some(0.65), Some(APPROACH_CITY_PRIMARY)), &ctx);
        assert!(report.flags().contains(&"missing_road".to_string()));

        let mut rec = record(Some(0.85), Some("corridor_midpoint"));
        rec.reasoning = Some("LAKEVIEW DR not found in road network. Corridor midpoint".into());
        let report = engine.validate(&rec, &ctx);
        assert!(report.flags().contains(&"missing_road".to_string()));
    }

    #[test]
    fn test_corridor_rules_disabled_without_geometry() {
        let cities = pyote_cities();
        let ctx = ValidationContext::new(&cities);
        let engine = ValidationEngine::with_default_rules();

        let report = engine.validate(&record(Some(0.85), Some("corridor_midpoint")), &ctx);
        assert!(!report.flags().contains(&"out_of_corridor".to_string()));
        assert!(!report.flags().contains(&"pipeline_mismatch".to_string()));
    }

    #[test]
    fn test_out_of_corridor_and_pipeline_mismatch() {
        let cities = pyote_cities();
        // Route and pipeline far to the east of the geocoded point
        let line = MultiLineString(vec![LineString::from(vec![(-102.0, 31.0), (-102.0, 32.0)])]);
        let corridor = RouteCorridorValidator::new(line.clone(), 500.0);
        let pipeline = PipelineProximityAnalyzer::new(line, 500.0);

        let mut ctx = ValidationContext::new(&cities);
        ctx.corridor = Some(&corridor);
        ctx.pipeline = Some(&pipeline);

        let engine = ValidationEngine::with_default_rules();
        let flags = engine
            .validate(&record(Some(0.85), Some("corridor_midpoint")), &ctx)
            .flags();
        assert!(flags.contains(&"out_of_corridor".to_string()));
        assert!(flags.contains(&"pipeline_mismatch".to_string()));
    }

    #[test]
    fn test_rule_subset_selection() {
        let engine = ValidationEngine::with_rules(&["low_confidence".to_string()]).unwrap();
        assert_eq!(engine.rule_names(), vec!["low_confidence"]);

        let cities = pyote_cities();
        let ctx = ValidationContext::new(&cities);
        let mut rec = record(Some(0.35), Some(APPROACH_CITY_CENTROID_FALLBACK));
        rec.ticket_type = Some("Emergency".into());
        let flags = engine.validate(&rec, &ctx).flags();
        assert_eq!(flags, vec!["low_confidence".to_string()]);
    }

    #[test]
    fn test_unknown_rule_is_configuration_error() {
        let err = ValidationEngine::with_rules(&["bogus_rule".to_string()]).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_flag_set_is_order_independent() {
        let cities = pyote_cities();
        let ctx = ValidationContext::new(&cities);

        let forward = ValidationEngine::with_rules(&[
            "low_confidence".to_string(),
            "fallback_geocode".to_string(),
        ])
        .unwrap();
        let reverse = ValidationEngine::with_rules(&[
            "fallback_geocode".to_string(),
            "low_confidence".to_string(),
        ])
        .unwrap();

        let rec = record(Some(0.35), Some(APPROACH_CITY_CENTROID_FALLBACK));
        let mut a = forward.validate(&rec, &ctx).flags();
        let mut b = reverse.validate(&rec, &ctx).flags();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }
}
