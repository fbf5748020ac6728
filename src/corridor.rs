//! Route-corridor and pipeline-proximity enrichers.
//!
//! Two independent services over the same spatial idea — distance from a
//! point to a 1-D geometry collection — configured separately because the
//! geometries differ: the full planned route versus known pipeline
//! infrastructure. Both are constructed once per batch and shared
//! read-only.

use std::path::Path;

use geo::{MultiLineString, Point};

use crate::error::PipelineError;
use crate::geometry;

/// Default corridor buffer and boost radius, in meters.
pub const DEFAULT_BUFFER_M: f64 = 500.0;

/// Confidence boost granted inside the pipeline boost zone.
pub const PIPELINE_BOOST: f64 = 0.15;

/// Result of a corridor containment check.
#[derive(Debug, Clone, Copy)]
pub struct CorridorCheck {
    /// True iff the point lies within the buffered corridor.
    pub within: bool,
    /// Perpendicular distance to the route centerline, meters. `None`
    /// when the route geometry is empty.
    pub distance_m: Option<f64>,
}

/// Validates geocoded locations against the planned route corridor.
pub struct RouteCorridorValidator {
    route: MultiLineString<f64>,
    buffer_m: f64,
}

impl RouteCorridorValidator {
    pub fn new(route: MultiLineString<f64>, buffer_m: f64) -> Self {
        Self { route, buffer_m }
    }

    /// Load route line work from a GeoJSON file.
    pub fn load(path: &Path, buffer_m: f64) -> Result<Self, PipelineError> {
        let route = geometry::load_linework(path)?;
        if route.0.is_empty() {
            tracing::warn!(path = %path.display(), "route geometry is empty");
        }
        Ok(Self::new(route, buffer_m))
    }

    pub fn buffer_m(&self) -> f64 {
        self.buffer_m
    }

    /// Distance from the point to the route centerline, and whether it
    /// falls inside the buffered corridor.
    pub fn check(&self, lat: f64, lng: f64) -> CorridorCheck {
        let distance_m = geometry::distance_to_m(&self.route, Point::new(lng, lat));
        CorridorCheck {
            within: distance_m.is_some_and(|d| d <= self.buffer_m),
            distance_m,
        }
    }
}

/// Result of a pipeline proximity analysis.
#[derive(Debug, Clone, Copy)]
pub struct ProximityAnalysis {
    /// Distance to the nearest pipeline, meters. `None` when no pipeline
    /// geometry is loaded.
    pub distance_m: Option<f64>,
    pub within_boost_zone: bool,
    /// [`PIPELINE_BOOST`] inside the boost zone, otherwise 0.
    pub confidence_boost: f64,
}

/// Analyzes proximity to known pipeline infrastructure, granting a
/// confidence boost for tickets near a pipeline.
#[derive(Debug)]
pub struct PipelineProximityAnalyzer {
    pipelines: MultiLineString<f64>,
    boost_radius_m: f64,
}

impl PipelineProximityAnalyzer {
    pub fn new(pipelines: MultiLineString<f64>, boost_radius_m: f64) -> Self {
        Self {
            pipelines,
            boost_radius_m,
        }
    }

    /// Load pipeline line work from a GeoJSON file.
    pub fn load(path: &Path, boost_radius_m: f64) -> Result<Self, PipelineError> {
        let pipelines = geometry::load_linework(path)?;
        if pipelines.0.is_empty() {
            tracing::warn!(path = %path.display(), "pipeline geometry is empty");
        }
        Ok(Self::new(pipelines, boost_radius_m))
    }

    pub fn analyze(&self, lat: f64, lng: f64) -> ProximityAnalysis {
        let distance_m = geometry::distance_to_m(&self.pipelines, Point::new(lng, lat));
        let within_boost_zone = distance_m.is_some_and(|d| d <= self.boost_radius_m);
        ProximityAnalysis {
            distance_m,
            within_boost_zone,
            confidence_boost: if within_boost_zone { PIPELINE_BOOST } else { 0.0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::LineString;

    fn north_south_line(lng: f64) -> MultiLineString<f64> {
        MultiLineString(vec![LineString::from(vec![(lng, 31.0), (lng, 32.0)])])
    }

    /// Degrees of longitude spanning `meters` east-west at `lat`.
    fn lng_offset(lat_deg: f64, meters: f64) -> f64 {
        meters / (111_195.0 * lat_deg.to_radians().cos())
    }

    #[test]
    fn test_corridor_within_buffer() {
        let validator = RouteCorridorValidator::new(north_south_line(-103.0), 500.0);

        let near = validator.check(31.5, -103.0 + lng_offset(31.5, 100.0));
        assert!(near.within);
        let d = near.distance_m.unwrap();
        assert!((80.0..120.0).contains(&d), "distance {d}");

        let far = validator.check(31.5, -103.0 + lng_offset(31.5, 2_000.0));
        assert!(!far.within);
        assert!(far.distance_m.unwrap() > 1_500.0);
    }

    #[test]
    fn test_corridor_empty_geometry() {
        let validator = RouteCorridorValidator::new(MultiLineString(vec![]), 500.0);
        let check = validator.check(31.5, -103.0);
        assert!(!check.within);
        assert!(check.distance_m.is_none());
    }

    #[test]
    fn test_pipeline_boost_inside_zone() {
        let analyzer = PipelineProximityAnalyzer::new(north_south_line(-103.0), 500.0);

        let near = analyzer.analyze(31.5, -103.0 + lng_offset(31.5, 200.0));
        assert!(near.within_boost_zone);
        assert_eq!(near.confidence_boost, PIPELINE_BOOST);

        let far = analyzer.analyze(31.5, -103.0 + lng_offset(31.5, 900.0));
        assert!(!far.within_boost_zone);
        assert_eq!(far.confidence_boost, 0.0);
    }

    #[test]
    fn test_pipeline_boundary_is_inclusive() {
        let analyzer = PipelineProximityAnalyzer::new(north_south_line(-103.0), 500.0);
        // Just inside the radius: still boosted
        let check = analyzer.analyze(31.5, -103.0 + lng_offset(31.5, 499.0));
        assert!(check.within_boost_zone);
    }
}
