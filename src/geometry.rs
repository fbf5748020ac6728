//! Shared geodesic helpers over `geo` primitives.
//!
//! Road, route, and pipeline geometry all arrive as WGS84 line work
//! (lng/lat vertex order). Distances reported to callers are haversine
//! meters; point projection onto line work happens in degree space, which
//! is accurate enough at county scale.

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Closest, ClosestPoint, HaversineDistance, LineString, MultiLineString, Point};

use crate::error::PipelineError;

/// Haversine distance in meters.
pub fn haversine_m(a: Point<f64>, b: Point<f64>) -> f64 {
    a.haversine_distance(&b)
}

/// Midpoint of two points.
pub fn midpoint(a: Point<f64>, b: Point<f64>) -> Point<f64> {
    Point::new((a.x() + b.x()) / 2.0, (a.y() + b.y()) / 2.0)
}

/// Closest point on a line-work collection to `p`, or `None` for empty
/// geometry.
pub fn closest_point_on(geom: &MultiLineString<f64>, p: Point<f64>) -> Option<Point<f64>> {
    let mut best: Option<(Point<f64>, f64)> = None;
    for line in &geom.0 {
        let candidate = match line.closest_point(&p) {
            Closest::Intersection(q) | Closest::SinglePoint(q) => q,
            Closest::Indeterminate => continue,
        };
        let d = haversine_m(p, candidate);
        if best.map_or(true, |(_, bd)| d < bd) {
            best = Some((candidate, d));
        }
    }
    best.map(|(q, _)| q)
}

/// Haversine distance in meters from `p` to the nearest point of the
/// line work, or `None` for empty geometry.
pub fn distance_to_m(geom: &MultiLineString<f64>, p: Point<f64>) -> Option<f64> {
    closest_point_on(geom, p).map(|q| haversine_m(p, q))
}

/// All crossing points between two line-work collections.
///
/// Points closer than ~1 m to an already collected crossing are dropped so
/// that shared vertices between consecutive segments do not produce
/// duplicates.
pub fn intersections(a: &MultiLineString<f64>, b: &MultiLineString<f64>) -> Vec<Point<f64>> {
    let mut points: Vec<Point<f64>> = Vec::new();

    for line_a in a.0.iter().flat_map(|ls| ls.lines()) {
        for line_b in b.0.iter().flat_map(|ls| ls.lines()) {
            if let Some(LineIntersection::SinglePoint { intersection, .. }) =
                line_intersection(line_a, line_b)
            {
                let candidate = Point::from(intersection);
                if points.iter().all(|p| haversine_m(*p, candidate) > 1.0) {
                    points.push(candidate);
                }
            }
        }
    }

    points
}

/// Closest pair of points between two non-crossing line-work collections:
/// `(point_on_a, point_on_b, distance_m)`.
///
/// Each vertex of one collection is projected onto the other and the
/// nearest pairing wins. Road data is vertex-dense, so the projection of
/// vertices bounds the true minimum closely.
pub fn closest_point_pair(
    a: &MultiLineString<f64>,
    b: &MultiLineString<f64>,
) -> Option<(Point<f64>, Point<f64>, f64)> {
    let mut best: Option<(Point<f64>, Point<f64>, f64)> = None;

    for vertex in b.0.iter().flat_map(|ls| ls.points()) {
        if let Some(on_a) = closest_point_on(a, vertex) {
            let d = haversine_m(on_a, vertex);
            if best.as_ref().map_or(true, |(_, _, bd)| d < *bd) {
                best = Some((on_a, vertex, d));
            }
        }
    }
    for vertex in a.0.iter().flat_map(|ls| ls.points()) {
        if let Some(on_b) = closest_point_on(b, vertex) {
            let d = haversine_m(vertex, on_b);
            if best.as_ref().map_or(true, |(_, _, bd)| d < *bd) {
                best = Some((vertex, on_b, d));
            }
        }
    }

    best
}

/// Load a GeoJSON file's `LineString`/`MultiLineString` features into a
/// single line-work collection. Coordinates are (lng, lat) per GeoJSON.
pub fn load_linework(path: &std::path::Path) -> Result<MultiLineString<f64>, PipelineError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::Configuration(format!("failed to read {}: {e}", path.display()))
    })?;
    let doc: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        PipelineError::Configuration(format!("invalid GeoJSON in {}: {e}", path.display()))
    })?;

    let mut lines = Vec::new();
    let features = doc["features"].as_array().cloned().unwrap_or_default();
    for feature in &features {
        collect_linework(&feature["geometry"], &mut lines);
    }
    // A bare geometry document is also accepted
    if features.is_empty() {
        collect_linework(&doc, &mut lines);
    }

    Ok(MultiLineString(lines))
}

/// Pull every line string out of a GeoJSON geometry object.
pub(crate) fn collect_linework(geometry: &serde_json::Value, out: &mut Vec<LineString<f64>>) {
    match geometry["type"].as_str() {
        Some("LineString") => {
            if let Some(line) = parse_line(&geometry["coordinates"]) {
                out.push(line);
            }
        }
        Some("MultiLineString") => {
            if let Some(parts) = geometry["coordinates"].as_array() {
                for part in parts {
                    if let Some(line) = parse_line(part) {
                        out.push(line);
                    }
                }
            }
        }
        _ => {}
    }
}

fn parse_line(coordinates: &serde_json::Value) -> Option<LineString<f64>> {
    let pairs = coordinates.as_array()?;
    let mut vertices = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let lng = pair.get(0)?.as_f64()?;
        let lat = pair.get(1)?.as_f64()?;
        vertices.push((lng, lat));
    }
    if vertices.len() < 2 {
        return None;
    }
    Some(LineString::from(vertices))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertical(lng: f64, lat0: f64, lat1: f64) -> LineString<f64> {
        LineString::from(vec![(lng, lat0), (lng, lat1)])
    }

    fn horizontal(lat: f64, lng0: f64, lng1: f64) -> LineString<f64> {
        LineString::from(vec![(lng0, lat), (lng1, lat)])
    }

    #[test]
    fn test_crossing_lines_intersect_once() {
        let a = MultiLineString(vec![vertical(-102.54, 32.30, 32.34)]);
        let b = MultiLineString(vec![horizontal(32.32, -102.56, -102.52)]);

        let points = intersections(&a, &b);
        assert_eq!(points.len(), 1);
        assert!((points[0].x() - (-102.54)).abs() < 1e-9);
        assert!((points[0].y() - 32.32).abs() < 1e-9);
    }

    #[test]
    fn test_parallel_lines_do_not_intersect() {
        let a = MultiLineString(vec![vertical(-102.54, 32.30, 32.34)]);
        let b = MultiLineString(vec![vertical(-102.55, 32.30, 32.34)]);
        assert!(intersections(&a, &b).is_empty());
    }

    #[test]
    fn test_closest_point_pair_on_parallel_lines() {
        let a = MultiLineString(vec![vertical(-102.54, 32.30, 32.34)]);
        let b = MultiLineString(vec![vertical(-102.55, 32.30, 32.34)]);

        let (on_a, on_b, d) = closest_point_pair(&a, &b).unwrap();
        assert!((on_a.x() - (-102.54)).abs() < 1e-9);
        assert!((on_b.x() - (-102.55)).abs() < 1e-9);
        // 0.01° of longitude at ~32.3° latitude is roughly 940 m
        assert!((800.0..1100.0).contains(&d), "distance {d}");
    }

    #[test]
    fn test_distance_to_linework() {
        let route = MultiLineString(vec![vertical(-103.0, 31.0, 32.0)]);
        let on_route = Point::new(-103.0, 31.5);
        assert!(distance_to_m(&route, on_route).unwrap() < 1.0);

        let empty = MultiLineString::<f64>(vec![]);
        assert!(distance_to_m(&empty, on_route).is_none());
    }

    #[test]
    fn test_midpoint() {
        let m = midpoint(Point::new(0.0, 0.0), Point::new(2.0, 4.0));
        assert_eq!((m.x(), m.y()), (1.0, 2.0));
    }
}
