//! Proximity geocoding stage.
//!
//! Wraps the [`ProximityGeocoder`] in the stage lifecycle. Construction
//! loads the road network from configuration; a missing network file is a
//! configuration error caught before any tickets are processed.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::CacheStore;
use crate::cities::CityIndex;
use crate::config::ProximityStageConfig;
use crate::corridor::PipelineProximityAnalyzer;
use crate::error::PipelineError;
use crate::geocoder::ProximityGeocoder;
use crate::models::{GeocodeRecord, Ticket};
use crate::reprocess::SkipRules;
use crate::roads::RoadNetwork;
use crate::stage::Stage;

pub const PROXIMITY_STAGE_ID: &str = "proximity";

#[derive(Debug)]
pub struct ProximityStage {
    skip_rules: SkipRules,
    geocoder: ProximityGeocoder,
}

impl ProximityStage {
    pub fn new(geocoder: ProximityGeocoder, skip_rules: SkipRules) -> Self {
        Self {
            skip_rules,
            geocoder,
        }
    }

    /// Build the stage from configuration, loading the road network.
    pub fn from_config(
        config: &ProximityStageConfig,
        cities: Arc<CityIndex>,
        pipeline_proximity: Option<Arc<PipelineProximityAnalyzer>>,
    ) -> Result<Self, PipelineError> {
        let network = Arc::new(RoadNetwork::load(&config.road_network_path)?);
        if network.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "road network {} contains no usable segments",
                config.road_network_path.display()
            )));
        }
        Ok(Self::new(
            ProximityGeocoder::new(network, cities, pipeline_proximity),
            config.skip_rules.clone(),
        ))
    }
}

#[async_trait]
impl Stage for ProximityStage {
    fn stage_id(&self) -> &str {
        PROXIMITY_STAGE_ID
    }

    fn skip_rules(&self) -> &SkipRules {
        &self.skip_rules
    }

    async fn process(
        &self,
        ticket: &Ticket,
        _cache: &CacheStore,
    ) -> Result<GeocodeRecord, PipelineError> {
        let outcome = self.geocoder.geocode(ticket)?;

        let mut record = GeocodeRecord::from_ticket(ticket, PROXIMITY_STAGE_ID);
        record.latitude = Some(outcome.latitude);
        record.longitude = Some(outcome.longitude);
        record.confidence = Some(outcome.confidence);
        record.approach = Some(outcome.approach.to_string());
        record.reasoning = Some(outcome.reasoning);
        record.metadata = outcome.metadata;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::roads::{normalize_road_name, RoadClass, RoadSegment};
    use geo::LineString;
    use tempfile::TempDir;

    async fn test_cache() -> (TempDir, CacheStore) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect(&tmp.path().join("cache.db")).await.unwrap();
        let cache = CacheStore::from_pool(pool).await.unwrap();
        (tmp, cache)
    }

    fn segment(name: &str, coords: Vec<(f64, f64)>) -> RoadSegment {
        let canonical = normalize_road_name(name);
        RoadSegment {
            class: RoadClass::from_name(&canonical),
            name: canonical,
            geometry: LineString::from(coords),
        }
    }

    fn crossing_stage() -> ProximityStage {
        let network = Arc::new(RoadNetwork::from_segments(vec![
            segment("US 385", vec![(-102.5457, 32.28), (-102.5457, 32.36)]),
            segment("FM 1788", vec![(-102.5757, 32.3185), (-102.5157, 32.3185)]),
        ]));
        let mut cities = CityIndex::new();
        cities.insert("Andrews", "Andrews", 32.3185, -102.5457);
        ProximityStage::new(
            ProximityGeocoder::new(network, Arc::new(cities), None),
            SkipRules::default(),
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

    #[tokio::test]
    async fn test_process_maps_outcome_onto_record() {
        let (_tmp, cache) = test_cache().await;
        let stage = crossing_stage();

        let record = stage
            .process(&ticket("US 385", "FM 1788"), &cache)
            .await
            .unwrap();

        assert_eq!(record.method, PROXIMITY_STAGE_ID);
        assert_eq!(record.approach.as_deref(), Some("corridor_midpoint"));
        assert_eq!(record.confidence, Some(0.85));
        assert!((record.latitude.unwrap() - 32.3185).abs() < 1e-6);
        assert!((record.longitude.unwrap() - (-102.5457)).abs() < 1e-6);
        assert!(record.reasoning.as_deref().unwrap().contains("Corridor midpoint"));
        assert!(record.metadata.contains_key("matched_street"));
        assert_eq!(record.geocode_key, ticket("US 385", "FM 1788").geocode_key());
    }

    #[tokio::test]
    async fn test_process_propagates_strategy_exhaustion() {
        let (_tmp, cache) = test_cache().await;
        let stage = crossing_stage();

        // Unknown roads and an unknown city: every strategy fails
        let mut t = ticket("NOWHERE RD", "ALSO NOWHERE");
        t.city = Some("Wink".into());
        t.county = Some("Winkler".into());

        let err = stage.process(&t, &cache).await.unwrap_err();
        assert!(matches!(err, PipelineError::StrategyExhausted(_)));
    }

    #[test]
    fn test_from_config_missing_network_is_configuration_error() {
        let config = ProximityStageConfig {
            enabled: true,
            skip_rules: SkipRules::default(),
            road_network_path: "/nonexistent/roads.geojson".into(),
            max_distance_km: 50.0,
        };

        let err = ProximityStage::from_config(&config, Arc::new(CityIndex::new()), None)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_from_config_empty_network_is_configuration_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.geojson");
        std::fs::write(&path, r#"{"type": "FeatureCollection", "features": []}"#).unwrap();

        let config = ProximityStageConfig {
            enabled: true,
            skip_rules: SkipRules::default(),
            road_network_path: path,
            max_distance_km: 50.0,
        };

        let err = ProximityStage::from_config(&config, Arc::new(CityIndex::new()), None)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
