//! Pipeline-proximity enrichment stage.
//!
//! Annotates geocoded tickets with their measured distance to known
//! pipeline infrastructure. The +0.15 confidence boost for the boost
//! zone is one of the geocoder's own adjustments and is applied exactly
//! once, at geocode time; this stage only records the measurement —
//! useful for records whose geocode predates the pipeline geometry.
//! FAILED records pass through untouched.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::CacheStore;
use crate::corridor::PipelineProximityAnalyzer;
use crate::error::PipelineError;
use crate::models::{GeocodeRecord, QualityTier, Ticket};
use crate::reprocess::SkipRules;
use crate::stage::Stage;

pub const ENRICHMENT_STAGE_ID: &str = "enrichment";

pub struct EnrichmentStage {
    skip_rules: SkipRules,
    analyzer: Option<Arc<PipelineProximityAnalyzer>>,
}

impl EnrichmentStage {
    pub fn new(skip_rules: SkipRules, analyzer: Option<Arc<PipelineProximityAnalyzer>>) -> Self {
        Self {
            skip_rules,
            analyzer,
        }
    }
}

#[async_trait]
impl Stage for EnrichmentStage {
    fn stage_id(&self) -> &str {
        ENRICHMENT_STAGE_ID
    }

    fn skip_rules(&self) -> &SkipRules {
        &self.skip_rules
    }

    async fn process(
        &self,
        ticket: &Ticket,
        cache: &CacheStore,
    ) -> Result<GeocodeRecord, PipelineError> {
        let Some(cached) = cache.current(&ticket.ticket_number).await? else {
            return Err(PipelineError::StrategyExhausted(
                "no prior geocode record to enrich".into(),
            ));
        };

        let mut record = cached;
        record.id = 0;
        record.processing_time_ms = None;

        if record.quality_tier == QualityTier::Failed {
            return Ok(record);
        }

        if let (Some(analyzer), Some(lat), Some(lng)) =
            (&self.analyzer, record.latitude, record.longitude)
        {
            let analysis = analyzer.analyze(lat, lng);
            if let Some(distance_m) = analysis.distance_m {
                record.append_metadata(
                    "pipeline_proximity_m",
                    serde_json::json!((distance_m * 100.0).round() / 100.0),
                );
            }
            record.append_metadata(
                "near_pipeline",
                serde_json::json!(analysis.within_boost_zone),
            );
        }

        Ok(record)
    }
}
