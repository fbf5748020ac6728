//! Re-validation stage.
//!
//! Takes the current cached record written by an earlier geocoding stage
//! and re-runs the validation layer over it — most usefully the
//! route-corridor containment test, whose geometry may not have been
//! configured when the geocode was first produced. The stage records the
//! corridor measurements in metadata; flag merging and quality
//! re-assessment happen in the framework lifecycle.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::CacheStore;
use crate::corridor::RouteCorridorValidator;
use crate::error::PipelineError;
use crate::models::{GeocodeRecord, Ticket};
use crate::reprocess::SkipRules;
use crate::stage::Stage;

pub const VALIDATION_STAGE_ID: &str = "validation";

pub struct ValidationStage {
    skip_rules: SkipRules,
    corridor: Option<Arc<RouteCorridorValidator>>,
}

impl ValidationStage {
    pub fn new(skip_rules: SkipRules, corridor: Option<Arc<RouteCorridorValidator>>) -> Self {
        Self {
            skip_rules,
            corridor,
        }
    }
}

#[async_trait]
impl Stage for ValidationStage {
    fn stage_id(&self) -> &str {
        VALIDATION_STAGE_ID
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
                "no prior geocode record to validate".into(),
            ));
        };

        // The geocode itself is carried forward; `method` keeps naming the
        // stage that produced the coordinates.
        let mut record = cached;
        record.id = 0;
        record.processing_time_ms = None;

        if let (Some(corridor), Some(lat), Some(lng)) =
            (&self.corridor, record.latitude, record.longitude)
        {
            let check = corridor.check(lat, lng);
            record.append_metadata("within_corridor", serde_json::json!(check.within));
            if let Some(distance_m) = check.distance_m {
                record.append_metadata(
                    "corridor_distance_m",
                    serde_json::json!((distance_m * 100.0).round() / 100.0),
                );
            }
        }

        Ok(record)
    }
}
