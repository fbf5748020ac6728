//! Stage framework: the `Stage` trait and the per-ticket lifecycle.
//!
//! Stages vary only by their `process` implementation; everything around
//! it — cache consultation, skip decision, validation, quality
//! assessment, versioned write, timing — is the framework's job:
//!
//! 1. Read the current cached record.
//! 2. Ask the skip decider; skipped tickets never reach `process`.
//! 3. Call `process`; a raised error becomes a FAILED record.
//! 4. Run the validation engine and merge flags into the record.
//! 5. Assign quality tier and review priority; count regressions.
//! 6. Write through the cache. A lock conflict is recorded as a skip.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;

use crate::cache::CacheStore;
use crate::cities::CityIndex;
use crate::corridor::{PipelineProximityAnalyzer, RouteCorridorValidator};
use crate::error::PipelineError;
use crate::models::{GeocodeRecord, Ticket};
use crate::quality::QualityAssessor;
use crate::reprocess::{self, SkipRules};
use crate::validation::{ValidationContext, ValidationEngine};

/// A pipeline stage: a stable id, skip rules, and a `process` step that
/// turns a ticket into a geocode record.
///
/// `process` reports per-ticket failures by returning an error; the
/// framework absorbs it into a FAILED record. Only storage and
/// configuration errors propagate further.
#[async_trait]
pub trait Stage: Send + Sync {
    fn stage_id(&self) -> &str;

    fn skip_rules(&self) -> &SkipRules;

    async fn process(
        &self,
        ticket: &Ticket,
        cache: &CacheStore,
    ) -> Result<GeocodeRecord, PipelineError>;
}

/// Per-stage counters for one batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageStats {
    pub stage_name: String,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Writes whose quality tier regressed versus the cached record.
    pub degraded: u64,
    /// Writes whose quality tier improved versus the cached record.
    pub improved: u64,
    pub total_time_ms: u64,
}

impl StageStats {
    pub fn new(stage_name: &str) -> Self {
        Self {
            stage_name: stage_name.to_string(),
            ..Self::default()
        }
    }

    pub fn avg_time_ms(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.total_time_ms as f64 / self.processed as f64
        }
    }
}

/// What happened to one ticket in one stage.
#[derive(Debug, Clone)]
pub enum TicketOutcome {
    Processed(GeocodeRecord),
    Skipped { reason: String },
}

/// Framework state shared by every stage: the cache, the assessor, the
/// validation engine, and the read-only spatial context.
pub struct StageHarness {
    cache: CacheStore,
    assessor: QualityAssessor,
    engine: ValidationEngine,
    cities: Arc<CityIndex>,
    corridor: Option<Arc<RouteCorridorValidator>>,
    pipeline_proximity: Option<Arc<PipelineProximityAnalyzer>>,
    city_distance_km: f64,
    pipeline_mismatch_m: f64,
}

impl StageHarness {
    pub fn new(cache: CacheStore, engine: ValidationEngine, cities: Arc<CityIndex>) -> Self {
        Self {
            cache,
            assessor: QualityAssessor::new(),
            engine,
            cities,
            corridor: None,
            pipeline_proximity: None,
            city_distance_km: 50.0,
            pipeline_mismatch_m: 500.0,
        }
    }

    pub fn with_corridor(mut self, corridor: Option<Arc<RouteCorridorValidator>>) -> Self {
        self.corridor = corridor;
        self
    }

    pub fn with_pipeline_proximity(
        mut self,
        analyzer: Option<Arc<PipelineProximityAnalyzer>>,
    ) -> Self {
        self.pipeline_proximity = analyzer;
        self
    }

    pub fn with_city_distance_km(mut self, km: f64) -> Self {
        self.city_distance_km = km;
        self
    }

    pub fn with_pipeline_mismatch_m(mut self, meters: f64) -> Self {
        self.pipeline_mismatch_m = meters;
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Run one ticket through one stage's lifecycle.
    pub async fn run_ticket(
        &self,
        stage: &dyn Stage,
        ticket: &Ticket,
        stats: &mut StageStats,
    ) -> Result<TicketOutcome, PipelineError> {
        let stage_id = stage.stage_id();
        let cached = self.cache.current(&ticket.ticket_number).await?;

        let decision = reprocess::decide(cached.as_ref(), stage_id, stage.skip_rules());
        if decision.skip {
            tracing::debug!(
                ticket = %ticket.ticket_number,
                stage = stage_id,
                reason = %decision.reason,
                "skipping ticket"
            );
            stats.skipped += 1;
            return Ok(TicketOutcome::Skipped {
                reason: decision.reason,
            });
        }

        let started = Instant::now();
        let mut record = match stage.process(ticket, &self.cache).await {
            Ok(record) => record,
            Err(
                err @ (PipelineError::Storage(_) | PipelineError::Configuration(_)),
            ) => return Err(err),
            Err(err) => {
                tracing::debug!(
                    ticket = %ticket.ticket_number,
                    stage = stage_id,
                    %err,
                    "process failed; writing FAILED record"
                );
                GeocodeRecord::failed(ticket, stage_id, &err.to_string())
            }
        };

        // Validate and merge flags
        let ctx = ValidationContext {
            cities: &self.cities,
            corridor: self.corridor.as_deref(),
            pipeline: self.pipeline_proximity.as_deref(),
            city_distance_km: self.city_distance_km,
            pipeline_mismatch_m: self.pipeline_mismatch_m,
        };
        for flag in self.engine.validate(&record, &ctx).flags() {
            if !record.validation_flags.contains(&flag) {
                record.validation_flags.push(flag);
            }
        }

        // Assess quality
        record.quality_tier = self.assessor.tier(
            record.confidence,
            record.has_coordinates(),
            &record.method,
            record.approach.as_deref(),
        );
        record.review_priority = self.assessor.review_priority(
            record.quality_tier,
            record.has_coordinates(),
            self.assessor.effective_confidence(
                record.confidence,
                &record.method,
                record.approach.as_deref(),
            ),
            record.approach.as_deref(),
            record.ticket_type.as_deref(),
            &record.validation_flags,
        );

        let elapsed_ms = started.elapsed().as_millis() as i64;
        record.processing_time_ms = Some(elapsed_ms);

        // A quality regression is still written, but counted
        if let Some(prior) = &cached {
            let prior_rank = prior.quality_tier.rank();
            let new_rank = record.quality_tier.rank();
            if new_rank < prior_rank {
                stats.degraded += 1;
            } else if new_rank > prior_rank {
                stats.improved += 1;
            }
        }

        let stored = match self.cache.put(&record, stage_id).await {
            Ok(stored) => stored,
            Err(PipelineError::Locked { reason, .. }) => {
                stats.skipped += 1;
                return Ok(TicketOutcome::Skipped {
                    reason: format!("locked ({reason})"),
                });
            }
            Err(err) => return Err(err),
        };

        stats.processed += 1;
        stats.total_time_ms += elapsed_ms as u64;
        if stored.quality_tier == crate::models::QualityTier::Failed {
            stats.failed += 1;
        } else {
            stats.succeeded += 1;
        }

        Ok(TicketOutcome::Processed(stored))
    }
}
