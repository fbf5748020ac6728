//! Pipeline orchestration.
//!
//! Owns the ordered stage list and runs a batch stage-major: every ticket
//! passes through stage *k* before stage *k+1* sees any of its writes,
//! so later validation and enrichment stages observe the earlier
//! geocoding stage's records.
//!
//! Per-ticket failures are absorbed into FAILED records by the stage
//! framework. Framework-level errors (storage, configuration) abort the
//! batch when `fail_fast` is set; either way the results and review queue
//! are still emitted from whatever the cache holds.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::cache::CacheStore;
use crate::cities::CityIndex;
use crate::config::Config;
use crate::corridor::{PipelineProximityAnalyzer, RouteCorridorValidator};
use crate::error::PipelineError;
use crate::export;
use crate::models::{GeocodeRecord, QualityTier, ReviewPriority, Ticket};
use crate::stage::{Stage, StageHarness, StageStats};
use crate::stage_enrichment::EnrichmentStage;
use crate::stage_proximity::ProximityStage;
use crate::stage_validation::ValidationStage;
use crate::validation::ValidationEngine;

/// Per-stage counters in the summary object.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StageSummary {
    pub stage_name: String,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub degraded: u64,
    pub improved: u64,
    pub total_time_ms: u64,
    pub avg_time_ms: f64,
}

impl From<&StageStats> for StageSummary {
    fn from(stats: &StageStats) -> Self {
        Self {
            stage_name: stats.stage_name.clone(),
            processed: stats.processed,
            succeeded: stats.succeeded,
            failed: stats.failed,
            skipped: stats.skipped,
            degraded: stats.degraded,
            improved: stats.improved,
            total_time_ms: stats.total_time_ms,
            avg_time_ms: stats.avg_time_ms(),
        }
    }
}

/// Batch-level summary emitted at end of run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineSummary {
    pub pipeline_id: String,
    pub total_tickets: u64,
    pub rejected_tickets: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub total_skipped: u64,
    pub total_time_ms: u64,
    pub aborted: bool,
    pub error_counts: BTreeMap<String, u64>,
    pub tier_counts: BTreeMap<String, u64>,
    pub priority_counts: BTreeMap<String, u64>,
    pub stages: Vec<StageSummary>,
}

/// Everything a batch run produces: summary, one row per ticket, and the
/// prioritized review queue.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub summary: PipelineSummary,
    pub results: Vec<GeocodeRecord>,
    pub review_queue: Vec<GeocodeRecord>,
}

/// Orchestrates the ordered stages over a ticket batch.
pub struct Pipeline {
    harness: StageHarness,
    stages: Vec<Box<dyn Stage>>,
    fail_fast: bool,
    save_intermediate: bool,
    output_dir: std::path::PathBuf,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages.len())
            .field("fail_fast", &self.fail_fast)
            .field("save_intermediate", &self.save_intermediate)
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

impl Pipeline {
    /// Build the pipeline from configuration: open the cache, load shared
    /// geometry, and construct every enabled stage. Configuration
    /// problems surface here, before any tickets are processed.
    pub async fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let cache = CacheStore::open(config).await?;
        let cities = Arc::new(CityIndex::from_entries(&config.cities));

        let corridor = match config
            .stages
            .validation
            .as_ref()
            .filter(|v| v.enabled)
            .and_then(|v| v.route.as_ref())
        {
            Some(route) => Some(Arc::new(RouteCorridorValidator::load(
                &route.geometry_path,
                route.buffer_m,
            )?)),
            None => None,
        };

        let pipeline_geometry = config
            .stages
            .enrichment
            .as_ref()
            .filter(|e| e.enabled)
            .and_then(|e| e.pipeline.as_ref());
        let analyzer = match pipeline_geometry {
            Some(pipeline) => Some(Arc::new(PipelineProximityAnalyzer::load(
                &pipeline.geometry_path,
                pipeline.boost_radius_m,
            )?)),
            None => None,
        };

        let engine = match config.stages.validation.as_ref() {
            Some(validation) => ValidationEngine::with_rules(&validation.validation_rules)?,
            None => ValidationEngine::with_default_rules(),
        };

        let mut harness = StageHarness::new(cache, engine, cities.clone())
            .with_corridor(corridor.clone())
            .with_pipeline_proximity(analyzer.clone());
        if let Some(proximity) = &config.stages.proximity {
            harness = harness.with_city_distance_km(proximity.max_distance_km);
        }
        if let Some(pipeline) = pipeline_geometry {
            harness = harness.with_pipeline_mismatch_m(pipeline.mismatch_threshold_m);
        }

        let mut stages: Vec<Box<dyn Stage>> = Vec::new();
        if let Some(proximity) = config.stages.proximity.as_ref().filter(|s| s.enabled) {
            stages.push(Box::new(ProximityStage::from_config(
                proximity,
                cities.clone(),
                analyzer.clone(),
            )?));
        }
        if let Some(validation) = config.stages.validation.as_ref().filter(|s| s.enabled) {
            stages.push(Box::new(ValidationStage::new(
                validation.skip_rules.clone(),
                corridor,
            )));
        }
        if let Some(enrichment) = config.stages.enrichment.as_ref().filter(|s| s.enabled) {
            stages.push(Box::new(EnrichmentStage::new(
                enrichment.skip_rules.clone(),
                analyzer,
            )));
        }

        Ok(Self {
            harness,
            stages,
            fail_fast: config.fail_fast,
            save_intermediate: config.save_intermediate,
            output_dir: config.output_dir.clone(),
        })
    }

    /// Build a pipeline directly from parts (used by tests and embedders).
    pub fn new(harness: StageHarness, stages: Vec<Box<dyn Stage>>, fail_fast: bool) -> Self {
        Self {
            harness,
            stages,
            fail_fast,
            save_intermediate: false,
            output_dir: std::path::PathBuf::from("./outputs"),
        }
    }

    pub fn cache(&self) -> &CacheStore {
        self.harness.cache()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Run every stage over the batch and emit results, review queue, and
    /// summary.
    pub async fn run(&self, tickets: &[Ticket]) -> Result<PipelineReport, PipelineError> {
        let pipeline_id = format!("pipeline_{}", Utc::now().format("%Y%m%d_%H%M%S"));
        let started = Instant::now();

        // Reject malformed tickets before any stage runs
        let mut accepted: Vec<&Ticket> = Vec::new();
        let mut rejected = 0u64;
        for ticket in tickets {
            if ticket.ticket_number.trim().is_empty() {
                tracing::warn!("rejecting ticket with empty ticket_number");
                rejected += 1;
            } else {
                accepted.push(ticket);
            }
        }

        // Unique tickets, preserving batch order
        let mut seen = HashSet::new();
        let unique: Vec<&Ticket> = accepted
            .into_iter()
            .filter(|t| seen.insert(t.ticket_number.clone()))
            .collect();

        tracing::info!(
            pipeline_id = %pipeline_id,
            tickets = unique.len(),
            rejected,
            stages = self.stages.len(),
            "starting pipeline run"
        );

        if let Err(err) = self.record_run_start(&pipeline_id, unique.len() as i64).await {
            tracing::warn!(%err, "could not record pipeline run start; continuing");
        }

        let mut error_counts: BTreeMap<String, u64> = BTreeMap::new();
        if rejected > 0 {
            error_counts.insert("input".into(), rejected);
        }

        let mut stage_stats: Vec<StageStats> = Vec::new();
        let mut aborted = false;

        'stages: for stage in &self.stages {
            let mut stats = StageStats::new(stage.stage_id());

            for ticket in &unique {
                match self.harness.run_ticket(stage.as_ref(), ticket, &mut stats).await {
                    Ok(_) => {}
                    Err(err) => {
                        *error_counts.entry(error_category(&err)).or_insert(0) += 1;
                        tracing::error!(
                            ticket = %ticket.ticket_number,
                            stage = stage.stage_id(),
                            %err,
                            "framework error"
                        );
                        if self.fail_fast {
                            aborted = true;
                            stage_stats.push(stats);
                            break 'stages;
                        }
                    }
                }
            }

            tracing::info!(
                stage = stage.stage_id(),
                processed = stats.processed,
                succeeded = stats.succeeded,
                failed = stats.failed,
                skipped = stats.skipped,
                "stage complete"
            );

            if self.save_intermediate {
                let path = self
                    .output_dir
                    .join(format!("intermediate_{}.csv", stage.stage_id()));
                let records = self.final_records(&unique).await?;
                if let Err(err) = export::write_results_csv(&path, &records) {
                    tracing::warn!(%err, "could not write intermediate snapshot");
                }
            }

            stage_stats.push(stats);
        }

        let results = self.final_records(&unique).await?;
        let review_queue = build_review_queue(&results);

        let mut tier_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut priority_counts: BTreeMap<String, u64> = BTreeMap::new();
        for record in &results {
            *tier_counts
                .entry(record.quality_tier.as_str().to_string())
                .or_insert(0) += 1;
            *priority_counts
                .entry(record.review_priority.as_str().to_string())
                .or_insert(0) += 1;
        }

        let summary = PipelineSummary {
            pipeline_id: pipeline_id.clone(),
            total_tickets: unique.len() as u64,
            rejected_tickets: rejected,
            total_succeeded: results
                .iter()
                .filter(|r| r.quality_tier != QualityTier::Failed)
                .count() as u64,
            total_failed: results
                .iter()
                .filter(|r| r.quality_tier == QualityTier::Failed)
                .count() as u64,
            total_skipped: stage_stats.iter().map(|s| s.skipped).sum(),
            total_time_ms: started.elapsed().as_millis() as u64,
            aborted,
            error_counts,
            tier_counts,
            priority_counts,
            stages: stage_stats.iter().map(StageSummary::from).collect(),
        };

        let status = if aborted { "aborted" } else { "completed" };
        if let Err(err) = self.record_run_end(&pipeline_id, status, &summary).await {
            tracing::warn!(%err, "could not finalize pipeline run record");
        }

        Ok(PipelineReport {
            summary,
            results,
            review_queue,
        })
    }

    /// Current cached record for each ticket, in batch order.
    async fn final_records(&self, tickets: &[&Ticket]) -> Result<Vec<GeocodeRecord>, PipelineError> {
        let mut records = Vec::new();
        for ticket in tickets {
            if let Some(record) = self.harness.cache().current(&ticket.ticket_number).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn record_run_start(
        &self,
        pipeline_id: &str,
        ticket_count: i64,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO pipeline_runs (pipeline_id, started_at, status, ticket_count) \
             VALUES (?, ?, 'running', ?)",
        )
        .bind(pipeline_id)
        .bind(Utc::now().to_rfc3339())
        .bind(ticket_count)
        .execute(self.harness.cache().pool())
        .await?;
        Ok(())
    }

    async fn record_run_end(
        &self,
        pipeline_id: &str,
        status: &str,
        summary: &PipelineSummary,
    ) -> Result<(), PipelineError> {
        let summary_json =
            serde_json::to_string(summary).map_err(|e| PipelineError::Storage(e.to_string()))?;
        sqlx::query(
            "UPDATE pipeline_runs SET finished_at = ?, status = ?, summary_json = ? \
             WHERE pipeline_id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(status)
        .bind(summary_json)
        .bind(pipeline_id)
        .execute(self.harness.cache().pool())
        .await?;
        Ok(())
    }
}

fn error_category(err: &PipelineError) -> String {
    match err {
        PipelineError::Input(_) => "input",
        PipelineError::SpatialLookupMiss(_) => "spatial_lookup_miss",
        PipelineError::StrategyExhausted(_) => "strategy_exhausted",
        PipelineError::Locked { .. } => "locked",
        PipelineError::Storage(_) => "storage",
        PipelineError::Configuration(_) => "configuration",
    }
    .to_string()
}

/// Records needing review, sorted by descending priority then ascending
/// confidence (the least confident of the most urgent first).
pub fn build_review_queue(results: &[GeocodeRecord]) -> Vec<GeocodeRecord> {
    let mut queue: Vec<GeocodeRecord> = results
        .iter()
        .filter(|r| r.review_priority != ReviewPriority::None)
        .cloned()
        .collect();
    queue.sort_by(|a, b| {
        b.review_priority
            .rank()
            .cmp(&a.review_priority.rank())
            .then_with(|| {
                a.confidence
                    .unwrap_or(0.0)
                    .total_cmp(&b.confidence.unwrap_or(0.0))
            })
    });
    queue
}
