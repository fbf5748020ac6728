//! Versioned geocode cache store.
//!
//! The cache is append-only: a ticket's geocode is never updated in place.
//! [`CacheStore::put`] writes a new version, flips the prior current
//! record's `is_current` flag, and links the two through
//! `supersedes_cache_id` — all inside one transaction, so the
//! one-current-record-per-ticket invariant holds after any completed write.
//!
//! Locked records are the exception to automated supersession: only the
//! `human_review` stage may replace them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::error::PipelineError;
use crate::migrate;
use crate::models::{geocode_key, CacheQuery, GeocodeRecord, QualityTier, ReviewPriority};

/// Stage id reserved for human review actions. Only this stage may
/// supersede a locked record.
pub const HUMAN_REVIEW_STAGE: &str = "human_review";

/// Aggregate cache statistics over current records.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatistics {
    pub total_records: i64,
    pub total_versions: i64,
    pub locked_count: i64,
    pub tier_counts: BTreeMap<String, i64>,
    pub priority_counts: BTreeMap<String, i64>,
    pub method_counts: BTreeMap<String, i64>,
    pub avg_confidence_by_tier: BTreeMap<String, f64>,
}

/// Handle to the versioned geocode cache.
///
/// Cloning is cheap (the underlying pool is shared). All writes serialize
/// current-pointer updates through SQLite transactions.
#[derive(Clone)]
pub struct CacheStore {
    pool: SqlitePool,
}

impl CacheStore {
    /// Open the cache at the configured path, running migrations so a
    /// fresh database is immediately usable.
    pub async fn open(config: &Config) -> Result<Self, PipelineError> {
        let pool = db::connect(&config.cache.db_path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool, running migrations.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, PipelineError> {
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Stable fingerprint over the normalized location inputs.
    pub fn key(street: &str, intersection: &str, city: &str, county: &str) -> String {
        geocode_key(street, intersection, city, county)
    }

    /// The current (latest) record for a ticket, if any.
    pub async fn current(&self, ticket_number: &str) -> Result<Option<GeocodeRecord>, PipelineError> {
        let row = sqlx::query(
            "SELECT * FROM geocode_cache WHERE ticket_number = ? AND is_current = 1",
        )
        .bind(ticket_number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| record_from_row(&r)).transpose()
    }

    /// The current record matching a geocode key, if any.
    pub async fn current_by_key(
        &self,
        geocode_key: &str,
    ) -> Result<Option<GeocodeRecord>, PipelineError> {
        let row = sqlx::query(
            "SELECT * FROM geocode_cache WHERE geocode_key = ? AND is_current = 1 LIMIT 1",
        )
        .bind(geocode_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| record_from_row(&r)).transpose()
    }

    /// All versions for a ticket, newest first. Empty for unknown tickets.
    pub async fn history(&self, ticket_number: &str) -> Result<Vec<GeocodeRecord>, PipelineError> {
        let rows = sqlx::query(
            "SELECT * FROM geocode_cache WHERE ticket_number = ? ORDER BY version DESC",
        )
        .bind(ticket_number)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Write a new version for the record's ticket.
    ///
    /// Assigns `version = prior + 1`, links `supersedes_cache_id`, and flips
    /// the prior current record's `is_current` flag in the same transaction.
    /// Fails with [`PipelineError::Locked`] if the prior current record is
    /// locked and `stage_id` is not [`HUMAN_REVIEW_STAGE`], and with
    /// [`PipelineError::Storage`] if the record violates bounds invariants.
    pub async fn put(
        &self,
        record: &GeocodeRecord,
        stage_id: &str,
    ) -> Result<GeocodeRecord, PipelineError> {
        record
            .check_bounds()
            .map_err(PipelineError::Storage)?;

        let mut tx = self.pool.begin().await?;

        let prior = sqlx::query(
            "SELECT cache_id, version, locked, lock_reason FROM geocode_cache \
             WHERE ticket_number = ? AND is_current = 1",
        )
        .bind(&record.ticket_number)
        .fetch_optional(&mut *tx)
        .await?;

        let (version, supersedes) = match prior {
            Some(row) => {
                let locked: bool = row.try_get::<i64, _>("locked")? != 0;
                if locked && stage_id != HUMAN_REVIEW_STAGE {
                    let reason: Option<String> = row.try_get("lock_reason")?;
                    return Err(PipelineError::Locked {
                        ticket: record.ticket_number.clone(),
                        reason: reason.unwrap_or_else(|| "locked".into()),
                    });
                }
                let prior_id: i64 = row.try_get("cache_id")?;
                let prior_version: i64 = row.try_get("version")?;

                sqlx::query("UPDATE geocode_cache SET is_current = 0 WHERE cache_id = ?")
                    .bind(prior_id)
                    .execute(&mut *tx)
                    .await?;

                (prior_version + 1, Some(prior_id))
            }
            None => (1, None),
        };

        let created_at = Utc::now();
        let flags_json = if record.validation_flags.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&record.validation_flags).map_err(storage_err)?)
        };
        let metadata_json = if record.metadata.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&record.metadata).map_err(storage_err)?)
        };

        let result = sqlx::query(
            r#"
            INSERT INTO geocode_cache (
                ticket_number, geocode_key,
                street, intersection, city, county,
                ticket_type, duration, work_type, excavator,
                latitude, longitude, method, approach,
                confidence, reasoning, error_message,
                quality_tier, review_priority, validation_flags,
                version, supersedes_cache_id, is_current,
                created_at, created_by_stage,
                locked, lock_reason,
                metadata_json, processing_time_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, 0, NULL, ?, ?)
            "#,
        )
        .bind(&record.ticket_number)
        .bind(&record.geocode_key)
        .bind(&record.street)
        .bind(&record.intersection)
        .bind(&record.city)
        .bind(&record.county)
        .bind(&record.ticket_type)
        .bind(&record.duration)
        .bind(&record.work_type)
        .bind(&record.excavator)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(&record.method)
        .bind(&record.approach)
        .bind(record.confidence)
        .bind(&record.reasoning)
        .bind(&record.error_message)
        .bind(record.quality_tier.as_str())
        .bind(record.review_priority.as_str())
        .bind(flags_json)
        .bind(version)
        .bind(supersedes)
        .bind(created_at.to_rfc3339())
        .bind(stage_id)
        .bind(metadata_json)
        .bind(record.processing_time_ms)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut stored = record.clone();
        stored.id = result.last_insert_rowid();
        stored.version = version;
        stored.supersedes = supersedes;
        stored.is_current = true;
        stored.created_at = Some(created_at);
        stored.created_by_stage = Some(stage_id.to_string());
        stored.locked = false;
        stored.lock_reason = None;
        Ok(stored)
    }

    /// Lock the current record to preserve human-verified coordinates.
    pub async fn lock(
        &self,
        ticket_number: &str,
        reason: &str,
        actor: &str,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "UPDATE geocode_cache \
             SET locked = 1, lock_reason = ?, locked_at = ?, locked_by = ? \
             WHERE ticket_number = ? AND is_current = 1",
        )
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(actor)
        .bind(ticket_number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Clear the lock on the current record.
    pub async fn unlock(&self, ticket_number: &str) -> Result<(), PipelineError> {
        sqlx::query(
            "UPDATE geocode_cache \
             SET locked = 0, lock_reason = NULL, locked_at = NULL, locked_by = NULL \
             WHERE ticket_number = ? AND is_current = 1",
        )
        .bind(ticket_number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Query current records with the given filter.
    pub async fn query(&self, filter: &CacheQuery) -> Result<Vec<GeocodeRecord>, PipelineError> {
        let mut conditions = vec!["is_current = 1".to_string()];
        let mut string_params: Vec<String> = Vec::new();

        if !filter.quality_tiers.is_empty() {
            let placeholders = vec!["?"; filter.quality_tiers.len()].join(",");
            conditions.push(format!("quality_tier IN ({placeholders})"));
            string_params.extend(filter.quality_tiers.iter().map(|t| t.as_str().to_string()));
        }
        if !filter.review_priorities.is_empty() {
            let placeholders = vec!["?"; filter.review_priorities.len()].join(",");
            conditions.push(format!("review_priority IN ({placeholders})"));
            string_params.extend(
                filter
                    .review_priorities
                    .iter()
                    .map(|p| p.as_str().to_string()),
            );
        }
        if !filter.methods.is_empty() {
            let placeholders = vec!["?"; filter.methods.len()].join(",");
            conditions.push(format!("method IN ({placeholders})"));
            string_params.extend(filter.methods.iter().cloned());
        }
        if let Some(key) = &filter.geocode_key {
            conditions.push("geocode_key = ?".to_string());
            string_params.push(key.clone());
        }

        let mut sql = format!(
            "SELECT * FROM geocode_cache WHERE {}",
            conditions.join(" AND ")
        );
        if filter.min_confidence.is_some() {
            sql.push_str(" AND confidence >= ?");
        }
        if filter.locked.is_some() {
            sql.push_str(" AND locked = ?");
        }
        sql.push_str(" ORDER BY ticket_number");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut query = sqlx::query(&sql);
        for param in &string_params {
            query = query.bind(param);
        }
        if let Some(min_confidence) = filter.min_confidence {
            query = query.bind(min_confidence);
        }
        if let Some(locked) = filter.locked {
            query = query.bind(if locked { 1i64 } else { 0i64 });
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Aggregate statistics over current records, plus the total version
    /// count across all of history.
    pub async fn statistics(&self) -> Result<CacheStatistics, PipelineError> {
        let total_records: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM geocode_cache WHERE is_current = 1")
                .fetch_one(&self.pool)
                .await?;
        let total_versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM geocode_cache")
            .fetch_one(&self.pool)
            .await?;
        let locked_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM geocode_cache WHERE is_current = 1 AND locked = 1",
        )
        .fetch_one(&self.pool)
        .await?;

        let mut tier_counts = BTreeMap::new();
        let rows = sqlx::query(
            "SELECT quality_tier, COUNT(*) AS count FROM geocode_cache \
             WHERE is_current = 1 GROUP BY quality_tier",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in &rows {
            tier_counts.insert(row.try_get("quality_tier")?, row.try_get("count")?);
        }

        let mut priority_counts = BTreeMap::new();
        let rows = sqlx::query(
            "SELECT review_priority, COUNT(*) AS count FROM geocode_cache \
             WHERE is_current = 1 GROUP BY review_priority",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in &rows {
            priority_counts.insert(row.try_get("review_priority")?, row.try_get("count")?);
        }

        let mut method_counts = BTreeMap::new();
        let rows = sqlx::query(
            "SELECT method, COUNT(*) AS count FROM geocode_cache \
             WHERE is_current = 1 GROUP BY method",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in &rows {
            method_counts.insert(row.try_get("method")?, row.try_get("count")?);
        }

        let mut avg_confidence_by_tier = BTreeMap::new();
        let rows = sqlx::query(
            "SELECT quality_tier, AVG(confidence) AS avg_conf FROM geocode_cache \
             WHERE is_current = 1 AND confidence IS NOT NULL GROUP BY quality_tier",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in &rows {
            avg_confidence_by_tier.insert(row.try_get("quality_tier")?, row.try_get("avg_conf")?);
        }

        Ok(CacheStatistics {
            total_records,
            total_versions,
            locked_count,
            tier_counts,
            priority_counts,
            method_counts,
            avg_confidence_by_tier,
        })
    }
}

fn storage_err(err: serde_json::Error) -> PipelineError {
    PipelineError::Storage(err.to_string())
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn record_from_row(row: &SqliteRow) -> Result<GeocodeRecord, PipelineError> {
    let tier_raw: String = row.try_get("quality_tier")?;
    let quality_tier = QualityTier::parse(&tier_raw)
        .ok_or_else(|| PipelineError::Storage(format!("unknown quality tier: {tier_raw}")))?;
    let priority_raw: String = row.try_get("review_priority")?;
    let review_priority = ReviewPriority::parse(&priority_raw)
        .ok_or_else(|| PipelineError::Storage(format!("unknown review priority: {priority_raw}")))?;

    let flags_json: Option<String> = row.try_get("validation_flags")?;
    let validation_flags = match flags_json {
        Some(json) => serde_json::from_str(&json).map_err(storage_err)?,
        None => Vec::new(),
    };
    let metadata_json: Option<String> = row.try_get("metadata_json")?;
    let metadata = match metadata_json {
        Some(json) => serde_json::from_str(&json).map_err(storage_err)?,
        None => BTreeMap::new(),
    };

    Ok(GeocodeRecord {
        id: row.try_get("cache_id")?,
        ticket_number: row.try_get("ticket_number")?,
        geocode_key: row.try_get("geocode_key")?,
        street: row.try_get("street")?,
        intersection: row.try_get("intersection")?,
        city: row.try_get("city")?,
        county: row.try_get("county")?,
        ticket_type: row.try_get("ticket_type")?,
        duration: row.try_get("duration")?,
        work_type: row.try_get("work_type")?,
        excavator: row.try_get("excavator")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        method: row.try_get("method")?,
        approach: row.try_get("approach")?,
        confidence: row.try_get("confidence")?,
        reasoning: row.try_get("reasoning")?,
        error_message: row.try_get("error_message")?,
        quality_tier,
        review_priority,
        validation_flags,
        version: row.try_get("version")?,
        supersedes: row.try_get("supersedes_cache_id")?,
        is_current: row.try_get::<i64, _>("is_current")? != 0,
        created_at: parse_timestamp(row.try_get("created_at")?),
        created_by_stage: row.try_get("created_by_stage")?,
        locked: row.try_get::<i64, _>("locked")? != 0,
        lock_reason: row.try_get("lock_reason")?,
        locked_at: parse_timestamp(row.try_get("locked_at")?),
        locked_by: row.try_get("locked_by")?,
        metadata,
        processing_time_ms: row.try_get("processing_time_ms")?,
    })
}
