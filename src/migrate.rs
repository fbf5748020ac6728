//! Cache schema migrations.
//!
//! Creates all required tables and ensures idempotent execution. Run via
//! `digline init`, and again by [`crate::cache::CacheStore::open`] so a
//! fresh database is always usable.
//!
//! # Schema
//!
//! ```text
//! ┌────────────────────┐        ┌──────────────────┐
//! │   geocode_cache    │        │  pipeline_runs   │
//! │                    │        │                  │
//! │ cache_id (PK)      │        │ pipeline_id (PK) │
//! │ ticket_number      │        │ started_at       │
//! │ geocode_key        │        │ finished_at      │
//! │ street..excavator  │        │ status           │
//! │ latitude/longitude │        │ ticket_count     │
//! │ method/approach    │        │ summary_json     │
//! │ confidence         │        └──────────────────┘
//! │ quality_tier       │
//! │ review_priority    │
//! │ version/supersedes │
//! │ is_current         │
//! │ locked/lock_reason │
//! │ metadata_json      │
//! └────────────────────┘
//! ```
//!
//! # Indexes
//!
//! Indexed access paths: `ticket_number` (+ `is_current`), `geocode_key`,
//! `quality_tier`, `review_priority`, `locked`.

use sqlx::SqlitePool;

use crate::error::PipelineError;

/// Run all cache migrations. Safe to call multiple times — every statement
/// uses `CREATE ... IF NOT EXISTS`.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS geocode_cache (
            cache_id INTEGER PRIMARY KEY AUTOINCREMENT,
            ticket_number TEXT NOT NULL,
            geocode_key TEXT NOT NULL,
            street TEXT,
            intersection TEXT,
            city TEXT,
            county TEXT,
            ticket_type TEXT,
            duration TEXT,
            work_type TEXT,
            excavator TEXT,
            latitude REAL,
            longitude REAL,
            method TEXT NOT NULL,
            approach TEXT,
            confidence REAL,
            reasoning TEXT,
            error_message TEXT,
            quality_tier TEXT NOT NULL,
            review_priority TEXT NOT NULL DEFAULT 'NONE',
            validation_flags TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            supersedes_cache_id INTEGER,
            is_current INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            created_by_stage TEXT,
            locked INTEGER NOT NULL DEFAULT 0,
            lock_reason TEXT,
            locked_at TEXT,
            locked_by TEXT,
            metadata_json TEXT,
            processing_time_ms INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            pipeline_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            status TEXT NOT NULL,
            ticket_count INTEGER NOT NULL,
            summary_json TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_cache_ticket_current \
         ON geocode_cache(ticket_number, is_current)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_geocode_key ON geocode_cache(geocode_key)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_quality ON geocode_cache(quality_tier)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_priority ON geocode_cache(review_priority)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_locked ON geocode_cache(locked)")
        .execute(pool)
        .await?;

    Ok(())
}
