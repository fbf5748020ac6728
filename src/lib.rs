//! # digline
//!
//! **A geocoding pipeline for 811 dig tickets in rural counties.**
//!
//! digline converts semi-structured locate requests — "work on US 385
//! near FM 1788, Andrews County" — into coordinates with an attached
//! quality assessment, feeding a human-review queue and downstream cost
//! modeling.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────────────────────┐   ┌─────────────┐
//! │ Tickets  │──▶│   Pipeline (stage-major)    │──▶│   SQLite    │
//! │ (JSON)   │   │ proximity→validate→enrich   │   │  versioned  │
//! └──────────┘   └──────────────┬──────────────┘   │    cache    │
//!                               │                  └──────┬──────┘
//!                ┌──────────────┤                         │
//!                ▼              ▼                         ▼
//!          ┌──────────┐   ┌──────────┐             ┌────────────┐
//!          │ results  │   │  review  │             │  summary   │
//!          │  (CSV)   │   │  queue   │             │   (JSON)   │
//!          └──────────┘   └──────────┘             └────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The **orchestrator** ([`pipeline`]) feeds each ticket through each
//!    stage in order; a later stage sees the earlier stage's writes.
//! 2. A **stage** ([`stage`]) consults the skip decider ([`reprocess`])
//!    against the cache; if it proceeds, its `process` step runs — the
//!    [`geocoder`] for the proximity stage, re-validation or enrichment
//!    for the later ones.
//! 3. The **proximity geocoder** resolves roads against the loaded
//!    network ([`roads`]) with normalized-name and variant lookup,
//!    choosing among four geometric strategies plus a city-centroid
//!    fallback.
//! 4. Results are validated ([`validation`]), tiered ([`quality`]), and
//!    written as a new version through the cache ([`cache`]) — exactly
//!    one current record per ticket, with locks preserving
//!    human-verified coordinates.
//! 5. At end of batch the orchestrator exports the results table, the
//!    prioritized review queue, and a summary object ([`export`]).
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Error taxonomy (`PipelineError`) |
//! | [`models`] | `Ticket`, `GeocodeRecord`, tiers, priorities, fingerprints |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Idempotent cache schema migrations |
//! | [`cache`] | Versioned cache store: current pointer, locks, queries |
//! | [`quality`] | Tier thresholds and review-priority rules |
//! | [`validation`] | Registry of independent validation rules |
//! | [`reprocess`] | Skip rules and the reprocessing decider |
//! | [`geometry`] | Geodesic helpers: haversine, snapping, intersections |
//! | [`roads`] | Road network with normalized-name lookup |
//! | [`cities`] | City reference points |
//! | [`geocoder`] | Proximity geocoding strategies and confidence model |
//! | [`corridor`] | Route-corridor and pipeline-proximity enrichers |
//! | [`stage`] | Stage trait and framework lifecycle |
//! | [`stage_proximity`] | Proximity geocoding stage |
//! | [`stage_validation`] | Re-validation stage |
//! | [`stage_enrichment`] | Pipeline-proximity enrichment stage |
//! | [`pipeline`] | Orchestrator, batch run, summary |
//! | [`export`] | Results, review queue, and summary writers |
//! | [`tickets`] | Normalized ticket batch loader |

pub mod cache;
pub mod cities;
pub mod config;
pub mod corridor;
pub mod db;
pub mod error;
pub mod export;
pub mod geocoder;
pub mod geometry;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod quality;
pub mod reprocess;
pub mod roads;
pub mod stage;
pub mod stage_enrichment;
pub mod stage_proximity;
pub mod stage_validation;
pub mod tickets;
pub mod validation;
