//! # digline CLI
//!
//! The `digline` binary drives the geocoding pipeline: database
//! initialization, batch runs, cache inspection, and lock management.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `digline init` | Create the cache database and run schema migrations |
//! | `digline run <tickets.json>` | Run the configured pipeline over a ticket batch |
//! | `digline stats` | Print cache statistics |
//! | `digline lock <ticket> --reason <text>` | Lock a ticket's current geocode |
//! | `digline unlock <ticket>` | Unlock a ticket |
//! | `digline export <out.csv>` | Export current records to CSV |
//! | `digline review-queue <out.csv>` | Export the prioritized review queue |
//!
//! All commands accept `--config` pointing at a TOML configuration file.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use digline::cache::{CacheStore, HUMAN_REVIEW_STAGE};
use digline::config::load_config;
use digline::export;
use digline::models::{CacheQuery, ReviewPriority};
use digline::pipeline::Pipeline;
use digline::tickets::load_tickets;

/// digline — geocode 811 dig tickets against a county road network with a
/// versioned, quality-tiered result cache.
#[derive(Parser)]
#[command(name = "digline", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/digline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the cache database schema. Idempotent.
    Init,

    /// Run the pipeline over a ticket batch (JSON array of tickets).
    Run {
        /// Path to the normalized ticket batch.
        tickets: PathBuf,
    },

    /// Print cache statistics.
    Stats,

    /// Lock a ticket's current geocode to preserve verified coordinates.
    Lock {
        ticket: String,
        /// Why this geocode is locked (e.g. "Field verified").
        #[arg(long)]
        reason: String,
        /// Who is locking it.
        #[arg(long, default_value = HUMAN_REVIEW_STAGE)]
        actor: String,
    },

    /// Unlock a ticket, allowing automated reprocessing again.
    Unlock { ticket: String },

    /// Export all current records to CSV.
    Export {
        /// Output file path.
        output: PathBuf,
    },

    /// Export the review queue (priority ≠ NONE) to CSV.
    ReviewQueue {
        /// Output file path.
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            CacheStore::open(&config).await?;
            println!("cache initialized at {}", config.cache.db_path.display());
        }

        Commands::Run { tickets } => {
            let batch = load_tickets(&tickets)?;
            let pipeline = Pipeline::from_config(&config).await?;
            println!(
                "running {} stage(s) over {} ticket(s)",
                pipeline.stage_count(),
                batch.len()
            );

            let report = pipeline.run(&batch).await?;

            let results_path = config.output_dir.join("results.csv");
            let review_path = config.output_dir.join("review_queue.csv");
            let summary_path = config.output_dir.join("summary.json");
            export::write_results_csv(&results_path, &report.results)?;
            export::write_review_queue_csv(&review_path, &report.review_queue)?;
            export::write_summary_json(&summary_path, &report.summary)?;

            let s = &report.summary;
            println!();
            println!("Pipeline {} {}", s.pipeline_id, if s.aborted { "ABORTED" } else { "complete" });
            println!("  tickets:   {} ({} rejected)", s.total_tickets, s.rejected_tickets);
            println!("  succeeded: {}", s.total_succeeded);
            println!("  failed:    {}", s.total_failed);
            println!("  skipped:   {}", s.total_skipped);
            println!("  time:      {} ms", s.total_time_ms);
            for stage in &s.stages {
                println!(
                    "  [{}] processed {} (ok {}, failed {}, skipped {}, degraded {}) avg {:.1} ms",
                    stage.stage_name,
                    stage.processed,
                    stage.succeeded,
                    stage.failed,
                    stage.skipped,
                    stage.degraded,
                    stage.avg_time_ms
                );
            }
            println!();
            println!("  results:      {}", results_path.display());
            println!(
                "  review queue: {} ({} tickets)",
                review_path.display(),
                report.review_queue.len()
            );
            println!("  summary:      {}", summary_path.display());
        }

        Commands::Stats => {
            let cache = CacheStore::open(&config).await?;
            let stats = cache.statistics().await?;

            println!("digline — cache stats");
            println!("=====================");
            println!();
            println!("  database:  {}", config.cache.db_path.display());
            println!("  current:   {}", stats.total_records);
            println!("  versions:  {}", stats.total_versions);
            println!("  locked:    {}", stats.locked_count);
            if !stats.tier_counts.is_empty() {
                println!();
                println!("  by quality tier:");
                for (tier, count) in &stats.tier_counts {
                    let avg = stats
                        .avg_confidence_by_tier
                        .get(tier)
                        .map(|c| format!(" (avg confidence {c:.2})"))
                        .unwrap_or_default();
                    println!("    {tier:<14} {count}{avg}");
                }
            }
            if !stats.priority_counts.is_empty() {
                println!();
                println!("  by review priority:");
                for (priority, count) in &stats.priority_counts {
                    println!("    {priority:<14} {count}");
                }
            }
        }

        Commands::Lock {
            ticket,
            reason,
            actor,
        } => {
            let cache = CacheStore::open(&config).await?;
            cache.lock(&ticket, &reason, &actor).await?;
            println!("locked {ticket}: {reason}");
        }

        Commands::Unlock { ticket } => {
            let cache = CacheStore::open(&config).await?;
            cache.unlock(&ticket).await?;
            println!("unlocked {ticket}");
        }

        Commands::Export { output } => {
            let cache = CacheStore::open(&config).await?;
            let records = cache.query(&CacheQuery::default()).await?;
            let count = export::write_results_csv(&output, &records)?;
            println!("exported {count} records to {}", output.display());
        }

        Commands::ReviewQueue { output } => {
            let cache = CacheStore::open(&config).await?;
            let records = cache
                .query(&CacheQuery {
                    review_priorities: vec![
                        ReviewPriority::Low,
                        ReviewPriority::Medium,
                        ReviewPriority::High,
                        ReviewPriority::Critical,
                    ],
                    ..CacheQuery::default()
                })
                .await?;
            let queue = digline::pipeline::build_review_queue(&records);
            let count = export::write_review_queue_csv(&output, &queue)?;
            println!("review queue: {count} tickets at {}", output.display());
        }
    }

    Ok(())
}
