//! Error taxonomy for the geocoding pipeline.
//!
//! Per-ticket geocoding failures are *data* — they become FAILED cache
//! records, not errors. The variants here cover everything else: malformed
//! input, storage invariant violations, lock conflicts, and configuration
//! problems detected before any ticket is processed.

use thiserror::Error;

/// All errors surfaced by the pipeline core.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed ticket (e.g. missing `ticket_number`). The ticket is
    /// rejected and counted in the batch summary; the batch continues.
    #[error("invalid ticket: {0}")]
    Input(String),

    /// A road name could not be resolved against the network. Non-fatal;
    /// the geocoder's strategy cascade handles it.
    #[error("road name not resolved: {0}")]
    SpatialLookupMiss(String),

    /// No geocoding strategy produced a result. Becomes a FAILED record
    /// carrying this message.
    #[error("no geocoding strategy succeeded: {0}")]
    StrategyExhausted(String),

    /// An automated stage attempted to supersede a locked record.
    #[error("record for ticket {ticket} is locked: {reason}")]
    Locked { ticket: String, reason: String },

    /// Cache invariant violation or underlying database failure.
    #[error("cache storage error: {0}")]
    Storage(String),

    /// Missing geometry file, enabled stage without required settings, or
    /// an otherwise unusable configuration. Detected at construction time.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Storage(err.to_string())
    }
}
