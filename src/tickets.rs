//! Ticket batch loading.
//!
//! Parsing and column normalization of raw spreadsheets is external; the
//! pipeline consumes an already-normalized batch as a JSON array of
//! ticket objects.

use std::path::Path;

use crate::error::PipelineError;
use crate::models::Ticket;

/// Load a normalized ticket batch from a JSON file.
pub fn load_tickets(path: &Path) -> Result<Vec<Ticket>, PipelineError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::Input(format!("failed to read ticket file {}: {e}", path.display()))
    })?;
    let tickets: Vec<Ticket> = serde_json::from_str(&content).map_err(|e| {
        PipelineError::Input(format!("invalid ticket JSON in {}: {e}", path.display()))
    })?;
    Ok(tickets)
}
