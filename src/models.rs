//! Core data models for the geocoding pipeline.
//!
//! These types represent the tickets and geocode records that flow through
//! the pipeline. The data lifecycle is:
//!
//! ```text
//! Ticket → stage.process() → GeocodeRecord → validate() + assess()
//!                                  ↓
//!                            cache.put() → versioned cache (one current per ticket)
//! ```
//!
//! A [`GeocodeRecord`] is immutable once written; it can only be superseded
//! by a newer version, and exactly one version per ticket is current.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Coarse quality label derived from (adjusted) confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityTier {
    Excellent,
    Good,
    Acceptable,
    ReviewNeeded,
    Failed,
}

impl QualityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "EXCELLENT",
            Self::Good => "GOOD",
            Self::Acceptable => "ACCEPTABLE",
            Self::ReviewNeeded => "REVIEW_NEEDED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EXCELLENT" => Some(Self::Excellent),
            "GOOD" => Some(Self::Good),
            "ACCEPTABLE" => Some(Self::Acceptable),
            "REVIEW_NEEDED" => Some(Self::ReviewNeeded),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Ordering rank: higher is better. Used to detect quality regressions
    /// between a cached record and a freshly written one.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Excellent => 4,
            Self::Good => 3,
            Self::Acceptable => 2,
            Self::ReviewNeeded => 1,
            Self::Failed => 0,
        }
    }
}

/// Orthogonal label driving the human review queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewPriority {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl ReviewPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(Self::None),
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Ordering rank: higher is more urgent. CRITICAL sorts first in the
    /// review queue.
    pub fn rank(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }
}

/// A normalized dig ticket as produced by the external loader.
///
/// Every field except `ticket_number` is optional; the pipeline rejects
/// tickets with an empty `ticket_number` before any stage runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_number: String,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub intersection: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub county: Option<String>,
    #[serde(default)]
    pub ticket_type: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub work_type: Option<String>,
    #[serde(default)]
    pub excavator: Option<String>,
}

impl Ticket {
    /// Fingerprint of the ticket's location fields. See [`geocode_key`].
    pub fn geocode_key(&self) -> String {
        geocode_key(
            self.street.as_deref().unwrap_or(""),
            self.intersection.as_deref().unwrap_or(""),
            self.city.as_deref().unwrap_or(""),
            self.county.as_deref().unwrap_or(""),
        )
    }
}

/// A versioned geocode result for one ticket.
///
/// Records are created by stages, assessed, and written through the cache
/// store. After a write the record is immutable except for the `is_current`
/// flag (flipped when superseded) and the lock fields (set once by a human).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodeRecord {
    /// Database row id; 0 until the record has been stored.
    pub id: i64,
    pub ticket_number: String,
    pub geocode_key: String,

    // Input snapshot
    pub street: Option<String>,
    pub intersection: Option<String>,
    pub city: Option<String>,
    pub county: Option<String>,
    pub ticket_type: Option<String>,
    pub duration: Option<String>,
    pub work_type: Option<String>,
    pub excavator: Option<String>,

    // Result
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Name of the producing stage.
    pub method: String,
    /// Sub-strategy tag, e.g. `"closest_point"` or `"city_centroid_fallback"`.
    pub approach: Option<String>,
    pub confidence: Option<f64>,
    pub reasoning: Option<String>,
    pub error_message: Option<String>,

    // Quality
    pub quality_tier: QualityTier,
    pub review_priority: ReviewPriority,
    pub validation_flags: Vec<String>,

    // Lineage
    pub version: i64,
    /// Row id of the record this one superseded, or `None` for version 1.
    pub supersedes: Option<i64>,
    pub is_current: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub created_by_stage: Option<String>,

    // Lock (human verification)
    pub locked: bool,
    pub lock_reason: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,

    /// Extensible bag. Stages append keys; existing keys are never
    /// overwritten (see [`GeocodeRecord::append_metadata`]).
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub processing_time_ms: Option<i64>,
}

impl GeocodeRecord {
    /// Start a record from a ticket's input snapshot. Result and quality
    /// fields are filled in by the stage and the assessment step.
    pub fn from_ticket(ticket: &Ticket, method: &str) -> Self {
        Self {
            id: 0,
            ticket_number: ticket.ticket_number.clone(),
            geocode_key: ticket.geocode_key(),
            street: ticket.street.clone(),
            intersection: ticket.intersection.clone(),
            city: ticket.city.clone(),
            county: ticket.county.clone(),
            ticket_type: ticket.ticket_type.clone(),
            duration: ticket.duration.clone(),
            work_type: ticket.work_type.clone(),
            excavator: ticket.excavator.clone(),
            latitude: None,
            longitude: None,
            method: method.to_string(),
            approach: None,
            confidence: None,
            reasoning: None,
            error_message: None,
            quality_tier: QualityTier::Failed,
            review_priority: ReviewPriority::Critical,
            validation_flags: Vec::new(),
            version: 1,
            supersedes: None,
            is_current: true,
            created_at: None,
            created_by_stage: None,
            locked: false,
            lock_reason: None,
            locked_at: None,
            locked_by: None,
            metadata: BTreeMap::new(),
            processing_time_ms: None,
        }
    }

    /// A FAILED record carrying an error message. Used when a stage's
    /// `process` raises instead of producing coordinates.
    pub fn failed(ticket: &Ticket, method: &str, error: &str) -> Self {
        let mut record = Self::from_ticket(ticket, method);
        record.error_message = Some(error.to_string());
        record
    }

    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    /// Append a metadata key. Stages append, never overwrite: if the key is
    /// already present the existing value wins.
    pub fn append_metadata(&mut self, key: &str, value: serde_json::Value) {
        self.metadata.entry(key.to_string()).or_insert(value);
    }

    /// Check the record-level invariants that must hold before a write:
    /// coordinate bounds and confidence bounds.
    pub fn check_bounds(&self) -> Result<(), String> {
        if let Some(lat) = self.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(format!("latitude {lat} out of bounds"));
            }
        }
        if let Some(lng) = self.longitude {
            if !(-180.0..=180.0).contains(&lng) {
                return Err(format!("longitude {lng} out of bounds"));
            }
        }
        if let Some(c) = self.confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(format!("confidence {c} out of bounds"));
            }
        }
        Ok(())
    }
}

/// Filter for cache queries. Empty vectors and `None` fields are ignored;
/// set fields are combined with AND semantics.
#[derive(Debug, Clone, Default)]
pub struct CacheQuery {
    pub quality_tiers: Vec<QualityTier>,
    pub review_priorities: Vec<ReviewPriority>,
    pub methods: Vec<String>,
    pub min_confidence: Option<f64>,
    pub locked: Option<bool>,
    pub geocode_key: Option<String>,
    pub limit: Option<i64>,
}

/// Deterministic fingerprint over the normalized location inputs.
///
/// Insensitive to case and surrounding whitespace; the same four inputs
/// always produce the same key across processes.
pub fn geocode_key(street: &str, intersection: &str, city: &str, county: &str) -> String {
    let norm = |s: &str| s.trim().to_uppercase();
    let key = format!(
        "{}|{}|{}|{}",
        norm(street),
        norm(intersection),
        norm(city),
        norm(county)
    );
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}
