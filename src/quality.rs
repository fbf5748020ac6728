//! Quality assessment: tier assignment and review priority.
//!
//! Tiers are a function of *effective* confidence — the stored confidence
//! after method/approach penalties. The only mandatory penalty is the
//! city-centroid fallback's −0.10; other methods get a hook that defaults
//! to zero.

use crate::geocoder::APPROACH_CITY_CENTROID_FALLBACK;
use crate::models::{QualityTier, ReviewPriority};

/// Tier thresholds on effective confidence.
pub const EXCELLENT_THRESHOLD: f64 = 0.90;
pub const GOOD_THRESHOLD: f64 = 0.80;
pub const ACCEPTABLE_THRESHOLD: f64 = 0.65;
pub const FAILED_THRESHOLD: f64 = 0.40;

/// Penalty applied to the city-centroid fallback approach.
pub const FALLBACK_PENALTY: f64 = 0.10;

/// Emergency tickets below this confidence escalate to HIGH priority.
pub const EMERGENCY_CONFIDENCE_THRESHOLD: f64 = 0.75;

/// Maps (confidence, method, approach, ticket context) to a quality tier
/// and review priority.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityAssessor;

impl QualityAssessor {
    pub fn new() -> Self {
        Self
    }

    /// Confidence after method/approach adjustment, floored at zero.
    pub fn effective_confidence(
        &self,
        confidence: Option<f64>,
        method: &str,
        approach: Option<&str>,
    ) -> Option<f64> {
        let confidence = confidence?;
        let mut adjusted = confidence - self.method_penalty(method);
        if approach == Some(APPROACH_CITY_CENTROID_FALLBACK) {
            adjusted -= FALLBACK_PENALTY;
        }
        Some(adjusted.max(0.0))
    }

    /// Per-method penalty hook. No method carries a mandatory penalty
    /// today; the approach-level fallback penalty is handled separately.
    pub fn method_penalty(&self, _method: &str) -> f64 {
        0.0
    }

    /// Assign a quality tier from effective confidence.
    ///
    /// FAILED iff coordinates are absent, confidence is absent, or the
    /// effective confidence falls below the FAILED threshold.
    pub fn tier(
        &self,
        confidence: Option<f64>,
        has_coordinates: bool,
        method: &str,
        approach: Option<&str>,
    ) -> QualityTier {
        if !has_coordinates {
            return QualityTier::Failed;
        }
        let Some(effective) = self.effective_confidence(confidence, method, approach) else {
            return QualityTier::Failed;
        };

        if effective >= EXCELLENT_THRESHOLD {
            QualityTier::Excellent
        } else if effective >= GOOD_THRESHOLD {
            QualityTier::Good
        } else if effective >= ACCEPTABLE_THRESHOLD {
            QualityTier::Acceptable
        } else if effective >= FAILED_THRESHOLD {
            QualityTier::ReviewNeeded
        } else {
            QualityTier::Failed
        }
    }

    /// Derive the review priority. Rules are evaluated top to bottom;
    /// the first match wins.
    pub fn review_priority(
        &self,
        tier: QualityTier,
        has_coordinates: bool,
        confidence: Option<f64>,
        approach: Option<&str>,
        ticket_type: Option<&str>,
        validation_flags: &[String],
    ) -> ReviewPriority {
        if !has_coordinates || tier == QualityTier::Failed {
            return ReviewPriority::Critical;
        }
        if approach == Some(APPROACH_CITY_CENTROID_FALLBACK) {
            return ReviewPriority::High;
        }
        if ticket_type == Some("Emergency")
            && confidence.is_some_and(|c| c < EMERGENCY_CONFIDENCE_THRESHOLD)
        {
            return ReviewPriority::High;
        }
        if !validation_flags.is_empty() && tier == QualityTier::ReviewNeeded {
            return ReviewPriority::Medium;
        }
        if !validation_flags.is_empty() && tier == QualityTier::Acceptable {
            return ReviewPriority::Low;
        }
        ReviewPriority::None
    }
}
