//! Reprocessing decisions: skip or process a ticket given its cached
//! record and a stage's skip rules.
//!
//! Rules compose with OR semantics — any matching rule causes a skip.
//! With no cached record there is nothing to skip.

use serde::Deserialize;

use crate::models::{GeocodeRecord, QualityTier};

/// Per-stage skip criteria evaluated against the current cached record.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SkipRules {
    /// Skip when the cached record is locked (human verified).
    pub skip_if_locked: bool,
    /// Skip when the cached quality tier is in this set.
    pub skip_if_quality: Vec<QualityTier>,
    /// Skip when the cached confidence meets this threshold.
    pub skip_if_confidence: Option<f64>,
    /// Skip when the cached method is in this set.
    pub skip_if_method: Vec<String>,
    /// Skip when the cached record was produced by this same stage,
    /// unless that attempt FAILED (a failed prior attempt may be retried).
    pub skip_same_stage: bool,
}

impl Default for SkipRules {
    fn default() -> Self {
        Self {
            skip_if_locked: true,
            skip_if_quality: Vec::new(),
            skip_if_confidence: None,
            skip_if_method: Vec::new(),
            skip_same_stage: true,
        }
    }
}

/// Outcome of the skip decision, with a human-readable explanation.
#[derive(Debug, Clone)]
pub struct SkipDecision {
    pub skip: bool,
    pub reason: String,
}

impl SkipDecision {
    fn skip(reason: String) -> Self {
        Self { skip: true, reason }
    }

    fn process(reason: &str) -> Self {
        Self {
            skip: false,
            reason: reason.to_string(),
        }
    }
}

/// Decide whether `incoming_stage_id` should skip a ticket with the given
/// cached record.
pub fn decide(
    cached: Option<&GeocodeRecord>,
    incoming_stage_id: &str,
    rules: &SkipRules,
) -> SkipDecision {
    let Some(record) = cached else {
        return SkipDecision::process("no prior record");
    };

    if rules.skip_if_locked && record.locked {
        let reason = record.lock_reason.as_deref().unwrap_or("no reason given");
        return SkipDecision::skip(format!("locked ({reason})"));
    }

    if rules.skip_if_quality.contains(&record.quality_tier) {
        return SkipDecision::skip(format!(
            "quality tier {} in skip list",
            record.quality_tier.as_str()
        ));
    }

    if let (Some(threshold), Some(confidence)) = (rules.skip_if_confidence, record.confidence) {
        if confidence >= threshold {
            return SkipDecision::skip(format!(
                "confidence {confidence:.2} >= {threshold:.2}"
            ));
        }
    }

    if rules.skip_if_method.contains(&record.method) {
        return SkipDecision::skip(format!("method {} in skip list", record.method));
    }

    if rules.skip_same_stage
        && record.created_by_stage.as_deref() == Some(incoming_stage_id)
        && record.quality_tier != QualityTier::Failed
    {
        return SkipDecision::skip(format!("already processed by {incoming_stage_id}"));
    }

    SkipDecision::process("no skip rule matched")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Ticket;

    fn cached(tier: QualityTier, confidence: f64, stage: &str) -> GeocodeRecord {
        let ticket = Ticket {
            ticket_number: "T1".into(),
            ..Ticket::default()
        };
        let mut record = GeocodeRecord::from_ticket(&ticket, stage);
        record.quality_tier = tier;
        record.confidence = Some(confidence);
        record.created_by_stage = Some(stage.to_string());
        record
    }

    #[test]
    fn test_no_prior_record_processes() {
        let decision = decide(None, "proximity", &SkipRules::default());
        assert!(!decision.skip);
        assert_eq!(decision.reason, "no prior record");
    }

    #[test]
    fn test_skip_locked() {
        let mut record = cached(QualityTier::ReviewNeeded, 0.5, "other_stage");
        record.locked = true;
        record.lock_reason = Some("Field verified".into());

        let decision = decide(Some(&record), "proximity", &SkipRules::default());
        assert!(decision.skip);
        assert!(decision.reason.contains("locked"));
        assert!(decision.reason.contains("Field verified"));
    }

    #[test]
    fn test_skip_by_quality_tier() {
        let rules = SkipRules {
            skip_if_quality: vec![QualityTier::Excellent, QualityTier::Good],
            ..SkipRules::default()
        };

        let decision = decide(
            Some(&cached(QualityTier::Excellent, 0.95, "other_stage")),
            "proximity",
            &rules,
        );
        assert!(decision.skip);

        let decision = decide(
            Some(&cached(QualityTier::Acceptable, 0.7, "other_stage")),
            "proximity",
            &rules,
        );
        assert!(!decision.skip);
    }

    #[test]
    fn test_skip_by_confidence_threshold() {
        let rules = SkipRules {
            skip_if_confidence: Some(0.75),
            ..SkipRules::default()
        };

        let decision = decide(
            Some(&cached(QualityTier::Good, 0.85, "other_stage")),
            "proximity",
            &rules,
        );
        assert!(decision.skip);

        let decision = decide(
            Some(&cached(QualityTier::Acceptable, 0.70, "other_stage")),
            "proximity",
            &rules,
        );
        assert!(!decision.skip);
    }

    #[test]
    fn test_skip_by_method() {
        let rules = SkipRules {
            skip_if_method: vec!["manual".to_string()],
            ..SkipRules::default()
        };
        let mut record = cached(QualityTier::Good, 0.85, "other_stage");
        record.method = "manual".into();

        let decision = decide(Some(&record), "proximity", &rules);
        assert!(decision.skip);
    }

    #[test]
    fn test_skip_same_stage_but_retry_failed() {
        let rules = SkipRules::default();

        let decision = decide(
            Some(&cached(QualityTier::Acceptable, 0.7, "proximity")),
            "proximity",
            &rules,
        );
        assert!(decision.skip, "same stage with non-failed tier skips");

        let decision = decide(
            Some(&cached(QualityTier::Failed, 0.0, "proximity")),
            "proximity",
            &rules,
        );
        assert!(!decision.skip, "a failed prior attempt may be retried");
    }

    #[test]
    fn test_rules_compose_with_or_semantics() {
        let rules = SkipRules {
            skip_if_quality: vec![QualityTier::Excellent],
            skip_if_confidence: Some(0.99),
            ..SkipRules::default()
        };
        // Tier matches even though confidence does not
        let decision = decide(
            Some(&cached(QualityTier::Excellent, 0.91, "other_stage")),
            "proximity",
            &rules,
        );
        assert!(decision.skip);
    }
}
