//! Admission gate: applies the confidence threshold to an analyzer verdict.
//!
//! The gate never computes confidence itself. AI and heuristic verdicts go
//! through the same comparison, so admission is deterministic for a given score.

use serde::Serialize;
use tracing::debug;

use crate::analyze::{Analysis, AnalysisSource};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdmissionDecision {
    pub admit: bool,
    pub confidence: f64,
    pub category: String,
    pub rationale: String,
    pub source: AnalysisSource,
}

#[derive(Debug, Clone, Copy)]
pub struct AdmissionGate {
    threshold: f64,
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl AdmissionGate {
    /// Non-finite thresholds fall back to the default; others are clamped to 0..=1.
    pub fn new(threshold: f64) -> Self {
        let threshold = if threshold.is_finite() {
            threshold.clamp(0.0, 1.0)
        } else {
            DEFAULT_CONFIDENCE_THRESHOLD
        };
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// `admit = confidence >= threshold`. A NaN confidence is treated as 0.
    pub fn decide(&self, analysis: &Analysis) -> AdmissionDecision {
        let confidence = if analysis.confidence.is_nan() {
            0.0
        } else {
            analysis.confidence.clamp(0.0, 1.0)
        };
        let admit = confidence >= self.threshold;

        let rationale = if admit {
            analysis.rationale.clone()
        } else {
            format!(
                "{} (below threshold {:.2})",
                analysis.rationale, self.threshold
            )
        };

        debug!(
            target: "gate",
            admit,
            confidence,
            threshold = self.threshold,
            category = %analysis.category,
            source = ?analysis.source,
            "admission decided"
        );

        AdmissionDecision {
            admit,
            confidence,
            category: analysis.category.clone(),
            rationale,
            source: analysis.source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(confidence: f64) -> Analysis {
        Analysis {
            confidence,
            category: "software".into(),
            rationale: "asks a question".into(),
            source: AnalysisSource::Heuristic,
        }
    }

    #[test]
    fn non_finite_threshold_uses_default() {
        assert_eq!(AdmissionGate::new(f64::NAN).threshold(), DEFAULT_CONFIDENCE_THRESHOLD);
        assert_eq!(AdmissionGate::new(1.7).threshold(), 1.0);
    }

    #[test]
    fn nan_confidence_is_rejected() {
        let d = AdmissionGate::new(0.0001).decide(&analysis(f64::NAN));
        assert!(!d.admit);
        assert_eq!(d.confidence, 0.0);
    }

    #[test]
    fn rejection_rationale_names_threshold() {
        let d = AdmissionGate::default().decide(&analysis(0.3));
        assert!(!d.admit);
        assert!(d.rationale.ends_with("(below threshold 0.70)"), "{}", d.rationale);
    }
}
