//! Confidence scoring and gating.
//!
//! The scorer itself is an injected pure function behind
//! [`ConfidenceScorer`]; this module owns the contract, a simple
//! [`BaselineScorer`], and the threshold logic that turns a score into a
//! [`ReviewDecision`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::config::ConfidenceConfig;

/// Coarse confidence band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    /// Score ≥ 0.8.
    High,
    /// Score ≥ 0.5.
    Medium,
    /// Anything lower.
    Low,
}

impl ConfidenceLevel {
    /// Band for a score in `0.0..=1.0`.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::High
        } else if score >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Scorer output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    /// Confidence in `0.0..=1.0`.
    pub score: f64,
    /// Band for `score`.
    pub level: ConfidenceLevel,
    /// Reasons the score was lowered.
    pub issues: Vec<String>,
}

/// Scorer failure. Always non-fatal to the pipeline.
#[derive(Debug, Error)]
pub enum ScorerError {
    /// The scorer could not evaluate this pair.
    #[error("scoring failed: {0}")]
    Failed(String),
}

/// Injected confidence scorer. Must be pure and thread-safe.
pub trait ConfidenceScorer: Send + Sync {
    /// Score `translation` as a rendering of `source`.
    fn score(
        &self,
        source: &str,
        translation: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<ScoreReport, ScorerError>;
}

/// Gate outcome for one translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    /// Score at or above `auto_approve`.
    Approved,
    /// Between the thresholds; queued for a human.
    NeedsReview,
    /// Below `auto_reject`; the source text is served instead.
    Rejected,
}

/// Auto-approve / auto-reject thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    /// Scores at or above this are approved.
    pub auto_approve: f64,
    /// Scores below this are rejected.
    pub auto_reject: f64,
}

impl Thresholds {
    /// Thresholds from configuration.
    pub fn from_config(config: &ConfidenceConfig) -> Self {
        Self {
            auto_approve: config.auto_approve,
            auto_reject: config.auto_reject,
        }
    }

    /// Classify a score.
    pub fn decide(&self, score: f64) -> ReviewDecision {
        if score >= self.auto_approve {
            ReviewDecision::Approved
        } else if score < self.auto_reject {
            ReviewDecision::Rejected
        } else {
            ReviewDecision::NeedsReview
        }
    }
}

/// Cheap structural heuristics; a stand-in for a real quality model.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineScorer;

impl ConfidenceScorer for BaselineScorer {
    fn score(
        &self,
        source: &str,
        translation: &str,
        _metadata: &BTreeMap<String, String>,
    ) -> Result<ScoreReport, ScorerError> {
        let source = source.trim();
        let translation = translation.trim();
        let mut score: f64 = 1.0;
        let mut issues = Vec::new();

        if translation.is_empty() {
            return Ok(ScoreReport {
                score: 0.0,
                level: ConfidenceLevel::Low,
                issues: vec!["empty translation".to_string()],
            });
        }

        let source_chars = source.chars().count();
        if source_chars > 3 && source == translation {
            score -= 0.4;
            issues.push("translation identical to source".to_string());
        }

        if source_chars > 0 {
            let ratio = translation.chars().count() as f64 / source_chars as f64;
            if !(0.3..=3.0).contains(&ratio) && source_chars >= 10 {
                score -= 0.3;
                issues.push(format!("length ratio {ratio:.2}"));
            }
        }

        if translation.contains('\u{FFFD}') {
            score -= 0.3;
            issues.push("replacement character in output".to_string());
        }

        let score = score.clamp(0.0, 1.0);
        Ok(ScoreReport {
            score,
            level: ConfidenceLevel::from_score(score),
            issues,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(source: &str, translation: &str) -> ScoreReport {
        BaselineScorer
            .score(source, translation, &BTreeMap::new())
            .expect("test: baseline scorer is infallible")
    }

    #[test]
    fn test_plausible_translation_scores_high() {
        let report = score("Save your changes", "Änderungen speichern");
        assert_eq!(report.level, ConfidenceLevel::High);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_untranslated_output_is_penalised() {
        let report = score("Save your changes", "Save your changes");
        assert!(report.score < 0.9);
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn test_empty_translation_scores_zero() {
        let report = score("Save", "   ");
        assert_eq!(report.score, 0.0);
        assert_eq!(report.level, ConfidenceLevel::Low);
    }

    #[test]
    fn test_thresholds_classify_scores() {
        let t = Thresholds {
            auto_approve: 0.9,
            auto_reject: 0.3,
        };
        assert_eq!(t.decide(0.95), ReviewDecision::Approved);
        assert_eq!(t.decide(0.9), ReviewDecision::Approved);
        assert_eq!(t.decide(0.5), ReviewDecision::NeedsReview);
        assert_eq!(t.decide(0.3), ReviewDecision::NeedsReview);
        assert_eq!(t.decide(0.1), ReviewDecision::Rejected);
    }

    #[test]
    fn test_level_bands() {
        assert_eq!(ConfidenceLevel::from_score(0.8), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.79), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.2), ConfidenceLevel::Low);
    }
}
