//! Quality scoring and the approval policy.
//!
//! The Reviewer produces five criterion scores plus an automated validation
//! score. [`QualityScorer`] folds them into a single final score:
//!
//! ```text
//! overall = 0.35*accuracy + 0.25*completeness + 0.20*clarity
//!         + 0.15*engagement + 0.05*citations
//! final   = 0.7*overall + 0.3*validation
//! if overall >= 0.85: final = min(final + 0.05, 1.0)
//! ```
//!
//! [`ApprovalPolicy`] then turns the final score and the issue list into a
//! [`ReviewDecision`]. [`QualityReport::assess`] chains both and never fails:
//! invalid scorer input becomes a synthetic low score asking for revision.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{PipelineError, Score};

/// Final score substituted when the scorer rejects its input.
pub const SYNTHETIC_LOW_SCORE: Score = Score::ZERO;

// ---------------------------------------------------------------------------
// Review decision
// ---------------------------------------------------------------------------

/// Outcome of the most recent review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    /// No review has happened yet.
    #[default]
    Pending,
    /// The draft is good enough to publish.
    Approve,
    /// The draft needs another pass.
    RequestRevision,
    /// The draft has a critical flaw; the run ends without output.
    Reject,
}

impl std::fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Approve => "APPROVE",
            Self::RequestRevision => "REQUEST_REVISION",
            Self::Reject => "REJECT",
        })
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// Raw per-criterion scores as reported by the reviewer, each expected in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriterionScores {
    /// Claims are supported by the research.
    pub factual_accuracy: f64,
    /// All key points are covered.
    pub completeness: f64,
    /// Structure and readability.
    pub clarity: f64,
    /// Compelling, professional tone.
    pub engagement: f64,
    /// Proper attribution.
    pub citations: f64,
}

impl CriterionScores {
    /// Builds criterion scores from a 0–10 rating scale.
    pub fn from_ten_point_scale(
        factual_accuracy: f64,
        completeness: f64,
        clarity: f64,
        engagement: f64,
        citations: f64,
    ) -> Self {
        Self {
            factual_accuracy: factual_accuracy / 10.0,
            completeness: completeness / 10.0,
            clarity: clarity / 10.0,
            engagement: engagement / 10.0,
            citations: citations / 10.0,
        }
    }

    /// Criterion names paired with their values, in reporting order.
    pub fn entries(&self) -> [(&'static str, f64); 5] {
        [
            ("factual_accuracy", self.factual_accuracy),
            ("completeness", self.completeness),
            ("clarity", self.clarity),
            ("engagement", self.engagement),
            ("citations", self.citations),
        ]
    }
}

/// Weights and blend constants of the scoring function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QualityWeights {
    pub factual_accuracy: f64,
    pub completeness: f64,
    pub clarity: f64,
    pub engagement: f64,
    pub citations: f64,
    /// Share of the validation score in the final blend.
    pub validation_share: f64,
    /// Overall score at which the excellence bonus applies.
    pub bonus_threshold: f64,
    /// Bonus added to the final score for excellent content.
    pub bonus: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            factual_accuracy: 0.35,
            completeness: 0.25,
            clarity: 0.20,
            engagement: 0.15,
            citations: 0.05,
            validation_share: 0.3,
            bonus_threshold: 0.85,
            bonus: 0.05,
        }
    }
}

impl QualityWeights {
    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        let criteria = [
            self.factual_accuracy,
            self.completeness,
            self.clarity,
            self.engagement,
            self.citations,
        ];
        if criteria.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(PipelineError::config("weights must be non-negative"));
        }
        let sum: f64 = criteria.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(PipelineError::config(format!(
                "criterion weights must sum to 1.0, got {sum}"
            )));
        }
        for (name, value) in [
            ("validation_share", self.validation_share),
            ("bonus_threshold", self.bonus_threshold),
            ("bonus", self.bonus),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::config(format!(
                    "weights.{name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Result of scoring one review.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Weighted criterion average.
    pub overall: Score,
    /// The validation score that was blended in.
    pub validation: Score,
    /// Blended score (with bonus, if earned).
    pub final_score: Score,
    /// Whether the excellence bonus was applied.
    pub bonus_applied: bool,
}

/// Pure, deterministic scoring function.
#[derive(Debug, Clone, Default)]
pub struct QualityScorer {
    weights: QualityWeights,
}

impl QualityScorer {
    /// Creates a scorer with the given weights.
    pub fn new(weights: QualityWeights) -> Self {
        Self { weights }
    }

    /// Combines criterion scores and the validation score.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidScoreInput`] if any input is outside `[0, 1]`
    /// or not finite.
    pub fn score(
        &self,
        criteria: &CriterionScores,
        validation_score: f64,
    ) -> Result<ScoreBreakdown, PipelineError> {
        for (criterion, value) in criteria
            .entries()
            .into_iter()
            .chain(std::iter::once(("validation_score", validation_score)))
        {
            if Score::new(value).is_none() {
                return Err(PipelineError::InvalidScoreInput {
                    criterion: criterion.to_string(),
                    value,
                });
            }
        }

        let w = &self.weights;
        let overall = w.factual_accuracy * criteria.factual_accuracy
            + w.completeness * criteria.completeness
            + w.clarity * criteria.clarity
            + w.engagement * criteria.engagement
            + w.citations * criteria.citations;
        let mut final_score =
            (1.0 - w.validation_share) * overall + w.validation_share * validation_score;
        let bonus_applied = overall >= w.bonus_threshold;
        if bonus_applied {
            final_score = (final_score + w.bonus).min(1.0);
        }

        Ok(ScoreBreakdown {
            overall: Score::saturating(overall),
            validation: Score::saturating(validation_score),
            final_score: Score::saturating(final_score),
            bonus_applied,
        })
    }
}

// ---------------------------------------------------------------------------
// Approval policy
// ---------------------------------------------------------------------------

/// Thresholds that turn a final score and an issue list into a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApprovalPolicy {
    /// Score for the high tier.
    pub high_score: f64,
    /// Issues tolerated in the high tier.
    pub high_max_issues: usize,
    /// Score for the standard tier.
    pub standard_score: f64,
    /// Issues tolerated in the standard tier.
    pub standard_max_issues: usize,
    /// Score at which the Controller stops after at least one revision.
    pub early_exit_score: f64,
    /// Revisions required before early exit applies.
    pub early_exit_min_revisions: u32,
    /// Case-insensitive phrases that reject a draft outright when they
    /// appear in any issue.
    pub critical_keywords: Vec<String>,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            high_score: 0.90,
            high_max_issues: 3,
            standard_score: 0.75,
            standard_max_issues: 2,
            early_exit_score: 0.92,
            early_exit_min_revisions: 1,
            critical_keywords: [
                "plagiarism",
                "fabricated",
                "completely false",
                "dangerous misinformation",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl ApprovalPolicy {
    /// Decides on a reviewed draft.
    ///
    /// `issues` must be the complete issue list, not a truncated report.
    pub fn decide(&self, final_score: Score, issues: &[String]) -> ReviewDecision {
        let critical = issues.iter().any(|issue| {
            let lower = issue.to_lowercase();
            self.critical_keywords
                .iter()
                .any(|kw| lower.contains(&kw.to_lowercase()))
        });
        if critical {
            return ReviewDecision::Reject;
        }

        let score = final_score.as_f64();
        let count = issues.len();
        if (score >= self.high_score && count <= self.high_max_issues)
            || (score >= self.standard_score && count <= self.standard_max_issues)
        {
            ReviewDecision::Approve
        } else {
            ReviewDecision::RequestRevision
        }
    }

    /// Returns `true` if a review score this high after `revision_count`
    /// revisions ends the run regardless of the approval test.
    pub fn is_early_exit(&self, review_score: Score, revision_count: u32) -> bool {
        review_score.as_f64() >= self.early_exit_score
            && revision_count >= self.early_exit_min_revisions
    }

    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        for (name, value) in [
            ("high_score", self.high_score),
            ("standard_score", self.standard_score),
            ("early_exit_score", self.early_exit_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::config(format!(
                    "approval.{name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Quality report
// ---------------------------------------------------------------------------

/// Everything the Reviewer gathered before scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewInput {
    pub criteria: CriterionScores,
    pub validation_score: f64,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub strengths: Vec<String>,
}

/// Scored and decided review of one draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub criteria: CriterionScores,
    /// Reported issues (truncated to the configured maximum).
    pub issues: Vec<String>,
    /// Total number of issues found, including those not reported.
    pub total_issues: usize,
    pub recommendations: Vec<String>,
    pub strengths: Vec<String>,
    pub overall_score: Score,
    pub validation_score: Score,
    pub final_score: Score,
    pub decision: ReviewDecision,
}

impl QualityReport {
    /// Scores `input` and applies `policy`.
    ///
    /// Invalid scorer input yields [`SYNTHETIC_LOW_SCORE`] and
    /// [`ReviewDecision::RequestRevision`] with an explanatory first issue.
    pub fn assess(
        input: ReviewInput,
        scorer: &QualityScorer,
        policy: &ApprovalPolicy,
        max_reported_items: usize,
    ) -> Self {
        let ReviewInput {
            criteria,
            validation_score,
            mut issues,
            mut recommendations,
            mut strengths,
        } = input;

        let (overall, validation, final_score, decision) =
            match scorer.score(&criteria, validation_score) {
                Ok(breakdown) => (
                    breakdown.overall,
                    breakdown.validation,
                    breakdown.final_score,
                    policy.decide(breakdown.final_score, &issues),
                ),
                Err(err) => {
                    warn!(error = %err, "Review scores rejected; substituting a low score");
                    issues.insert(0, format!("Review scores were unusable ({err})"));
                    (
                        Score::ZERO,
                        Score::saturating(validation_score),
                        SYNTHETIC_LOW_SCORE,
                        ReviewDecision::RequestRevision,
                    )
                }
            };

        let total_issues = issues.len();
        issues.truncate(max_reported_items);
        recommendations.truncate(max_reported_items);
        strengths.truncate(max_reported_items);

        Self {
            criteria,
            issues,
            total_issues,
            recommendations,
            strengths,
            overall_score: overall,
            validation_score: validation,
            final_score,
            decision,
        }
    }

    /// Renders the report as reviewer feedback for the content creator.
    pub fn render_feedback(&self) -> String {
        let mut out = format!(
            "=== CONTENT REVIEW ===\nOverall Score: {:.2}/1.0\nDecision: {}\n\nCriterion Scores:\n",
            self.final_score.as_f64(),
            self.decision
        );
        for (name, value) in self.criteria.entries() {
            out.push_str(&format!("  - {}: {:.2}\n", title_case(name), value));
        }
        for (heading, items) in [
            ("Strengths", &self.strengths),
            ("Issues to Address", &self.issues),
            ("Recommendations", &self.recommendations),
        ] {
            if items.is_empty() {
                continue;
            }
            out.push_str(&format!("\n{heading}:\n"));
            for item in items {
                out.push_str(&format!("  - {item}\n"));
            }
        }
        out
    }
}

fn title_case(snake: &str) -> String {
    snake
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
