//! Run configuration.
//!
//! All tunables (iteration ceilings, approval thresholds, scoring weights,
//! limiter constants, retry budget) live in one explicit [`PipelineConfig`]
//! value that is passed into the components that need it. There is no
//! process-wide mutable configuration.
//!
//! Every field has a default, so a TOML file only needs to mention what it
//! overrides:
//!
//! ```toml
//! max_iterations = 10
//!
//! [approval]
//! high_score = 0.88
//!
//! [rate_limit]
//! capacity = 30
//! refill_per_second = 0.5
//! tokens_per_minute = 90000
//! max_concurrent = 3
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ApprovalPolicy, PipelineError, QualityWeights, RateLimitConfig};

/// Hard ceiling on review/revise cycles; `revision_count` never exceeds this.
pub const MAX_REVISIONS_CEILING: u32 = 3;

/// Top-level configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Maximum number of Controller decisions in one run.
    pub max_iterations: u32,
    /// Number of REVIEW→REVISE edges after which the run is forced to finish.
    pub max_revisions: u32,
    /// Thresholds used by the Reviewer to approve, revise or reject.
    pub approval: ApprovalPolicy,
    /// Weights of the five review criteria.
    pub weights: QualityWeights,
    /// Token bucket shared by all outbound calls.
    pub rate_limit: RateLimitConfig,
    /// Retry budget for external calls.
    pub retry: RetryConfig,
    /// Researcher settings.
    pub research: ResearchConfig,
    /// Reviewer settings.
    pub review: ReviewConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_revisions: MAX_REVISIONS_CEILING,
            approval: ApprovalPolicy::default(),
            weights: QualityWeights::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            research: ResearchConfig::default(),
            review: ReviewConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Checks every cross-field constraint.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConfigurationError`] describing the first
    /// violated constraint.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(1..=50).contains(&self.max_iterations) {
            return Err(PipelineError::config(format!(
                "max_iterations must be between 1 and 50, got {}",
                self.max_iterations
            )));
        }
        if !(1..=MAX_REVISIONS_CEILING).contains(&self.max_revisions) {
            return Err(PipelineError::config(format!(
                "max_revisions must be between 1 and {MAX_REVISIONS_CEILING}, got {}",
                self.max_revisions
            )));
        }
        self.approval.validate()?;
        self.weights.validate()?;
        self.rate_limit.validate()?;
        self.retry.validate()?;
        if self.research.max_results == 0 {
            return Err(PipelineError::config("research.max_results must be at least 1"));
        }
        if self.review.min_word_count >= self.review.max_word_count {
            return Err(PipelineError::config(
                "review.min_word_count must be below review.max_word_count",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------

/// Retry budget for a single external call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Back-off before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound for any single back-off, in milliseconds.
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive back-offs.
    pub backoff_multiplier: f64,
    /// How long one attempt may wait for a rate-limit token, in milliseconds.
    pub max_rate_limit_wait_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            max_rate_limit_wait_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Back-off before retry number `attempt` (0-based), capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Maximum wait for a rate-limit token.
    pub fn max_rate_limit_wait(&self) -> Duration {
        Duration::from_millis(self.max_rate_limit_wait_ms)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err(PipelineError::config("retry.backoff_multiplier must be >= 1.0"));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(PipelineError::config(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms",
            ));
        }
        Ok(())
    }
}

/// Researcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResearchConfig {
    /// Search results requested per query.
    pub max_results: usize,
    /// Distinct source URLs kept in the state.
    pub max_sources: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_results: 5,
            max_sources: 10,
        }
    }
}

/// Reviewer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReviewConfig {
    /// Issues, recommendations and strengths kept in a report.
    pub max_reported_items: usize,
    /// Drafts shorter than this are flagged by the validator.
    pub min_word_count: usize,
    /// Drafts longer than this are flagged by the validator.
    pub max_word_count: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            max_reported_items: 5,
            min_word_count: 100,
            max_word_count: 5000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_revision_ceiling_above_three() {
        let config = PipelineConfig {
            max_revisions: 4,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::ConfigurationError { .. })
        ));
    }

    #[test]
    fn rejects_zero_iterations() {
        let config = PipelineConfig {
            max_iterations: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let retry = RetryConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            backoff_multiplier: 3.0,
            ..RetryConfig::default()
        };
        assert_eq!(retry.backoff(0), Duration::from_millis(100));
        assert_eq!(retry.backoff(1), Duration::from_millis(300));
        assert_eq!(retry.backoff(2), Duration::from_millis(900));
        assert_eq!(retry.backoff(3), Duration::from_millis(1_000));
    }

    #[test]
    fn partial_json_uses_defaults_for_missing_fields() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"max_iterations": 7, "approval": {"high_score": 0.8}}"#)
                .unwrap();
        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.approval.high_score, 0.8);
        assert_eq!(config.approval.standard_score, 0.75);
        assert_eq!(config.max_revisions, 3);
    }
}
