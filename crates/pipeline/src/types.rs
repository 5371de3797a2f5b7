//! Shared value types for the AgentFlow domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. scores are in `[0.0, 1.0]`) and
//! participate in domain computations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Score types
// ---------------------------------------------------------------------------

/// A normalised quality score in the range `[0.0, 1.0]`.
///
/// Used for per-criterion review scores, the automated validation score and
/// the blended final score. Deserialisation rejects out-of-range values so a
/// checkpoint can never smuggle an invalid score back into a run.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Score(f64);

impl Score {
    /// The lowest possible score.
    pub const ZERO: Score = Score(0.0);

    /// The highest possible score.
    pub const MAX: Score = Score(1.0);

    /// Creates a [`Score`], returning `None` if `value` is outside the valid
    /// range `[0.0, 1.0]` or not finite.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Creates a [`Score`], clamping `value` into `[0.0, 1.0]`.
    ///
    /// NaN maps to zero.
    pub fn saturating(value: f64) -> Self {
        if value.is_nan() {
            Self::ZERO
        } else {
            Self(value.clamp(0.0, 1.0))
        }
    }

    /// Returns the score as an `f64` in `[0.0, 1.0]`.
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl Default for Score {
    fn default() -> Self {
        Self::ZERO
    }
}

impl TryFrom<f64> for Score {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Score::new(value).ok_or_else(|| format!("score {value} is outside [0.0, 1.0]"))
    }
}

impl From<Score> for f64 {
    fn from(score: Score) -> Self {
        score.0
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Run brief
// ---------------------------------------------------------------------------

/// The kind of written artefact the pipeline produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// An informal blog post (the default).
    #[default]
    BlogPost,
    /// A longer-form article.
    Article,
    /// A structured report.
    Report,
    /// A short summary.
    Summary,
}

impl ContentType {
    /// Human-readable label used in prompts and reports.
    pub fn label(self) -> &'static str {
        match self {
            Self::BlogPost => "blog post",
            Self::Article => "article",
            Self::Report => "report",
            Self::Summary => "summary",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Immutable context supplied with the task at run start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBrief {
    /// What kind of content to produce.
    pub content_type: ContentType,
    /// Who the content is written for.
    pub audience: String,
}

impl Default for ContentBrief {
    fn default() -> Self {
        Self {
            content_type: ContentType::default(),
            audience: "general audience".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
