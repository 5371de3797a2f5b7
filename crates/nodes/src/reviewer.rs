//! The Reviewer: automated validation plus an LLM review, scored and decided
//! by the quality policy.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use pipeline::{
    AgentId, ApprovalPolicy, CompletionRequest, CriterionScores, Executor, ExecutorError,
    LlmProvider, Message, MessageKind, PartialStateUpdate, PipelineConfig, QualityReport,
    QualityScorer, ReviewInput, State,
};

use crate::gateway::CallGateway;
use crate::json::extract_json;
use crate::prompts;
use crate::validation::ContentValidator;

/// Characters of research included in the review prompt.
const MAX_RESEARCH_IN_PROMPT: usize = 1_500;

/// The JSON object the model is asked to return. Criterion scores are 0–10.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct LlmReview {
    #[serde(default = "neutral")]
    factual_accuracy: f64,
    #[serde(default = "neutral")]
    completeness: f64,
    #[serde(default = "neutral")]
    clarity: f64,
    #[serde(default = "neutral")]
    engagement: f64,
    #[serde(default = "neutral")]
    citations: f64,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
}

fn neutral() -> f64 {
    5.0
}

impl LlmReview {
    /// Used when the model's answer cannot be parsed.
    fn fallback() -> Self {
        Self {
            factual_accuracy: 6.0,
            completeness: 6.0,
            clarity: 6.0,
            engagement: 6.0,
            citations: 6.0,
            strengths: vec!["Content was generated".into()],
            issues: vec!["Unable to perform detailed review".into()],
            recommendations: vec!["Manual review recommended".into()],
        }
    }

    fn criteria(&self) -> CriterionScores {
        CriterionScores::from_ten_point_scale(
            self.factual_accuracy,
            self.completeness,
            self.clarity,
            self.engagement,
            self.citations,
        )
    }
}

pub struct Reviewer {
    llm: Arc<dyn LlmProvider>,
    gateway: Arc<CallGateway>,
    validator: ContentValidator,
    scorer: QualityScorer,
    policy: ApprovalPolicy,
    max_reported_items: usize,
}

impl Reviewer {
    pub fn new(llm: Arc<dyn LlmProvider>, gateway: Arc<CallGateway>, config: &PipelineConfig) -> Self {
        Self {
            llm,
            gateway,
            validator: ContentValidator::new(&config.review),
            scorer: QualityScorer::new(config.weights.clone()),
            policy: config.approval.clone(),
            max_reported_items: config.review.max_reported_items,
        }
    }

    fn prompt(state: &State) -> String {
        let research: String = state
            .research_findings()
            .chars()
            .take(MAX_RESEARCH_IN_PROMPT)
            .collect();
        format!(
            "Review the following {} written for a {}.\n\n\
             CONTENT TO REVIEW:\n{}\n\n\
             ORIGINAL RESEARCH:\n{research}\n\n\
             Score each criterion from 0 to 10 and respond with JSON:\n\
             {{\"factual_accuracy\": 0-10, \"completeness\": 0-10, \"clarity\": 0-10, \
             \"engagement\": 0-10, \"citations\": 0-10, \
             \"strengths\": [\"...\"], \"issues\": [\"...\"], \"recommendations\": [\"...\"]}}",
            state.brief().content_type,
            state.brief().audience,
            state.content_draft(),
        )
    }
}

#[async_trait]
impl Executor for Reviewer {
    fn agent(&self) -> AgentId {
        AgentId::Reviewer
    }

    #[instrument(skip_all, fields(agent = "reviewer", iteration = state.iteration_count()))]
    async fn execute(&self, state: &State) -> Result<PartialStateUpdate, ExecutorError> {
        let draft = state.content_draft();
        let validation = self.validator.validate(draft, Some(state.research_findings()));

        let request = CompletionRequest::new(prompts::REVIEWER, Self::prompt(state)).with_temperature(0.2);
        let answer = self
            .gateway
            .call_weighted("llm.complete", request.estimated_tokens(), || self.llm.complete(&request))
            .await?;

        let mut update = PartialStateUpdate::new();
        let review = match extract_json::<LlmReview>(&answer) {
            Ok(review) => review,
            Err(err) => {
                warn!(error = %err, "Review response was not valid JSON; using neutral fallback review");
                update = update.with_warning(format!("Review response unparseable: {err}"));
                LlmReview::fallback()
            }
        };

        let criteria = review.criteria();
        let mut issues = validation.issues;
        issues.extend(review.issues);
        let mut recommendations = validation.suggestions;
        recommendations.extend(review.recommendations);

        let report = QualityReport::assess(
            ReviewInput {
                criteria,
                validation_score: validation.score,
                issues,
                recommendations,
                strengths: review.strengths,
            },
            &self.scorer,
            &self.policy,
            self.max_reported_items,
        );

        info!(
            overall = report.overall_score.as_f64(),
            validation = report.validation_score.as_f64(),
            final_score = report.final_score.as_f64(),
            issues = report.total_issues,
            decision = %report.decision,
            "Review scored"
        );

        let summary = format!(
            "Review complete: {} (score: {:.2})",
            report.decision,
            report.final_score.as_f64()
        );
        Ok(update
            .with_review(report.final_score, report.decision, report.render_feedback())
            .with_message(Message::new(AgentId::Reviewer, MessageKind::Feedback, summary)))
    }
}
