//! The Controller: the routing state machine that picks the next executor.
//!
//! Each call to [`Controller::decide`] produces exactly one [`Decision`]. The
//! decision is computed in three stages:
//!
//! 1. **Hard termination.** FINISH when the iteration ceiling is reached, the
//!    revision ceiling is reached, or the last review approved the draft.
//! 2. **Early exit.** FINISH after a review scoring at least the early-exit
//!    score once at least one revision has happened.
//! 3. **Routing.** The canonical transition for the current phase (see
//!    [`canonical_transition`]). When a [`DecisionOracle`] is attached it is
//!    consulted first, but its answer only stands when it names the same
//!    executor as the canonical transition; anything else is corrected.
//!
//! The Controller never mutates [`State`]; the driver applies the returned
//! decision through [`State::apply_decision`].

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    AgentId, ApprovalPolicy, DecisionOracle, FinishReason, Message, MessageKind, NextAgent,
    Phase, PipelineConfig, ReviewDecision, State,
};

/// One Controller decision, ready to be applied to the state.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// The iteration this decision makes (`iteration_count + 1`).
    pub iteration: u32,
    /// The phase the run moves into.
    pub phase: Phase,
    /// Whether this decision takes the REVIEW→REVISE edge.
    pub revision_edge: bool,
    /// Set when `phase` is FINISH.
    pub finish_reason: Option<FinishReason>,
    /// The output recorded on termination.
    pub final_output: Option<String>,
    /// Whether the oracle's proposal was overridden.
    pub corrected: bool,
    /// The `decision` message appended to the log.
    pub message: Message,
}

impl Decision {
    /// The executor dispatched by this decision.
    pub fn next_agent(&self) -> NextAgent {
        self.phase.dispatch()
    }

    /// Whether this decision ends the run.
    pub fn is_finish(&self) -> bool {
        self.phase == Phase::Finish
    }
}

/// Result of [`canonical_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub phase: Phase,
    pub revision_edge: bool,
}

/// The deterministic transition out of the state's current phase, ignoring
/// the termination rules.
pub fn canonical_transition(state: &State) -> Transition {
    let to = |phase| Transition {
        phase,
        revision_edge: false,
    };
    match state.phase() {
        Phase::Init | Phase::Research => {
            if state.research_findings().trim().is_empty() {
                to(Phase::Research)
            } else {
                to(Phase::Create)
            }
        }
        Phase::Create => {
            if state.content_draft().trim().is_empty() {
                to(Phase::Create)
            } else {
                to(Phase::Review)
            }
        }
        Phase::Review => match state.review_decision() {
            ReviewDecision::RequestRevision if !state.has_unreviewed_draft() => Transition {
                phase: Phase::Revise,
                revision_edge: true,
            },
            ReviewDecision::Reject | ReviewDecision::Approve => to(Phase::Finish),
            ReviewDecision::RequestRevision | ReviewDecision::Pending => to(Phase::Review),
        },
        Phase::Revise => {
            if state.has_unreviewed_draft() {
                to(Phase::Review)
            } else {
                to(Phase::Revise)
            }
        }
        Phase::Finish => to(Phase::Finish),
    }
}

/// The routing state machine.
pub struct Controller {
    oracle: Option<Arc<dyn DecisionOracle>>,
    max_iterations: u32,
    max_revisions: u32,
    approval: ApprovalPolicy,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("oracle", &self.oracle.is_some())
            .field("max_iterations", &self.max_iterations)
            .field("max_revisions", &self.max_revisions)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a deterministic Controller (no oracle).
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            oracle: None,
            max_iterations: config.max_iterations,
            max_revisions: config.max_revisions,
            approval: config.approval.clone(),
        }
    }

    /// Attaches a decision oracle.
    #[must_use]
    pub fn with_oracle(mut self, oracle: Arc<dyn DecisionOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Computes the next decision for `state`.
    ///
    /// Never fails: oracle errors and malformed oracle output fall back to the
    /// canonical transition.
    pub async fn decide(&self, state: &State) -> Decision {
        let iteration = state.iteration_count() + 1;

        if let Some(reason) = self.termination(state, iteration) {
            return self.finish(state, iteration, reason);
        }

        let transition = canonical_transition(state);
        if transition.phase == Phase::Finish {
            let reason = match state.review_decision() {
                ReviewDecision::Reject => FinishReason::Rejected,
                _ => FinishReason::Approved,
            };
            return self.finish(state, iteration, reason);
        }

        let (corrected, note) = match &self.oracle {
            Some(oracle) => self.consult(oracle.as_ref(), state, transition).await,
            None => (false, String::new()),
        };

        debug!(
            iteration,
            from = %state.phase(),
            to = %transition.phase,
            corrected,
            "Routing decision"
        );

        let content = format!(
            "Iteration {iteration}: {} -> {} (next: {}){note}",
            state.phase(),
            transition.phase,
            transition.phase.dispatch(),
        );
        Decision {
            iteration,
            phase: transition.phase,
            revision_edge: transition.revision_edge,
            finish_reason: None,
            final_output: None,
            corrected,
            message: Message::new(AgentId::Supervisor, MessageKind::Decision, content),
        }
    }

    fn termination(&self, state: &State, iteration: u32) -> Option<FinishReason> {
        if state.review_decision() == ReviewDecision::Reject {
            return Some(FinishReason::Rejected);
        }
        if iteration >= self.max_iterations {
            return Some(FinishReason::IterationLimit);
        }
        if state.review_decision() == ReviewDecision::Approve {
            return Some(FinishReason::Approved);
        }
        if state.revision_count() >= self.max_revisions {
            return Some(FinishReason::RevisionLimit);
        }
        if state.phase() == Phase::Review
            && state.review_decision() != ReviewDecision::Pending
            && !state.has_unreviewed_draft()
            && self
                .approval
                .is_early_exit(state.review_score(), state.revision_count())
        {
            return Some(FinishReason::EarlyExit);
        }
        None
    }

    async fn consult(
        &self,
        oracle: &dyn DecisionOracle,
        state: &State,
        transition: Transition,
    ) -> (bool, String) {
        let expected = transition.phase.dispatch();
        let context = format!(
            "{}\n\nSuggested next step: {}",
            state.summary(self.max_iterations),
            expected
        );

        let answer = match oracle.decide(&context).await {
            Ok(answer) => answer,
            Err(err) => {
                warn!(error = %err, fallback = %expected, "Decision oracle failed; using deterministic routing");
                return (true, format!(" [oracle failed: {err}]"));
            }
        };

        match NextAgent::from_oracle_name(&answer) {
            Some(proposed) if proposed == expected => (false, String::new()),
            Some(proposed) => {
                warn!(%proposed, %expected, "Oracle proposed an invalid transition; corrected");
                (true, format!(" [oracle proposed '{proposed}'; corrected]"))
            }
            None => {
                warn!(answer = %answer, %expected, "Oracle returned an unknown agent; corrected");
                (true, format!(" [oracle returned unknown agent '{}'; corrected]", answer.trim()))
            }
        }
    }

    fn finish(
        &self,
        state: &State,
        iteration: u32,
        reason: FinishReason,
    ) -> Decision {
        let final_output = (reason.yields_output() && !state.content_draft().is_empty())
            .then(|| state.content_draft().to_string());
        let content = format!(
            "Iteration {iteration}: {} -> FINISH ({reason:?}, score {:.2}, revisions {})",
            state.phase(),
            state.review_score().as_f64(),
            state.revision_count(),
        );
        Decision {
            iteration,
            phase: Phase::Finish,
            revision_edge: false,
            finish_reason: Some(reason),
            final_output,
            corrected: false,
            message: Message::new(AgentId::Supervisor, MessageKind::Decision, content),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::{ContentBrief, PartialStateUpdate, ProviderError, Score};

    /// Always answers with the same agent name.
    struct FixedOracle(&'static str);

    #[async_trait]
    impl DecisionOracle for FixedOracle {
        async fn decide(&self, _context: &str) -> Result<String, ProviderError> {
            Ok(self.0.to_string())
        }
    }

    /// Cycles through a list of answers, including garbage and failures.
    struct ChaosOracle {
        answers: Vec<Option<&'static str>>,
        next: Mutex<usize>,
    }

    #[async_trait]
    impl DecisionOracle for ChaosOracle {
        async fn decide(&self, _context: &str) -> Result<String, ProviderError> {
            let mut next = self.next.lock();
            let answer = self.answers[*next % self.answers.len()];
            *next += 1;
            answer.map(String::from).ok_or(ProviderError::Timeout {
                message: "oracle".into(),
            })
        }
    }

    fn controller() -> Controller {
        Controller::new(&PipelineConfig::default())
    }

    fn new_state() -> State {
        State::new("Explain transformers", ContentBrief::default())
    }

    async fn step(controller: &Controller, state: &mut State) -> Decision {
        let decision = controller.decide(state).await;
        state.apply_decision(decision.clone()).unwrap();
        decision
    }

    fn review(score: f64, decision: ReviewDecision) -> PartialStateUpdate {
        PartialStateUpdate::new().with_review(Score::new(score).unwrap(), decision, "feedback")
    }

    #[tokio::test]
    async fn approves_first_draft_without_revision() {
        let c = controller();
        let mut s = new_state();

        assert_eq!(step(&c, &mut s).await.next_agent(), NextAgent::Researcher);
        s.merge(PartialStateUpdate::new().with_research("findings", vec![]));
        assert_eq!(step(&c, &mut s).await.next_agent(), NextAgent::ContentCreator);
        s.merge(PartialStateUpdate::new().with_draft("draft body"));
        assert_eq!(step(&c, &mut s).await.next_agent(), NextAgent::Reviewer);
        s.merge(review(0.93, ReviewDecision::Approve));

        let last = step(&c, &mut s).await;
        assert!(last.is_finish());
        assert_eq!(s.finish_reason(), Some(FinishReason::Approved));
        assert_eq!(s.revision_count(), 0);
        assert_eq!(s.iteration_count(), 4);
        assert_eq!(s.final_output(), Some("draft body"));
    }

    #[tokio::test]
    async fn revision_edge_increments_revision_count() {
        let c = controller();
        let mut s = new_state();
        step(&c, &mut s).await;
        s.merge(PartialStateUpdate::new().with_research("f", vec![]));
        step(&c, &mut s).await;
        s.merge(PartialStateUpdate::new().with_draft("v1"));
        step(&c, &mut s).await;
        s.merge(review(0.6, ReviewDecision::RequestRevision));

        let d = step(&c, &mut s).await;
        assert_eq!(d.phase, Phase::Revise);
        assert!(d.revision_edge);
        assert_eq!(s.revision_count(), 1);

        // Revise stays put until a new draft arrives.
        assert_eq!(step(&c, &mut s).await.phase, Phase::Revise);
        s.merge(PartialStateUpdate::new().with_draft("v2"));
        assert_eq!(step(&c, &mut s).await.phase, Phase::Review);
        assert_eq!(s.revision_count(), 1);
    }

    #[tokio::test]
    async fn early_exit_after_one_revision() {
        let c = controller();
        let mut s = new_state();
        s.phase = Phase::Review;
        s.content_draft = "v2".into();
        s.content_version = 2;
        s.reviewed_version = 2;
        s.revision_count = 1;
        s.review_score = Score::new(0.93).unwrap();
        s.review_decision = ReviewDecision::RequestRevision;

        let d = c.decide(&s).await;
        assert_eq!(d.finish_reason, Some(FinishReason::EarlyExit));
        assert_eq!(d.final_output.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn no_early_exit_before_any_revision() {
        let c = controller();
        let mut s = new_state();
        s.phase = Phase::Review;
        s.content_draft = "v1".into();
        s.content_version = 1;
        s.reviewed_version = 1;
        s.review_score = Score::new(0.95).unwrap();
        s.review_decision = ReviewDecision::RequestRevision;

        let d = c.decide(&s).await;
        assert_eq!(d.phase, Phase::Revise);
    }

    #[tokio::test]
    async fn rejection_finishes_without_output() {
        let c = controller();
        let mut s = new_state();
        s.phase = Phase::Review;
        s.content_draft = "v1".into();
        s.content_version = 1;
        s.reviewed_version = 1;
        s.review_decision = ReviewDecision::Reject;

        let d = c.decide(&s).await;
        assert_eq!(d.finish_reason, Some(FinishReason::Rejected));
        assert!(d.final_output.is_none());
    }

    #[tokio::test]
    async fn revision_ceiling_forces_finish() {
        let c = controller();
        let mut s = new_state();
        s.phase = Phase::Revise;
        s.content_draft = "v3".into();
        s.revision_count = 3;

        let d = c.decide(&s).await;
        assert_eq!(d.finish_reason, Some(FinishReason::RevisionLimit));
    }

    #[tokio::test]
    async fn iteration_ceiling_forces_finish() {
        let config = PipelineConfig {
            max_iterations: 3,
            ..PipelineConfig::default()
        };
        let c = Controller::new(&config);
        let mut s = new_state();
        step(&c, &mut s).await;
        step(&c, &mut s).await;
        let d = step(&c, &mut s).await;
        assert_eq!(d.finish_reason, Some(FinishReason::IterationLimit));
        assert_eq!(s.iteration_count(), 3);
    }

    #[tokio::test]
    async fn oracle_cannot_skip_research() {
        let c = controller().with_oracle(Arc::new(FixedOracle("reviewer")));
        let s = new_state();
        let d = c.decide(&s).await;
        assert_eq!(d.next_agent(), NextAgent::Researcher);
        assert!(d.corrected);
        assert!(d.message.content().contains("corrected"));
    }

    #[tokio::test]
    async fn agreeing_oracle_is_not_corrected() {
        let c = controller().with_oracle(Arc::new(FixedOracle("Researcher")));
        let d = c.decide(&new_state()).await;
        assert_eq!(d.next_agent(), NextAgent::Researcher);
        assert!(!d.corrected);
    }

    #[tokio::test]
    async fn unknown_oracle_answer_falls_back() {
        let c = controller().with_oracle(Arc::new(FixedOracle("publisher")));
        let d = c.decide(&new_state()).await;
        assert_eq!(d.next_agent(), NextAgent::Researcher);
        assert!(d.corrected);
    }

    #[tokio::test]
    async fn always_finishes_within_max_iterations_under_a_chaotic_oracle() {
        let oracle = Arc::new(ChaosOracle {
            answers: vec![Some("finish"), None, Some("???"), Some("reviewer"), Some("researcher")],
            next: Mutex::new(0),
        });
        for max_iterations in [1, 2, 5, 15] {
            let config = PipelineConfig {
                max_iterations,
                ..PipelineConfig::default()
            };
            let c = Controller::new(&config).with_oracle(oracle.clone());
            let mut s = new_state();
            let mut decisions = 0;
            loop {
                let d = step(&c, &mut s).await;
                decisions += 1;
                assert!(s.revision_count() <= 3);
                if d.is_finish() {
                    break;
                }
                // Executors that never make progress: the ceiling must still hold.
                s.merge(PartialStateUpdate::new().with_warning("no progress"));
            }
            assert!(decisions <= max_iterations);
            assert!(s.iteration_count() <= max_iterations);
        }
    }

    #[tokio::test]
    async fn endless_revision_requests_stop_at_the_ceiling() {
        let c = controller();
        let mut s = new_state();
        loop {
            let d = step(&c, &mut s).await;
            match d.next_agent() {
                NextAgent::Researcher => s.merge(PartialStateUpdate::new().with_research("f", vec![])),
                NextAgent::ContentCreator => s.merge(PartialStateUpdate::new().with_draft("draft")),
                NextAgent::Reviewer => s.merge(review(0.5, ReviewDecision::RequestRevision)),
                NextAgent::Finish => break,
            }
        }
        assert_eq!(s.finish_reason(), Some(FinishReason::RevisionLimit));
        assert_eq!(s.revision_count(), 3);
        assert!(s.iteration_count() <= 15);
    }
}
