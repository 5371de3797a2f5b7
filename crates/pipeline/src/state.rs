//! The shared run state and its merge rules.
//!
//! [`State`] is the single authoritative record of one run. It is changed in
//! exactly two ways:
//!
//! - [`State::merge`] folds an executor's [`PartialStateUpdate`] into it
//!   (last-write-wins for scalars, append for `messages`/`warnings`);
//! - [`State::apply_decision`] records a Controller [`Decision`], which is the
//!   only path that advances `iteration_count` and `revision_count`.
//!
//! The per-field rules are listed in [`FIELD_POLICIES`].

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::MAX_REVISIONS_CEILING;
use crate::{ContentBrief, Decision, PipelineError, ReviewDecision, Score, Timestamp};

// ---------------------------------------------------------------------------
// Agents and phases
// ---------------------------------------------------------------------------

/// Identity of a message sender or executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    /// The Controller.
    Supervisor,
    Researcher,
    ContentCreator,
    Reviewer,
}

impl AgentId {
    /// Snake-case name, as used in logs and oracle prompts.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Supervisor => "supervisor",
            Self::Researcher => "researcher",
            Self::ContentCreator => "content_creator",
            Self::Reviewer => "reviewer",
        }
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The executor chosen by the last decision, or the end of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAgent {
    Researcher,
    ContentCreator,
    Reviewer,
    Finish,
}

impl NextAgent {
    /// The executor to dispatch, or `None` for [`NextAgent::Finish`].
    pub fn agent(self) -> Option<AgentId> {
        match self {
            Self::Researcher => Some(AgentId::Researcher),
            Self::ContentCreator => Some(AgentId::ContentCreator),
            Self::Reviewer => Some(AgentId::Reviewer),
            Self::Finish => None,
        }
    }

    /// Parses an agent name as returned by a decision oracle.
    ///
    /// Matching is case-insensitive and tolerates surrounding quotes,
    /// whitespace and a few common aliases. Unknown names yield `None`.
    pub fn from_oracle_name(name: &str) -> Option<Self> {
        let cleaned = name
            .trim()
            .trim_matches(|c| c == '"' || c == '\'' || c == '`')
            .trim()
            .to_ascii_lowercase()
            .replace(['-', ' '], "_");
        match cleaned.as_str() {
            "researcher" | "research" => Some(Self::Researcher),
            "content_creator" | "creator" | "writer" => Some(Self::ContentCreator),
            "reviewer" | "review" => Some(Self::Reviewer),
            "finish" | "end" | "done" | "human_review" => Some(Self::Finish),
            _ => None,
        }
    }
}

impl std::fmt::Display for NextAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.agent() {
            Some(agent) => f.write_str(agent.as_str()),
            None => f.write_str("finish"),
        }
    }
}

/// Routing phase of the Controller's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Before the first decision. Never a destination.
    #[default]
    Init,
    Research,
    Create,
    Review,
    Revise,
    Finish,
}

impl Phase {
    /// The executor that runs while in this phase.
    pub fn dispatch(self) -> NextAgent {
        match self {
            Self::Init | Self::Research => NextAgent::Researcher,
            Self::Create | Self::Revise => NextAgent::ContentCreator,
            Self::Review => NextAgent::Reviewer,
            Self::Finish => NextAgent::Finish,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Init => "INIT",
            Self::Research => "RESEARCH",
            Self::Create => "CREATE",
            Self::Review => "REVIEW",
            Self::Revise => "REVISE",
            Self::Finish => "FINISH",
        })
    }
}

/// Why a run reached FINISH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The reviewer approved the draft.
    Approved,
    /// A high score after at least one revision.
    EarlyExit,
    /// The decision ceiling was reached.
    IterationLimit,
    /// The revision ceiling was reached.
    RevisionLimit,
    /// The reviewer rejected the draft; there is no output.
    Rejected,
}

impl FinishReason {
    /// Whether this ending produces a final output (when a draft exists).
    pub fn yields_output(self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Kind of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Info,
    Decision,
    Feedback,
}

/// One immutable entry in the run's message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    sender: AgentId,
    content: String,
    timestamp: Timestamp,
    kind: MessageKind,
}

impl Message {
    /// Creates a message stamped with the current time.
    pub fn new(sender: AgentId, kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            sender,
            content: content.into(),
            timestamp: Timestamp::now(),
            kind,
        }
    }

    pub fn sender(&self) -> AgentId {
        self.sender
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }
}

// ---------------------------------------------------------------------------
// Merge policy table
// ---------------------------------------------------------------------------

/// How a field combines with incoming writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Set at creation, never written again.
    Immutable,
    /// The newest write replaces the old value.
    LastWriteWins,
    /// New values are appended in arrival order.
    Append,
    /// Written only by [`State::apply_decision`].
    ControllerOnly,
}

/// Merge policy of every [`State`] field.
pub const FIELD_POLICIES: &[(&str, MergePolicy)] = &[
    ("task", MergePolicy::Immutable),
    ("brief", MergePolicy::Immutable),
    ("research_findings", MergePolicy::LastWriteWins),
    ("research_sources", MergePolicy::LastWriteWins),
    ("content_draft", MergePolicy::LastWriteWins),
    ("review_score", MergePolicy::LastWriteWins),
    ("review_feedback", MergePolicy::LastWriteWins),
    ("review_decision", MergePolicy::LastWriteWins),
    ("messages", MergePolicy::Append),
    ("warnings", MergePolicy::Append),
    ("content_version", MergePolicy::ControllerOnly),
    ("reviewed_version", MergePolicy::ControllerOnly),
    ("iteration_count", MergePolicy::ControllerOnly),
    ("revision_count", MergePolicy::ControllerOnly),
    ("phase", MergePolicy::ControllerOnly),
    ("next_agent", MergePolicy::ControllerOnly),
    ("finish_reason", MergePolicy::ControllerOnly),
    ("final_output", MergePolicy::ControllerOnly),
];

/// Looks up the merge policy of a field by name.
pub fn field_policy(field: &str) -> Option<MergePolicy> {
    FIELD_POLICIES
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, policy)| *policy)
}

/// Writes `value` into `slot` if the field is last-write-wins. Returns
/// whether a write happened.
fn merge_scalar<T>(field: &'static str, slot: &mut T, value: Option<T>) -> bool {
    let Some(value) = value else {
        return false;
    };
    match field_policy(field) {
        Some(MergePolicy::LastWriteWins) => {
            *slot = value;
            true
        }
        policy => {
            warn!(field, ?policy, "Dropping executor write to a field it may not change");
            false
        }
    }
}

fn merge_list<T>(field: &'static str, slot: &mut Vec<T>, values: Vec<T>) {
    if values.is_empty() {
        return;
    }
    match field_policy(field) {
        Some(MergePolicy::Append) => slot.extend(values),
        Some(MergePolicy::LastWriteWins) => *slot = values,
        policy => warn!(field, ?policy, "Dropping executor write to a field it may not change"),
    }
}

// ---------------------------------------------------------------------------
// Partial updates
// ---------------------------------------------------------------------------

/// The fields one executor step wrote.
///
/// There are no counter fields here: executors cannot advance
/// `iteration_count` or `revision_count`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialStateUpdate {
    pub research_findings: Option<String>,
    pub research_sources: Option<Vec<String>>,
    pub content_draft: Option<String>,
    pub review_score: Option<Score>,
    pub review_feedback: Option<String>,
    pub review_decision: Option<ReviewDecision>,
    pub messages: Vec<Message>,
    pub warnings: Vec<String>,
}

impl PartialStateUpdate {
    /// An update that writes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_research(mut self, findings: impl Into<String>, sources: Vec<String>) -> Self {
        self.research_findings = Some(findings.into());
        self.research_sources = Some(sources);
        self
    }

    #[must_use]
    pub fn with_draft(mut self, draft: impl Into<String>) -> Self {
        self.content_draft = Some(draft.into());
        self
    }

    #[must_use]
    pub fn with_review(
        mut self,
        score: Score,
        decision: ReviewDecision,
        feedback: impl Into<String>,
    ) -> Self {
        self.review_score = Some(score);
        self.review_decision = Some(decision);
        self.review_feedback = Some(feedback.into());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Folds `other` (which arrived later) into `self`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ConflictingWrite`] if both updates write the same
    /// scalar field.
    pub fn combine(self, other: Self) -> Result<Self, PipelineError> {
        fn pick<T>(a: Option<T>, b: Option<T>, field: &'static str) -> Result<Option<T>, PipelineError> {
            match (a, b) {
                (Some(_), Some(_)) if field_policy(field) == Some(MergePolicy::LastWriteWins) => {
                    Err(PipelineError::ConflictingWrite { field })
                }
                (a, b) => Ok(b.or(a)),
            }
        }

        let mut messages = self.messages;
        merge_list("messages", &mut messages, other.messages);
        let mut warnings = self.warnings;
        merge_list("warnings", &mut warnings, other.warnings);

        Ok(Self {
            research_findings: pick(self.research_findings, other.research_findings, "research_findings")?,
            research_sources: pick(self.research_sources, other.research_sources, "research_sources")?,
            content_draft: pick(self.content_draft, other.content_draft, "content_draft")?,
            review_score: pick(self.review_score, other.review_score, "review_score")?,
            review_feedback: pick(self.review_feedback, other.review_feedback, "review_feedback")?,
            review_decision: pick(self.review_decision, other.review_decision, "review_decision")?,
            messages,
            warnings,
        })
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Authoritative record of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub(crate) task: String,
    pub(crate) brief: ContentBrief,
    pub(crate) phase: Phase,
    pub(crate) research_findings: String,
    pub(crate) research_sources: Vec<String>,
    pub(crate) content_draft: String,
    pub(crate) content_version: u32,
    pub(crate) reviewed_version: u32,
    pub(crate) review_score: Score,
    pub(crate) review_feedback: String,
    pub(crate) review_decision: ReviewDecision,
    pub(crate) iteration_count: u32,
    pub(crate) revision_count: u32,
    pub(crate) messages: Vec<Message>,
    pub(crate) warnings: Vec<String>,
    pub(crate) next_agent: Option<NextAgent>,
    pub(crate) finish_reason: Option<FinishReason>,
    pub(crate) final_output: Option<String>,
}

impl State {
    /// Creates the initial state: counters zero, decision pending, phase INIT.
    pub fn new(task: impl Into<String>, brief: ContentBrief) -> Self {
        Self {
            task: task.into(),
            brief,
            phase: Phase::Init,
            research_findings: String::new(),
            research_sources: Vec::new(),
            content_draft: String::new(),
            content_version: 0,
            reviewed_version: 0,
            review_score: Score::ZERO,
            review_feedback: String::new(),
            review_decision: ReviewDecision::Pending,
            iteration_count: 0,
            revision_count: 0,
            messages: Vec::new(),
            warnings: Vec::new(),
            next_agent: None,
            finish_reason: None,
            final_output: None,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn brief(&self) -> &ContentBrief {
        &self.brief
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn research_findings(&self) -> &str {
        &self.research_findings
    }

    pub fn research_sources(&self) -> &[String] {
        &self.research_sources
    }

    pub fn content_draft(&self) -> &str {
        &self.content_draft
    }

    /// Number of drafts merged so far.
    pub fn content_version(&self) -> u32 {
        self.content_version
    }

    /// The draft version the last review applied to.
    pub fn reviewed_version(&self) -> u32 {
        self.reviewed_version
    }

    /// Whether the current draft is newer than the last review.
    pub fn has_unreviewed_draft(&self) -> bool {
        !self.content_draft.is_empty() && self.content_version > self.reviewed_version
    }

    pub fn review_score(&self) -> Score {
        self.review_score
    }

    pub fn review_feedback(&self) -> &str {
        &self.review_feedback
    }

    pub fn review_decision(&self) -> ReviewDecision {
        self.review_decision
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub fn revision_count(&self) -> u32 {
        self.revision_count
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn next_agent(&self) -> Option<NextAgent> {
        self.next_agent
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    pub fn final_output(&self) -> Option<&str> {
        self.final_output.as_deref()
    }

    /// Whether the run has reached FINISH.
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finish
    }

    /// Word count of the final output, or of the current draft before termination.
    pub fn word_count(&self) -> usize {
        self.final_output
            .as_deref()
            .unwrap_or(&self.content_draft)
            .split_whitespace()
            .count()
    }

    /// Folds an executor's partial update into the state.
    ///
    /// Each field is applied under its entry in [`FIELD_POLICIES`]. A new
    /// draft advances `content_version`; a new review decision marks the
    /// current draft as reviewed.
    pub fn merge(&mut self, update: PartialStateUpdate) {
        let PartialStateUpdate {
            research_findings,
            research_sources,
            content_draft,
            review_score,
            review_feedback,
            review_decision,
            messages,
            warnings,
        } = update;

        merge_scalar("research_findings", &mut self.research_findings, research_findings);
        merge_scalar("research_sources", &mut self.research_sources, research_sources);
        if merge_scalar("content_draft", &mut self.content_draft, content_draft) {
            self.content_version += 1;
        }
        merge_scalar("review_score", &mut self.review_score, review_score);
        merge_scalar("review_feedback", &mut self.review_feedback, review_feedback);
        if merge_scalar("review_decision", &mut self.review_decision, review_decision) {
            self.reviewed_version = self.content_version;
        }
        merge_list("messages", &mut self.messages, messages);
        merge_list("warnings", &mut self.warnings, warnings);
    }

    /// Records a Controller decision.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvariantViolation`] if the run already finished, if
    /// the decision's iteration is not exactly `iteration_count + 1`, or if it
    /// would push `revision_count` past the ceiling.
    pub fn apply_decision(&mut self, decision: Decision) -> Result<(), PipelineError> {
        if self.is_finished() {
            return Err(PipelineError::InvariantViolation {
                message: "decision applied to a finished run".into(),
            });
        }
        if decision.iteration != self.iteration_count + 1 {
            return Err(PipelineError::InvariantViolation {
                message: format!(
                    "decision for iteration {} applied at iteration {}",
                    decision.iteration, self.iteration_count
                ),
            });
        }
        if decision.revision_edge && self.revision_count >= MAX_REVISIONS_CEILING {
            return Err(PipelineError::InvariantViolation {
                message: format!("revision_count would exceed {MAX_REVISIONS_CEILING}"),
            });
        }

        self.iteration_count = decision.iteration;
        if decision.revision_edge {
            self.revision_count += 1;
        }
        self.phase = decision.phase;
        self.next_agent = Some(decision.phase.dispatch());
        if let Some(reason) = decision.finish_reason {
            self.finish_reason = Some(reason);
        }
        if self.final_output.is_none() {
            self.final_output = decision.final_output;
        }
        self.messages.push(decision.message);
        Ok(())
    }

    /// Human-readable progress summary handed to the decision oracle.
    pub fn summary(&self, max_iterations: u32) -> String {
        let mut lines = vec![
            "=== WORKFLOW CONTEXT ===".to_string(),
            format!("Task: {}", self.task),
            format!(
                "Content: {} for {}",
                self.brief.content_type, self.brief.audience
            ),
            format!("Iteration: {}/{}", self.iteration_count, max_iterations),
            format!("Phase: {}", self.phase),
            String::new(),
        ];

        if self.research_findings.is_empty() {
            lines.push("[ ] Research not yet completed".into());
        } else {
            lines.push(format!(
                "[x] Research completed ({} sources)",
                self.research_sources.len()
            ));
        }
        if self.content_draft.is_empty() {
            lines.push("[ ] Content not yet created".into());
        } else {
            lines.push(format!(
                "[x] Content draft created (version {})",
                self.content_version
            ));
        }
        if self.review_decision == ReviewDecision::Pending {
            lines.push("[ ] Review not yet completed".into());
        } else {
            lines.push(format!(
                "[x] Review completed (score: {:.2}, decision: {}, revisions: {})",
                self.review_score.as_f64(),
                self.review_decision,
                self.revision_count
            ));
        }

        if !self.messages.is_empty() {
            lines.push(String::new());
            lines.push("=== RECENT ACTIVITY ===".into());
            let start = self.messages.len().saturating_sub(3);
            for msg in &self.messages[start..] {
                let preview: String = msg.content.chars().take(100).collect();
                lines.push(format!("{}: {}", msg.sender, preview));
            }
        }
        if !self.warnings.is_empty() {
            lines.push(format!("\nWarnings: {}", self.warnings.len()));
        }
        lines.join("\n")
    }
}
