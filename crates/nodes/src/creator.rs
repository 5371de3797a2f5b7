//! The ContentCreator: drafts content from research, or revises it from
//! reviewer feedback.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, instrument};

use pipeline::{
    AgentId, CompletionRequest, Executor, ExecutorError, LlmProvider, Message, MessageKind,
    PartialStateUpdate, Phase, State,
};

use crate::gateway::CallGateway;
use crate::prompts;

static CITATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\d+\]").expect("valid regex"));
static SECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(?:#+\s+.+|\d+\.\s+.+)$").expect("valid regex"));

pub struct ContentCreator {
    llm: Arc<dyn LlmProvider>,
    gateway: Arc<CallGateway>,
}

impl ContentCreator {
    pub fn new(llm: Arc<dyn LlmProvider>, gateway: Arc<CallGateway>) -> Self {
        Self { llm, gateway }
    }

    fn prompt(state: &State, revising: bool) -> String {
        let brief = state.brief();
        if revising {
            format!(
                "You are revising previously created content based on reviewer feedback.\n\n\
                 Original research:\n{}\n\n\
                 Current draft:\n{}\n\n\
                 Reviewer feedback:\n{}\n\n\
                 Revise the content to address every feedback point while keeping it accurate. \
                 Keep all citations.\n\nWrite the revised {} for a {}:",
                state.research_findings(),
                state.content_draft(),
                state.review_feedback(),
                brief.content_type,
                brief.audience,
            )
        } else {
            format!(
                "Create a high-quality {ct} based on the research findings below.\n\n\
                 Task: {}\n\n\
                 Research findings:\n{}\n\n\
                 Requirements:\n\
                 1. Engaging introduction that hooks the reader\n\
                 2. Well-structured body with clear sections\n\
                 3. Claims supported by evidence from the research\n\
                 4. Numbered citations [1], [2], etc.\n\
                 5. Compelling conclusion\n\
                 6. Professional tone appropriate for a {}\n\n\
                 Write the {ct}:",
                state.task(),
                state.research_findings(),
                brief.audience,
                ct = brief.content_type,
            )
        }
    }
}

#[async_trait]
impl Executor for ContentCreator {
    fn agent(&self) -> AgentId {
        AgentId::ContentCreator
    }

    #[instrument(skip_all, fields(agent = "content_creator", iteration = state.iteration_count()))]
    async fn execute(&self, state: &State) -> Result<PartialStateUpdate, ExecutorError> {
        let revising = state.phase() == Phase::Revise;
        let request = CompletionRequest::new(prompts::CONTENT_CREATOR, Self::prompt(state, revising));
        let draft = self
            .gateway
            .call_weighted("llm.complete", request.estimated_tokens(), || self.llm.complete(&request))
            .await?;
        if draft.trim().is_empty() {
            return Err(ExecutorError::transient("llm.complete", "model returned an empty draft"));
        }

        let stats = DraftStats::of(&draft);
        info!(
            version = state.content_version() + 1,
            revising,
            words = stats.words,
            citations = stats.citations,
            sections = stats.sections,
            "Draft produced"
        );
        let verb = if revising { "revised" } else { "created" };
        let summary = format!(
            "Content {verb} ({} words, {} sources cited)",
            stats.words, stats.citations
        );
        Ok(PartialStateUpdate::new()
            .with_draft(draft)
            .with_message(Message::new(AgentId::ContentCreator, MessageKind::Info, summary)))
    }
}

/// Simple measurements of a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DraftStats {
    pub words: usize,
    /// Distinct `[n]` citation markers.
    pub citations: usize,
    /// Markdown headers and numbered section lines.
    pub sections: usize,
}

impl DraftStats {
    pub fn of(draft: &str) -> Self {
        let distinct: HashSet<&str> = CITATION.find_iter(draft).map(|m| m.as_str()).collect();
        Self {
            words: draft.split_whitespace().count(),
            citations: distinct.len(),
            sections: SECTION.find_iter(draft).count(),
        }
    }
}
