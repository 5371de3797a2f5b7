//! The Researcher: web search followed by LLM synthesis.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, instrument, warn};

use pipeline::{
    AgentId, CompletionRequest, Executor, ExecutorError, LlmProvider, Message, MessageKind,
    PartialStateUpdate, ResearchConfig, SearchHit, SearchProvider, State,
};

use crate::extraction::Extraction;
use crate::gateway::CallGateway;
use crate::prompts;
use crate::validation::assess_sources;

static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s)\]>]+").expect("valid regex"));

/// Characters of raw search output included in the synthesis prompt.
const MAX_RESULTS_IN_PROMPT: usize = 4_000;

pub struct Researcher {
    search: Arc<dyn SearchProvider>,
    llm: Arc<dyn LlmProvider>,
    gateway: Arc<CallGateway>,
    config: ResearchConfig,
}

impl Researcher {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        llm: Arc<dyn LlmProvider>,
        gateway: Arc<CallGateway>,
        config: ResearchConfig,
    ) -> Self {
        Self {
            search,
            llm,
            gateway,
            config,
        }
    }
}

#[async_trait]
impl Executor for Researcher {
    fn agent(&self) -> AgentId {
        AgentId::Researcher
    }

    #[instrument(skip_all, fields(agent = "researcher", iteration = state.iteration_count()))]
    async fn execute(&self, state: &State) -> Result<PartialStateUpdate, ExecutorError> {
        let query = state.task();
        let max_results = self.config.max_results;
        let hits = self
            .gateway
            .call("search", || self.search.search(query, max_results))
            .await?;

        let mut update = PartialStateUpdate::new();
        if hits.is_empty() {
            warn!(query, "Web search returned no results");
            update = update.with_warning("Web search returned no results");
        }
        let formatted = format_hits(&hits);
        let snippets = hits
            .iter()
            .map(|hit| hit.snippet.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let extraction = Extraction::from_text(&snippets);

        let prompt = format!(
            "Research query: {query}\nThe research will be used for a {} aimed at a {}.\n\n\
             Extracted information:\n{}\n\n\
             Search results:\n{}\n\n\
             Synthesise these results into a comprehensive research report.",
            state.brief().content_type,
            state.brief().audience,
            extraction.render_context(),
            truncate(&formatted, MAX_RESULTS_IN_PROMPT),
        );
        let request = CompletionRequest::new(prompts::RESEARCHER, prompt).with_temperature(0.3);
        let synthesis = self
            .gateway
            .call_weighted("llm.complete", request.estimated_tokens(), || self.llm.complete(&request))
            .await?;

        let findings = if !synthesis.trim().is_empty() {
            synthesis
        } else if !formatted.is_empty() {
            warn!("Synthesis was empty; keeping raw search results as findings");
            update = update.with_warning("Research synthesis was empty; raw search results used");
            formatted.clone()
        } else {
            return Err(ExecutorError::transient(
                "research",
                "neither search nor synthesis produced findings",
            ));
        };

        let sources = extract_sources(&formatted, self.config.max_sources);
        let credibility = assess_sources(&sources);
        for warning in credibility.warnings.iter().filter(|w| w.starts_with("Non-HTTPS")) {
            update = update.with_warning(warning.clone());
        }

        let quality = extraction.research_quality(credibility.score, findings.chars().count());
        let gaps = extraction.knowledge_gaps();
        for gap in &gaps {
            update = update.with_warning(format!("Knowledge gap: {gap}"));
        }

        info!(
            sources = sources.len(),
            credibility = credibility.score,
            quality,
            key_points = extraction.key_points.len(),
            statistics = extraction.statistics.len(),
            gaps = gaps.len(),
            "Research completed"
        );
        let mut summary = format!(
            "Research completed: {} sources, credibility {:.2}, quality {quality:.2}",
            sources.len(),
            credibility.score
        );
        if !gaps.is_empty() {
            summary.push_str(&format!("; gaps: {}", gaps.join(", ")));
        }
        Ok(update
            .with_research(findings, sources)
            .with_message(Message::new(AgentId::Researcher, MessageKind::Info, summary)))
    }
}

fn format_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "[{}] {}\nURL: {}\nRelevance: {:.2}\n{}",
                i + 1,
                hit.title,
                hit.url,
                hit.relevance_score,
                hit.snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Unique URLs in order of first appearance.
fn extract_sources(text: &str, max: usize) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for m in URL.find_iter(text) {
        let url = m.as_str().trim_end_matches(['.', ',', ';']);
        if !sources.iter().any(|s| s == url) {
            sources.push(url.to_string());
        }
        if sources.len() == max {
            break;
        }
    }
    sources
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
