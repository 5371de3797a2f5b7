//! Port traits: the seams between orchestration and infrastructure.
//!
//! | Trait | Implemented by |
//! |-------|----------------|
//! | [`Executor`] | `nodes` (Researcher, ContentCreator, Reviewer) |
//! | [`DecisionOracle`] | `nodes::LlmDecisionOracle`, test stubs |
//! | [`LlmProvider`] | `llm::ChatCompletionsProvider` |
//! | [`SearchProvider`] | `search::TavilySearch` |
//! | [`CheckpointStore`] | [`crate::InMemoryCheckpointStore`], `store::FileCheckpointStore` |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    AgentId, Checkpoint, CheckpointError, CheckpointSummary, ExecutorError, PartialStateUpdate,
    ProviderError, RunId, State,
};

// ---------------------------------------------------------------------------
// Executors and routing
// ---------------------------------------------------------------------------

/// A unit of work invoked by the driver for one iteration.
///
/// An executor reads the state and returns only the fields it touched. It
/// must not assume it runs exactly once per iteration: after a crash the
/// driver may re-invoke it from the last checkpoint.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Which agent this executor acts as.
    fn agent(&self) -> AgentId;

    /// Runs one step against `state`.
    async fn execute(&self, state: &State) -> Result<PartialStateUpdate, ExecutorError>;
}

/// Proposes the next agent given a textual summary of the run.
///
/// The answer is advisory; the Controller corrects anything invalid.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(&self, context: &str) -> Result<String, ProviderError>;
}

// ---------------------------------------------------------------------------
// Language model
// ---------------------------------------------------------------------------

/// Completion tokens assumed for a request without `max_tokens`.
const DEFAULT_COMPLETION_ESTIMATE: u32 = 1_000;

/// One chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// System prompt setting the model's role.
    pub system: String,
    /// User prompt.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens, if any.
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Rough model-token cost of the request: four characters per prompt
    /// token plus the completion allowance (1 000 when unset).
    pub fn estimated_tokens(&self) -> u32 {
        let prompt_chars = self.system.chars().count() + self.prompt.chars().count();
        let prompt_tokens = u32::try_from(prompt_chars / 4).unwrap_or(u32::MAX);
        prompt_tokens.saturating_add(self.max_tokens.unwrap_or(DEFAULT_COMPLETION_ESTIMATE))
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A text-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Returns the completion text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;
}

// ---------------------------------------------------------------------------
// Web search
// ---------------------------------------------------------------------------

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    /// Provider-reported relevance in `[0, 1]`.
    pub relevance_score: f64,
}

/// A web search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ProviderError>;
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

/// Durable storage of run snapshots, keyed by run id.
///
/// `save` must be durable before it returns. Versions start at 1 and increase
/// by one per save of the same run.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persists `state` and returns the new version.
    async fn save(&self, run_id: &RunId, state: &State) -> Result<u64, CheckpointError>;

    /// Loads the latest snapshot of a run.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::NotFound`] if the run has never been saved.
    async fn load(&self, run_id: &RunId) -> Result<Checkpoint, CheckpointError>;

    /// Summaries of every stored run, ordered by run id.
    async fn list(&self) -> Result<Vec<CheckpointSummary>, CheckpointError>;

    /// Removes a run's snapshot. Deleting an unknown run is not an error.
    async fn delete(&self, run_id: &RunId) -> Result<(), CheckpointError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_prompt_and_completion_tokens() {
        let request = CompletionRequest::new("a".repeat(40), "b".repeat(360));
        assert_eq!(request.estimated_tokens(), 100 + 1_000);
        assert_eq!(request.with_max_tokens(200).estimated_tokens(), 300);
    }
}
