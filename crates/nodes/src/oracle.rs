//! A decision oracle backed by the language model.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use pipeline::{
    CompletionRequest, DecisionOracle, LlmProvider, ProviderError, TokenBucket,
};

use crate::json::extract_json;
use crate::prompts;

#[derive(Debug, Deserialize)]
struct OracleReply {
    next_agent: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Asks the model which agent should run next.
///
/// The oracle is advisory, so it makes a single attempt: when the shared
/// limiter has no token it reports [`ProviderError::RateLimited`] instead of
/// waiting, and the Controller falls back to deterministic routing.
pub struct LlmDecisionOracle {
    llm: Arc<dyn LlmProvider>,
    limiter: Arc<TokenBucket>,
}

impl LlmDecisionOracle {
    pub fn new(llm: Arc<dyn LlmProvider>, limiter: Arc<TokenBucket>) -> Self {
        Self { llm, limiter }
    }
}

#[async_trait]
impl DecisionOracle for LlmDecisionOracle {
    async fn decide(&self, context: &str) -> Result<String, ProviderError> {
        if !self.limiter.consume(1) {
            return Err(ProviderError::RateLimited {
                retry_after: self.limiter.wait_hint(1),
            });
        }

        let request = CompletionRequest::new(
            prompts::SUPERVISOR,
            format!("{context}\n\nWhich agent should act next?"),
        )
        .with_temperature(0.0)
        .with_max_tokens(300);
        let answer = self.llm.complete(&request).await?;

        match extract_json::<OracleReply>(&answer) {
            Ok(reply) => {
                debug!(
                    next_agent = %reply.next_agent,
                    reasoning = %reply.reasoning,
                    confidence = ?reply.confidence,
                    "Oracle reply"
                );
                Ok(reply.next_agent)
            }
            // A bare agent name is still useful; the Controller validates it.
            Err(_) => Ok(answer.trim().to_string()),
        }
    }
}
