//! Scripted providers and helpers shared by the unit tests in this crate.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use pipeline::{
    AgentId, CompletionRequest, Decision, LlmProvider, Message, MessageKind, Phase, ProviderError,
    RateLimitConfig, RetryConfig, SearchHit, SearchProvider, State, TokenBucket,
};

use crate::gateway::{CallGateway, TokioClock};

/// A gateway with a large bucket and millisecond back-off.
pub(crate) fn gateway() -> Arc<CallGateway> {
    let limits = RateLimitConfig {
        capacity: 1_000.0,
        refill_per_second: 100.0,
        ..RateLimitConfig::default()
    };
    let limiter = TokenBucket::with_clock(&limits, Arc::new(TokioClock)).unwrap();
    let retry = RetryConfig {
        max_retries: 2,
        initial_backoff_ms: 1,
        max_backoff_ms: 10,
        ..RetryConfig::default()
    };
    Arc::new(CallGateway::new(Arc::new(limiter), retry))
}

/// Moves `state` into `phase` through a regular decision.
pub(crate) fn enter_phase(state: &mut State, phase: Phase) {
    let decision = Decision {
        iteration: state.iteration_count() + 1,
        phase,
        revision_edge: phase == Phase::Revise,
        finish_reason: None,
        final_output: None,
        corrected: false,
        message: Message::new(AgentId::Supervisor, MessageKind::Decision, format!("Enter {phase}")),
    };
    state.apply_decision(decision).unwrap();
}

/// Replays a fixed list of answers and records every request.
pub(crate) struct ScriptedLlm {
    answers: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub(crate) fn new(answers: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        self.requests.lock().push(request.clone());
        self.answers.lock().pop_front().unwrap_or_else(|| {
            Err(ProviderError::InvalidRequest {
                message: "script exhausted".into(),
            })
        })
    }
}

/// Returns the same hits (or the same error) for every query.
pub(crate) struct StaticSearch {
    result: Result<Vec<SearchHit>, ProviderError>,
}

impl StaticSearch {
    pub(crate) fn new(hits: Vec<SearchHit>) -> Self {
        Self { result: Ok(hits) }
    }

    pub(crate) fn failing(error: ProviderError) -> Self {
        Self { result: Err(error) }
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<SearchHit>, ProviderError> {
        self.result
            .clone()
            .map(|hits| hits.into_iter().take(max_results).collect())
    }
}
