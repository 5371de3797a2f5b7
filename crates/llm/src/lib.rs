//! AgentFlow language-model infrastructure adapter.
//!
//! Implements the [`pipeline::LlmProvider`] trait for OpenAI-compatible
//! chat-completion endpoints, including Azure OpenAI deployments (selected by
//! setting an `api_version`). Other providers are added as new `impl` blocks
//! in this crate without any change to the `pipeline` crate.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, request formatting, response parsing
//! and status classification live here. Rate limiting and retries do not:
//! the provider makes exactly one HTTP request per call and reports failures
//! as [`pipeline::ProviderError`] for the caller's retry policy.

mod chat_completions;

pub use chat_completions::{
    ChatCompletionsConfig, ChatCompletionsProvider, LlmSetupError, DEFAULT_BASE_URL, DEFAULT_MODEL,
};
