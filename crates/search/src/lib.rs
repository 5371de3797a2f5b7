//! AgentFlow web-search infrastructure adapter.
//!
//! Implements the [`pipeline::SearchProvider`] trait over the Tavily search
//! API (`POST /search`).
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, request formatting and result mapping
//! live here. The [`pipeline`] crate sees only [`pipeline::SearchProvider`]
//! and [`pipeline::SearchHit`]. Rate limiting and retries are the caller's
//! concern; this adapter makes one request per uncached query.

mod tavily;

pub use tavily::{SearchSetupError, TavilyConfig, TavilySearch, DEFAULT_BASE_URL};
