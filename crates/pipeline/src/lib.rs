//! Core orchestration domain for AgentFlow.
//!
//! This crate contains the run state and its merge rules, the Controller
//! (routing state machine), the quality scorer and approval policy, the shared
//! token-bucket rate limiter, checkpoint snapshots, and the port traits that
//! infrastructure crates implement. It never adds I/O of its own.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype domain identifiers (`RunId`) |
//! | [`types`] | Shared value types (`Score`, `ContentBrief`, `Timestamp`) |
//! | [`errors`] | Error and retry-policy types |
//! | [`config`] | `PipelineConfig` and its sections |
//! | [`state`] | `State`, `Message`, `PartialStateUpdate`, merge policy table |
//! | [`quality`] | `QualityScorer`, `ApprovalPolicy`, `QualityReport` |
//! | [`rate_limit`] | `TokenBucket` and the `Clock` abstraction |
//! | [`controller`] | `Controller` and `Decision` |
//! | [`checkpoint`] | `Checkpoint` snapshots and `InMemoryCheckpointStore` |
//! | [`ports`] | `Executor`, `DecisionOracle`, `LlmProvider`, `SearchProvider`, `CheckpointStore` |

pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod errors;
pub mod identifiers;
pub mod ports;
pub mod quality;
pub mod rate_limit;
pub mod state;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use checkpoint::{Checkpoint, CheckpointSummary, InMemoryCheckpointStore};
pub use config::{PipelineConfig, ResearchConfig, RetryConfig, ReviewConfig, MAX_REVISIONS_CEILING};
pub use controller::{canonical_transition, Controller, Decision, Transition};
pub use errors::{CheckpointError, ExecutorError, PipelineError, ProviderError, RetryPolicy};
pub use identifiers::RunId;
pub use ports::{
    CheckpointStore, CompletionRequest, DecisionOracle, Executor, LlmProvider, SearchHit,
    SearchProvider,
};
pub use quality::{
    ApprovalPolicy, CriterionScores, QualityReport, QualityScorer, QualityWeights, ReviewDecision,
    ReviewInput, ScoreBreakdown, SYNTHETIC_LOW_SCORE,
};
pub use rate_limit::{Clock, ManualClock, RateLimitConfig, SystemClock, TokenBucket};
pub use state::{
    field_policy, AgentId, FinishReason, MergePolicy, Message, MessageKind, NextAgent,
    PartialStateUpdate, Phase, State, FIELD_POLICIES,
};
pub use types::{ContentBrief, ContentType, Score, Timestamp};
