//! AgentFlow executors, call gateway, and pipeline driver.
//!
//! This crate provides the three content executors (Researcher,
//! ContentCreator, Reviewer), the [`CallGateway`] that wraps every outbound
//! call with rate limiting and retry, the LLM-backed decision oracle, and
//! the [`PipelineDriver`] that runs the decide/execute/merge loop.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Executors sequence calls between the business
//! rules in the [`pipeline`] crate (scoring, approval, routing) and the
//! infrastructure ports (LLM, search, checkpoint store). Quality scoring and
//! routing live in `pipeline`; this crate only feeds them.
//!
//! | Module | Contents |
//! |---|---|
//! | `gateway` | [`CallGateway`], [`TokioClock`] |
//! | `researcher` | [`Researcher`] |
//! | `extraction` | key points, statistics, quotes and entities from search snippets |
//! | `creator` | [`ContentCreator`], [`DraftStats`] |
//! | `reviewer` | [`Reviewer`] |
//! | `validation` | [`ContentValidator`], [`assess_sources`] |
//! | `oracle` | [`LlmDecisionOracle`] |
//! | `driver` | [`PipelineDriver`], [`RunReport`] |

mod creator;
mod driver;
mod extraction;
mod gateway;
mod json;
mod oracle;
mod prompts;
mod researcher;
mod reviewer;
mod validation;

#[cfg(test)]
mod test_support;

pub use creator::{ContentCreator, DraftStats};
pub use driver::{PipelineDriver, RunReport, RunStatistics};
pub use gateway::{CallGateway, TokioClock};
pub use oracle::LlmDecisionOracle;
pub use researcher::Researcher;
pub use reviewer::Reviewer;
pub use validation::{assess_sources, ContentValidator, SourceCredibility, ValidationResult};
