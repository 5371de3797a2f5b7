//! The pipeline driver: the sequential loop that runs one content job.
//!
//! ```text
//! load checkpoint (or start fresh) ─► decide ─► apply ─► execute ─► merge ─► save ─┐
//!                                       ▲                                            │
//!                                       └────────────────────────────────────────────┘
//! ```
//!
//! The loop ends when a decision moves the run into FINISH. When an executor
//! fails after its own retries, the driver stops without saving, so the latest
//! checkpoint is the state after the last successful merge. Resuming from it
//! repeats the failed decision with the same iteration number.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use pipeline::{
    AgentId, CheckpointError, CheckpointStore, ContentBrief, Controller, Executor, FinishReason,
    PipelineError, RunId, Score, State,
};

/// Headline numbers of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatistics {
    pub word_count: usize,
    pub final_score: Score,
    pub revision_count: u32,
    pub iteration_count: u32,
    pub source_count: usize,
    pub message_count: usize,
    pub warning_count: usize,
}

impl RunStatistics {
    fn of(state: &State) -> Self {
        Self {
            word_count: state.word_count(),
            final_score: state.review_score(),
            revision_count: state.revision_count(),
            iteration_count: state.iteration_count(),
            source_count: state.research_sources().len(),
            message_count: state.messages().len(),
            warning_count: state.warnings().len(),
        }
    }
}

/// Result of [`PipelineDriver::run`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub state: State,
    pub finish_reason: FinishReason,
    /// Version of the last checkpoint written, when checkpointing is enabled.
    pub checkpoint_version: Option<u64>,
    /// Whether the run continued from an earlier checkpoint.
    pub resumed: bool,
    pub statistics: RunStatistics,
}

impl RunReport {
    /// Every finish except a rejection counts as success, including a forced
    /// finish that stopped before any draft existed.
    pub fn succeeded(&self) -> bool {
        self.finish_reason != FinishReason::Rejected
    }
}

/// Drives the Controller and the executors for one run at a time.
pub struct PipelineDriver {
    controller: Controller,
    executors: HashMap<AgentId, Arc<dyn Executor>>,
    store: Option<Arc<dyn CheckpointStore>>,
}

impl PipelineDriver {
    /// Creates a driver without executors or checkpointing.
    pub fn new(controller: Controller) -> Self {
        Self {
            controller,
            executors: HashMap::new(),
            store: None,
        }
    }

    /// Registers an executor under its own agent id, replacing any earlier one.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executors.insert(executor.agent(), executor);
        self
    }

    /// Enables checkpointing.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Runs (or resumes) `run_id` to completion.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::ExecutorFailed`] when an executor exhausts its retries;
    /// - [`PipelineError::ConfigurationError`] when no executor is registered
    ///   for the agent a decision selects;
    /// - [`PipelineError::Checkpoint`] when the store fails.
    #[instrument(skip_all, fields(run_id = %run_id))]
    pub async fn run(
        &self,
        run_id: &RunId,
        task: &str,
        brief: ContentBrief,
    ) -> Result<RunReport, PipelineError> {
        let (mut state, mut version, resumed) = self.start(run_id, task, brief).await?;

        while !state.is_finished() {
            let decision = self.controller.decide(&state).await;
            info!(
                iteration = decision.iteration,
                phase = %decision.phase,
                next_agent = %decision.next_agent(),
                corrected = decision.corrected,
                "Controller decision"
            );
            state.apply_decision(decision)?;

            let Some(agent) = state.next_agent().and_then(|next| next.agent()) else {
                version = self.save(run_id, &state).await?.or(version);
                break;
            };
            let executor = self.executors.get(&agent).ok_or_else(|| {
                PipelineError::config(format!("no executor registered for '{agent}'"))
            })?;

            match executor.execute(&state).await {
                Ok(update) => state.merge(update),
                Err(source) => {
                    error!(%agent, error = %source, "Executor failed; halting run");
                    return Err(PipelineError::ExecutorFailed { agent, source });
                }
            }
            version = self.save(run_id, &state).await?.or(version);
        }

        let finish_reason = state.finish_reason().ok_or_else(|| PipelineError::InvariantViolation {
            message: "finished run has no finish reason".into(),
        })?;
        info!(
            ?finish_reason,
            iterations = state.iteration_count(),
            revisions = state.revision_count(),
            score = state.review_score().as_f64(),
            "Run finished"
        );

        Ok(RunReport {
            run_id: run_id.clone(),
            statistics: RunStatistics::of(&state),
            state,
            finish_reason,
            checkpoint_version: version,
            resumed,
        })
    }

    async fn start(
        &self,
        run_id: &RunId,
        task: &str,
        brief: ContentBrief,
    ) -> Result<(State, Option<u64>, bool), PipelineError> {
        if let Some(store) = &self.store {
            match store.load(run_id).await {
                Ok(checkpoint) => {
                    if checkpoint.state.task() != task {
                        warn!(
                            stored_task = checkpoint.state.task(),
                            "Resuming with the task stored in the checkpoint"
                        );
                    }
                    info!(
                        version = checkpoint.version,
                        iteration = checkpoint.state.iteration_count(),
                        "Resuming from checkpoint"
                    );
                    return Ok((checkpoint.state, Some(checkpoint.version), true));
                }
                Err(CheckpointError::NotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let state = State::new(task, brief);
        let version = self.save(run_id, &state).await?;
        Ok((state, version, false))
    }

    async fn save(&self, run_id: &RunId, state: &State) -> Result<Option<u64>, PipelineError> {
        match &self.store {
            Some(store) => Ok(Some(store.save(run_id, state).await?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pipeline::{
        ExecutorError, InMemoryCheckpointStore, PartialStateUpdate, PipelineConfig,
        ReviewDecision,
    };

    use super::*;

    struct Fixed {
        agent: AgentId,
        update: fn(&State) -> Result<PartialStateUpdate, ExecutorError>,
    }

    #[async_trait]
    impl Executor for Fixed {
        fn agent(&self) -> AgentId {
            self.agent
        }

        async fn execute(&self, state: &State) -> Result<PartialStateUpdate, ExecutorError> {
            (self.update)(state)
        }
    }

    fn driver(reviewer: fn(&State) -> Result<PartialStateUpdate, ExecutorError>) -> PipelineDriver {
        PipelineDriver::new(Controller::new(&PipelineConfig::default()))
            .with_executor(Arc::new(Fixed {
                agent: AgentId::Researcher,
                update: |_| Ok(PartialStateUpdate::new().with_research("findings", vec!["https://a.org".into()])),
            }))
            .with_executor(Arc::new(Fixed {
                agent: AgentId::ContentCreator,
                update: |_| Ok(PartialStateUpdate::new().with_draft("one two three")),
            }))
            .with_executor(Arc::new(Fixed {
                agent: AgentId::Reviewer,
                update: reviewer,
            }))
    }

    fn approve(_: &State) -> Result<PartialStateUpdate, ExecutorError> {
        Ok(PartialStateUpdate::new().with_review(
            Score::new(0.93).unwrap(),
            ReviewDecision::Approve,
            "great",
        ))
    }

    fn outage(_: &State) -> Result<PartialStateUpdate, ExecutorError> {
        Err(ExecutorError::transient("llm.complete", "503"))
    }

    fn run_id() -> RunId {
        RunId::new("run_test").unwrap()
    }

    #[tokio::test]
    async fn runs_to_approval() {
        let report = driver(approve)
            .run(&run_id(), "Explain transformers", ContentBrief::default())
            .await
            .unwrap();
        assert!(report.succeeded());
        assert_eq!(report.finish_reason, FinishReason::Approved);
        assert_eq!(report.statistics.iteration_count, 4);
        assert_eq!(report.statistics.revision_count, 0);
        assert_eq!(report.statistics.word_count, 3);
        assert_eq!(report.statistics.source_count, 1);
        assert!(report.checkpoint_version.is_none());
    }

    #[tokio::test]
    async fn saves_after_every_merge() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let report = driver(approve)
            .with_store(store.clone())
            .run(&run_id(), "Explain transformers", ContentBrief::default())
            .await
            .unwrap();
        // Initial save, three merges, one final decision.
        assert_eq!(report.checkpoint_version, Some(5));
        let stored = store.load(&run_id()).await.unwrap();
        assert_eq!(stored.state, report.state);
    }

    #[tokio::test]
    async fn executor_failure_keeps_last_good_checkpoint() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let err = driver(outage)
            .with_store(store.clone())
            .run(&run_id(), "Explain transformers", ContentBrief::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ExecutorFailed {
                agent: AgentId::Reviewer,
                ..
            }
        ));

        let stored = store.load(&run_id()).await.unwrap();
        assert_eq!(stored.state.iteration_count(), 2);
        assert!(!stored.state.content_draft().is_empty());
    }

    #[tokio::test]
    async fn resume_continues_from_checkpoint() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let _ = driver(outage)
            .with_store(store.clone())
            .run(&run_id(), "Explain transformers", ContentBrief::default())
            .await;

        let report = driver(approve)
            .with_store(store.clone())
            .run(&run_id(), "Explain transformers", ContentBrief::default())
            .await
            .unwrap();
        assert!(report.resumed);
        assert_eq!(report.statistics.iteration_count, 4);
        assert_eq!(report.finish_reason, FinishReason::Approved);
    }

    #[tokio::test]
    async fn finished_run_is_returned_as_is() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let first = driver(approve)
            .with_store(store.clone())
            .run(&run_id(), "Explain transformers", ContentBrief::default())
            .await
            .unwrap();
        let second = driver(outage)
            .with_store(store)
            .run(&run_id(), "Explain transformers", ContentBrief::default())
            .await
            .unwrap();
        assert_eq!(second.state, first.state);
        assert_eq!(second.checkpoint_version, first.checkpoint_version);
    }

    #[tokio::test]
    async fn missing_executor_is_a_configuration_error() {
        let driver = PipelineDriver::new(Controller::new(&PipelineConfig::default()));
        let err = driver
            .run(&run_id(), "task", ContentBrief::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ConfigurationError { .. }));
    }

    #[tokio::test]
    async fn iteration_limit_before_any_draft_still_succeeds() {
        let config = PipelineConfig {
            max_iterations: 2,
            ..PipelineConfig::default()
        };
        let driver = PipelineDriver::new(Controller::new(&config)).with_executor(Arc::new(Fixed {
            agent: AgentId::Researcher,
            update: |_| Ok(PartialStateUpdate::new().with_research("findings", vec![])),
        }));
        let report = driver
            .run(&run_id(), "Explain transformers", ContentBrief::default())
            .await
            .unwrap();
        assert_eq!(report.finish_reason, FinishReason::IterationLimit);
        assert!(report.state.final_output().is_none());
        assert!(report.succeeded());
    }

    #[tokio::test]
    async fn rejection_is_not_success() {
        let report = driver(|_| {
            Ok(PartialStateUpdate::new().with_review(
                Score::new(0.2).unwrap(),
                ReviewDecision::Reject,
                "fabricated quotes",
            ))
        })
        .run(&run_id(), "Explain transformers", ContentBrief::default())
        .await
        .unwrap();
        assert_eq!(report.finish_reason, FinishReason::Rejected);
        assert!(!report.succeeded());
    }
}
