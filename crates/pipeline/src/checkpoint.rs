//! Checkpoint snapshots and an in-memory store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{CheckpointError, CheckpointStore, Phase, RunId, State, Timestamp};

/// A persisted snapshot of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: RunId,
    /// Monotonic per run, starting at 1.
    pub version: u64,
    pub saved_at: Timestamp,
    pub state: State,
}

impl Checkpoint {
    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            run_id: self.run_id.clone(),
            version: self.version,
            saved_at: self.saved_at,
            task: self.state.task().to_string(),
            phase: self.state.phase(),
            iteration_count: self.state.iteration_count(),
            finished: self.state.is_finished(),
        }
    }
}

/// Listing entry for a stored run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub run_id: RunId,
    pub version: u64,
    pub saved_at: Timestamp,
    pub task: String,
    pub phase: Phase,
    pub iteration_count: u32,
    pub finished: bool,
}

/// Process-local checkpoint store.
///
/// Snapshots are kept as serialised JSON so that a round trip through this
/// store exercises the same encoding as a durable backend.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    runs: Mutex<BTreeMap<RunId, String>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, run_id: &RunId, state: &State) -> Result<u64, CheckpointError> {
        let mut runs = self.runs.lock();
        let previous = match runs.get(run_id) {
            Some(raw) => serde_json::from_str::<Checkpoint>(raw)?.version,
            None => 0,
        };
        let checkpoint = Checkpoint {
            run_id: run_id.clone(),
            version: previous + 1,
            saved_at: Timestamp::now(),
            state: state.clone(),
        };
        runs.insert(run_id.clone(), serde_json::to_string(&checkpoint)?);
        Ok(checkpoint.version)
    }

    async fn load(&self, run_id: &RunId) -> Result<Checkpoint, CheckpointError> {
        let runs = self.runs.lock();
        let raw = runs.get(run_id).ok_or_else(|| CheckpointError::NotFound {
            run_id: run_id.clone(),
        })?;
        Ok(serde_json::from_str(raw)?)
    }

    async fn list(&self) -> Result<Vec<CheckpointSummary>, CheckpointError> {
        let runs = self.runs.lock();
        runs.values()
            .map(|raw| Ok(serde_json::from_str::<Checkpoint>(raw)?.summary()))
            .collect()
    }

    async fn delete(&self, run_id: &RunId) -> Result<(), CheckpointError> {
        self.runs.lock().remove(run_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContentBrief, CriterionScores, PartialStateUpdate, QualityScorer, ReviewDecision};

    fn run(id: &str) -> RunId {
        RunId::new(id).unwrap()
    }

    #[tokio::test]
    async fn versions_increase_per_run() {
        let store = InMemoryCheckpointStore::new();
        let state = State::new("task", ContentBrief::default());
        assert_eq!(store.save(&run("a"), &state).await.unwrap(), 1);
        assert_eq!(store.save(&run("a"), &state).await.unwrap(), 2);
        assert_eq!(store.save(&run("b"), &state).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn load_returns_latest_state() {
        let store = InMemoryCheckpointStore::new();
        let mut state = State::new("task", ContentBrief::default());
        store.save(&run("a"), &state).await.unwrap();
        state.merge(PartialStateUpdate::new().with_draft("draft"));
        store.save(&run("a"), &state).await.unwrap();

        let loaded = store.load(&run("a")).await.unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.state, state);
    }

    #[tokio::test]
    async fn missing_run_is_not_found() {
        let store = InMemoryCheckpointStore::new();
        assert!(matches!(
            store.load(&run("nope")).await,
            Err(CheckpointError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn list_and_delete() {
        let store = InMemoryCheckpointStore::new();
        let state = State::new("task", ContentBrief::default());
        store.save(&run("b"), &state).await.unwrap();
        store.save(&run("a"), &state).await.unwrap();

        let ids: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.run_id.to_string())
            .collect();
        assert_eq!(ids, ["a", "b"]);

        store.delete(&run("a")).await.unwrap();
        store.delete(&run("a")).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn scored_state_round_trips_exactly() {
        let store = InMemoryCheckpointStore::new();
        let scorer = QualityScorer::default();
        for (a, b, c) in [(0.37, 0.61, 0.83), (0.19, 0.42, 0.77), (0.13, 0.29, 0.71)] {
            let criteria = CriterionScores {
                factual_accuracy: a,
                completeness: b,
                clarity: c,
                engagement: b,
                citations: a,
            };
            let breakdown = scorer.score(&criteria, c).unwrap();
            let mut state = State::new("task", ContentBrief::default());
            state.merge(
                PartialStateUpdate::new()
                    .with_draft("draft")
                    .with_review(breakdown.final_score, ReviewDecision::RequestRevision, "feedback"),
            );

            store.save(&run("scored"), &state).await.unwrap();
            let loaded = store.load(&run("scored")).await.unwrap();
            assert_eq!(loaded.state, state);
            assert_eq!(
                loaded.state.review_score().as_f64().to_bits(),
                breakdown.final_score.as_f64().to_bits()
            );
        }
    }
}
