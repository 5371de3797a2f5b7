//! `agentflow runs`: listing and deleting checkpointed runs.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use pipeline::{CheckpointStore, RunId};
use store::FileCheckpointStore;

use crate::args::RunsCommand;

/// Runs one `runs` subcommand against `store` and returns what to print.
pub async fn execute(store: &FileCheckpointStore, command: &RunsCommand) -> Result<String> {
    match command {
        RunsCommand::List => list(store).await,
        RunsCommand::Delete { run_id } => {
            let run_id = RunId::new(run_id.as_str()).context("run id must not be blank")?;
            store
                .delete(&run_id)
                .await
                .with_context(|| format!("failed to delete run {run_id}"))?;
            Ok(format!("Deleted run {run_id}\n"))
        }
    }
}

async fn list(store: &FileCheckpointStore) -> Result<String> {
    let runs = store.list().await.context("failed to list checkpoints")?;
    let mut out = String::new();
    if runs.is_empty() {
        writeln!(out, "No checkpointed runs in {}", store.root().display())?;
        return Ok(out);
    }

    writeln!(out, "Checkpointed runs in {}:", store.root().display())?;
    writeln!(out, "{:<16} {:>7} {:>5} {:<9} {:<25} TASK", "RUN ID", "VERSION", "ITER", "STATUS", "SAVED AT")?;
    for run in runs {
        let status = if run.finished { "finished".to_string() } else { run.phase.to_string() };
        writeln!(
            out,
            "{:<16} {:>7} {:>5} {:<9} {:<25} {}",
            run.run_id.as_str(),
            run.version,
            run.iteration_count,
            status,
            run.saved_at.to_string(),
            run.task
        )?;
    }
    Ok(out)
}
