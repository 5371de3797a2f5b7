//! Human-readable run reports.

use std::fmt::{self, Write as _};
use std::path::Path;

use anyhow::{Context, Result};
use nodes::RunReport;
use pipeline::FinishReason;

const RULE: &str = "================================================================================";
const THIN_RULE: &str = "--------------------------------------------------------------------------------";

/// Characters of draft and feedback shown when a run ends without output.
const EXCERPT_CHARS: usize = 500;

/// Renders the final output and statistics, or diagnostics when the run
/// produced no output.
pub fn render(report: &RunReport) -> Result<String> {
    let mut out = String::new();
    write_report(&mut out, report)?;
    Ok(out)
}

fn write_report(out: &mut String, report: &RunReport) -> fmt::Result {
    let state = &report.state;
    let stats = &report.statistics;

    writeln!(out, "\n{RULE}\nRESULTS\n{RULE}")?;
    match state.final_output() {
        Some(output) => writeln!(out, "\n{output}\n")?,
        None => {
            writeln!(out, "\nThe run did not produce a final output.")?;
            writeln!(out, "Last review decision: {}", state.review_decision())?;
            if !state.content_draft().is_empty() {
                writeln!(
                    out,
                    "\n{THIN_RULE}\nLAST CONTENT DRAFT (not approved)\n{THIN_RULE}\n{}",
                    excerpt(state.content_draft())
                )?;
            }
            if !state.review_feedback().is_empty() {
                writeln!(
                    out,
                    "\n{THIN_RULE}\nLAST REVIEW FEEDBACK\n{THIN_RULE}\n{}",
                    excerpt(state.review_feedback())
                )?;
            }
        }
    }

    writeln!(out, "\n{THIN_RULE}\nSTATISTICS\n{THIN_RULE}")?;
    writeln!(out, "Run ID: {}", report.run_id)?;
    writeln!(out, "Outcome: {}", outcome(report.finish_reason))?;
    writeln!(out, "Word Count: {}", stats.word_count)?;
    writeln!(out, "Quality Score: {:.2}/1.0", stats.final_score.as_f64())?;
    writeln!(out, "Sources Used: {}", stats.source_count)?;
    writeln!(out, "Revisions: {}", stats.revision_count)?;
    writeln!(out, "Total Iterations: {}", stats.iteration_count)?;
    if let Some(version) = report.checkpoint_version {
        let resumed = if report.resumed { " (resumed)" } else { "" };
        writeln!(out, "Checkpoint Version: {version}{resumed}")?;
    }

    if !state.warnings().is_empty() {
        writeln!(out, "\nWarnings:")?;
        for warning in state.warnings() {
            writeln!(out, "  - {warning}")?;
        }
    }
    Ok(())
}

fn outcome(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Approved => "approved",
        FinishReason::EarlyExit => "finished early (score above early-exit threshold)",
        FinishReason::IterationLimit => "stopped at the iteration limit",
        FinishReason::RevisionLimit => "stopped at the revision limit",
        FinishReason::Rejected => "rejected",
    }
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Writes `content` to `path`, creating parent directories.
pub fn save_output(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create '{}'", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("failed to write '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use nodes::PipelineDriver;
    use pipeline::{
        AgentId, ContentBrief, Controller, Executor, ExecutorError, PartialStateUpdate,
        PipelineConfig, ReviewDecision, RunId, Score, State,
    };

    use super::*;

    struct Canned(AgentId, ReviewDecision);

    #[async_trait]
    impl Executor for Canned {
        fn agent(&self) -> AgentId {
            self.0
        }

        async fn execute(&self, _state: &State) -> Result<PartialStateUpdate, ExecutorError> {
            Ok(match self.0 {
                AgentId::Researcher => PartialStateUpdate::new().with_research("notes", vec!["https://a.org".into()]),
                AgentId::ContentCreator => PartialStateUpdate::new().with_draft("Final words here."),
                _ => PartialStateUpdate::new()
                    .with_review(Score::new(0.91).unwrap(), self.1, "Score: 0.91")
                    .with_warning("search returned 1 result"),
            })
        }
    }

    async fn report(decision: ReviewDecision) -> RunReport {
        let mut driver = PipelineDriver::new(Controller::new(&PipelineConfig::default()));
        for agent in [AgentId::Researcher, AgentId::ContentCreator, AgentId::Reviewer] {
            driver = driver.with_executor(Arc::new(Canned(agent, decision)));
        }
        driver
            .run(&RunId::new("run_report").unwrap(), "task", ContentBrief::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn renders_output_and_statistics() {
        let text = render(&report(ReviewDecision::Approve).await).unwrap();
        assert!(text.contains("Final words here."));
        assert!(text.contains("Word Count: 3"));
        assert!(text.contains("Quality Score: 0.91/1.0"));
        assert!(text.contains("Outcome: approved"));
        assert!(text.contains("  - search returned 1 result"));
    }

    #[tokio::test]
    async fn renders_diagnostics_without_output() {
        let text = render(&report(ReviewDecision::Reject).await).unwrap();
        assert!(text.contains("did not produce a final output"));
        assert!(text.contains("LAST CONTENT DRAFT"));
        assert!(text.contains("Outcome: rejected"));
    }

    #[test]
    fn excerpts_long_text() {
        let long = "é".repeat(600);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), EXCERPT_CHARS + 3);
    }

    #[test]
    fn save_output_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/nested/result.md");
        save_output(&path, "content").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "content");
    }
}
