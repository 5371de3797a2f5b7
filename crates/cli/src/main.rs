//! AgentFlow CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration**: command-line flags and environment variables
//!    (`clap`), then the optional TOML pipeline configuration, validated once.
//! 2. **Wire observability**: `tracing-subscriber` with an env filter, plain
//!    or JSON output, and an optional OpenTelemetry OTLP exporter. All spans
//!    and events emitted by every crate in the workspace flow through it.
//! 3. **Construct infrastructure**: the chat-completion provider, the search
//!    client, the shared rate limiter and the checkpoint store, injected into
//!    the executors and the [`nodes::PipelineDriver`].
//! 4. **Run and report**: drive one run (or resume it by `--run-id`), print
//!    the output and statistics, and map the outcome to an exit code.
//!    `agentflow runs list|delete` manages stored checkpoints instead.
//!
//! Exit codes: `0` when the run finished (approved or forced), `1` when it
//! failed or was rejected, `2` on configuration or credential errors.

mod args;
mod config;
mod report;
mod runs;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info};

use llm::{ChatCompletionsConfig, ChatCompletionsProvider};
use nodes::{CallGateway, ContentCreator, LlmDecisionOracle, PipelineDriver, Researcher, Reviewer, TokioClock};
use pipeline::{CheckpointStore, Clock, ContentBrief, Controller, LlmProvider, RunId, TokenBucket};
use search::{TavilyConfig, TavilySearch};
use store::FileCheckpointStore;

use crate::args::{Cli, Command, ProviderArgs, RunsCommand};

const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _telemetry = match telemetry::init(cli.verbose, cli.log_json, cli.otlp_endpoint.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if let Some(Command::Runs(command)) = &cli.command {
        return match manage_runs(&cli, command).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!(error = %format!("{err:#}"), "Run management failed");
                eprintln!("\nError: {err:#}");
                ExitCode::from(EXIT_FAILURE)
            }
        };
    }

    let driver = match build(&cli).await {
        Ok(driver) => driver,
        Err(err) => {
            error!(error = %format!("{err:#}"), "Configuration failed");
            eprintln!("\nConfiguration error: {err:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match execute(&cli, &driver).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_FAILURE),
        Err(err) => {
            error!(error = %format!("{err:#}"), "Run failed");
            eprintln!("\nError: {err:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn manage_runs(cli: &Cli, command: &RunsCommand) -> Result<()> {
    let store = FileCheckpointStore::open(&cli.checkpoint_dir)
        .await
        .context("failed to open checkpoint directory")?;
    print!("{}", runs::execute(&store, command).await?);
    Ok(())
}

/// Everything that can fail because of configuration or credentials.
async fn build(cli: &Cli) -> Result<PipelineDriver> {
    let config = config::load(cli)?;
    let llm: Arc<dyn LlmProvider> = Arc::new(llm_provider(&cli.providers)?);
    let search = Arc::new(search_provider(&cli.providers)?);

    let clock: Arc<dyn Clock> = Arc::new(TokioClock);
    let limiter = Arc::new(TokenBucket::with_clock(&config.rate_limit, clock.clone())?);
    let mut gateway = CallGateway::new(limiter.clone(), config.retry.clone())
        .with_max_concurrent(config.rate_limit.max_concurrent);
    if let Some(budget) = TokenBucket::token_budget(&config.rate_limit, clock)? {
        gateway = gateway.with_token_budget(Arc::new(budget));
    }
    let gateway = Arc::new(gateway);

    let mut controller = Controller::new(&config);
    if cli.llm_routing {
        controller = controller.with_oracle(Arc::new(LlmDecisionOracle::new(llm.clone(), limiter)));
    }

    let mut driver = PipelineDriver::new(controller)
        .with_executor(Arc::new(Researcher::new(
            search,
            llm.clone(),
            gateway.clone(),
            config.research.clone(),
        )))
        .with_executor(Arc::new(ContentCreator::new(llm.clone(), gateway.clone())))
        .with_executor(Arc::new(Reviewer::new(llm, gateway, &config)));

    if !cli.no_checkpointing {
        let store: Arc<dyn CheckpointStore> = Arc::new(
            FileCheckpointStore::open(&cli.checkpoint_dir)
                .await
                .context("failed to open checkpoint directory")?,
        );
        driver = driver.with_store(store);
    }
    Ok(driver)
}

fn llm_provider(args: &ProviderArgs) -> Result<ChatCompletionsProvider> {
    let key = args
        .llm_api_key
        .clone()
        .context("AGENTFLOW_LLM_API_KEY (or --llm-api-key) is required")?;
    let mut config = ChatCompletionsConfig::new(key);
    config.base_url = args.llm_base_url.clone();
    config.model = args.llm_model.clone();
    config.api_version = args.llm_api_version.clone();
    ChatCompletionsProvider::new(config).context("invalid language-model settings")
}

fn search_provider(args: &ProviderArgs) -> Result<TavilySearch> {
    let key = args
        .search_api_key
        .clone()
        .context("AGENTFLOW_SEARCH_API_KEY (or --search-api-key) is required")?;
    let mut config = TavilyConfig::new(key);
    config.base_url = args.search_base_url.clone();
    TavilySearch::new(config).context("invalid search settings")
}

/// Runs the pipeline; returns whether it finished without a rejection.
async fn execute(cli: &Cli, driver: &PipelineDriver) -> Result<bool> {
    let Some(task) = cli.task.as_deref() else {
        bail!("a task is required");
    };
    let run_id = match &cli.run_id {
        Some(id) => RunId::new(id.as_str()).context("--run-id must not be blank")?,
        None => RunId::generate(),
    };
    let brief = ContentBrief {
        content_type: cli.content_type.into(),
        audience: cli.audience.clone(),
    };

    println!("\n{}", "=".repeat(80));
    println!("MULTI-AGENT RESEARCH & CONTENT PIPELINE");
    println!("{}", "=".repeat(80));
    println!("\nTask: {task}");
    println!("Content Type: {}", brief.content_type);
    println!("Audience: {}", brief.audience);
    println!("Run ID: {run_id}");

    info!(%run_id, task, "Starting run");
    let report = driver
        .run(&run_id, task, brief)
        .await
        .with_context(|| format!("run {run_id} failed; rerun with --run-id {run_id} to resume"))?;

    print!("{}", report::render(&report)?);

    if let (Some(path), Some(output)) = (&cli.save_output, report.state.final_output()) {
        report::save_output(path, output)?;
        println!("\nOutput saved to: {}", path.display());
    }
    Ok(report.succeeded())
}
