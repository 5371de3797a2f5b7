//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use pipeline::ContentType;

/// AgentFlow: research a topic, draft content, review it, repeat until it
/// is good enough.
#[derive(Parser, Debug)]
#[command(
    name = "agentflow",
    version,
    about = "Multi-agent research and content pipeline",
    after_help = "EXAMPLES:\n    \
                  agentflow \"Research the benefits of meditation\"\n    \
                  agentflow \"Analyze quantum computing trends\" --content-type report\n    \
                  agentflow \"Study climate change impacts\" -v --save-output results.md\n    \
                  agentflow \"Study climate change impacts\" --run-id run_1a2b3c4d   # resume\n    \
                  agentflow runs list\n    \
                  agentflow runs delete run_1a2b3c4d",
    subcommand_negates_reqs = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Research task or topic to process
    #[arg(required = true)]
    pub task: Option<String>,

    /// Type of content to generate
    #[arg(long, value_enum, default_value_t = ContentTypeArg::BlogPost)]
    pub content_type: ContentTypeArg,

    /// Target audience
    #[arg(long, default_value = "general audience")]
    pub audience: String,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Save the final output to FILE
    #[arg(long, value_name = "FILE")]
    pub save_output: Option<PathBuf>,

    /// Disable state checkpointing
    #[arg(long)]
    pub no_checkpointing: bool,

    /// Override the maximum number of Controller decisions
    #[arg(long, value_name = "N")]
    pub max_iterations: Option<u32>,

    /// Pipeline configuration file (TOML)
    #[arg(short, long, value_name = "FILE", env = "AGENTFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Run identifier; an existing checkpoint with this id is resumed
    #[arg(long, value_name = "ID")]
    pub run_id: Option<String>,

    /// Directory holding checkpoint files
    #[arg(
        long,
        value_name = "DIR",
        env = "AGENTFLOW_CHECKPOINT_DIR",
        default_value = ".agentflow/checkpoints",
        global = true
    )]
    pub checkpoint_dir: PathBuf,

    /// Ask the language model to propose each routing step
    #[arg(long)]
    pub llm_routing: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export traces to this OTLP (gRPC) endpoint
    #[arg(long, value_name = "URL", env = "AGENTFLOW_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[command(flatten)]
    pub providers: ProviderArgs,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Inspect or remove stored runs
    #[command(subcommand)]
    Runs(RunsCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum RunsCommand {
    /// List checkpointed runs
    List,
    /// Delete the checkpoint of a run
    Delete {
        /// Run identifier
        run_id: String,
    },
}

/// Credentials and endpoints for the external services.
#[derive(clap::Args, Debug, Clone)]
pub struct ProviderArgs {
    /// API key for the chat-completion endpoint
    #[arg(long, env = "AGENTFLOW_LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Chat-completion endpoint root (an Azure deployment URL also works)
    #[arg(long, env = "AGENTFLOW_LLM_BASE_URL", default_value = llm::DEFAULT_BASE_URL)]
    pub llm_base_url: String,

    /// Model name
    #[arg(long, env = "AGENTFLOW_LLM_MODEL", default_value = llm::DEFAULT_MODEL)]
    pub llm_model: String,

    /// Azure OpenAI API version; switches to Azure request conventions
    #[arg(long, env = "AGENTFLOW_LLM_API_VERSION")]
    pub llm_api_version: Option<String>,

    /// API key for the search service
    #[arg(long, env = "AGENTFLOW_SEARCH_API_KEY", hide_env_values = true)]
    pub search_api_key: Option<String>,

    /// Search service endpoint root
    #[arg(long, env = "AGENTFLOW_SEARCH_BASE_URL", default_value = search::DEFAULT_BASE_URL)]
    pub search_base_url: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentTypeArg {
    BlogPost,
    Article,
    Report,
    Summary,
}

impl From<ContentTypeArg> for ContentType {
    fn from(arg: ContentTypeArg) -> Self {
        match arg {
            ContentTypeArg::BlogPost => ContentType::BlogPost,
            ContentTypeArg::Article => ContentType::Article,
            ContentTypeArg::Report => ContentType::Report,
            ContentTypeArg::Summary => ContentType::Summary,
        }
    }
}
