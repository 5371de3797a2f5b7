//! Pipeline configuration: TOML file, then command-line overrides.

use std::path::Path;

use anyhow::{Context, Result};
use pipeline::PipelineConfig;
use tracing::info;

use crate::args::Cli;

/// Loads the configuration file (if any), applies flag overrides and
/// validates the result.
pub fn load(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => read(path)?,
        None => {
            info!("Using default configuration");
            PipelineConfig::default()
        }
    };
    if let Some(max_iterations) = cli.max_iterations {
        config.max_iterations = max_iterations;
    }
    config.validate().context("invalid pipeline configuration")?;
    Ok(config)
}

fn read(path: &Path) -> Result<PipelineConfig> {
    info!(path = %path.display(), "Loading configuration");
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{}'", path.display()))?;
    toml::from_str(&text).with_context(|| format!("failed to parse config file '{}'", path.display()))
}
