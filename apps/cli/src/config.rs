//! CLI configuration loading.

use anyhow::Context;
use jbsw_core::FinetuneConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration plus the file it was read from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: FinetuneConfig,
    pub source: Option<PathBuf>,
}

/// Load the fine-tuning configuration.
///
/// Configuration precedence:
/// 1. CLI arguments (applied per command)
/// 2. `--config <file>`
/// 3. `JBSW_CONFIG`
/// 4. Local config file (./jbsw.toml)
/// 5. Defaults
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<LoadedConfig> {
    let (config, source) =
        FinetuneConfig::discover_and_load(explicit).context("Failed to load configuration")?;

    match &source {
        Some(path) => debug!(path = %path.display(), "Loaded configuration"),
        None => debug!("No configuration file found, using defaults"),
    }

    Ok(LoadedConfig { config, source })
}
