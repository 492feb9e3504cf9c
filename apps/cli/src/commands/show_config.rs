//! Config command implementation.

use crate::config::LoadedConfig;
use anyhow::{Context, Result};
use colored::Colorize;

pub fn execute(loaded: &LoadedConfig, json_output: bool) -> Result<()> {
    if json_output {
        let out = serde_json::json!({
            "source": loaded.source,
            "config": loaded.config,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let source = loaded
        .source
        .as_ref()
        .map_or_else(|| "defaults (no configuration file)".to_string(), |p| p.display().to_string());
    println!("{}", format!("# Source: {source}").dimmed());
    print!("{}", loaded.config.to_toml().context("Failed to render configuration")?);
    Ok(())
}
