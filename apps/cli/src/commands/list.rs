//! List command implementation.

use anyhow::{Context, Result};
use chrono::Local;
use colored::Colorize;
use jbsw_core::FinetuneConfig;
use jbsw_training::discover_runs;
use serde_json::json;

pub fn execute(config: &FinetuneConfig, json_output: bool) -> Result<()> {
    let layout = config.layout();
    let runs = discover_runs(&layout).context("Failed to discover training runs")?;

    if json_output {
        let out: Vec<_> = runs
            .iter()
            .map(|run| {
                json!({
                    "job_id": run.manifest.job_id.0,
                    "finished_at": run.manifest.finished_at,
                    "model": run.manifest.model.name,
                    "dataset_id": run.manifest.dataset_id.0,
                    "examples": run.manifest.examples,
                    "train_loss": run.manifest.metrics.train_loss,
                    "adapter_dir": run.adapter_dir(),
                    "merged_dir": run.merged_dir(),
                    "manifest_path": run.manifest_path,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Training Runs ({})", runs.len()).bold().cyan());
    println!();

    if runs.is_empty() {
        println!("  {}", "No completed training runs found.".dimmed());
        println!("  {}", format!("Runs directory: {}", layout.root().display()).dimmed());
        println!();
        println!("  {}", "Tip: start one with `jbsw train`.".dimmed());
        return Ok(());
    }

    println!("{:<38} {:<17} {:>8} {:>10}  {}", "Job", "Finished", "Examples", "Loss", "Merged model");
    println!("{}", "─".repeat(110));
    for run in &runs {
        let finished = run.manifest.finished_at.with_timezone(&Local).format("%Y-%m-%d %H:%M");
        let loss = run.manifest.metrics.train_loss.map_or_else(|| "-".to_string(), |l| format!("{l:.4}"));
        let merged = run.merged_dir().map_or_else(|| "-".to_string(), |p| p.display().to_string());
        println!(
            "{:<38} {:<17} {:>8} {:>10}  {}",
            run.manifest.job_id.0.cyan(),
            finished.to_string().dimmed(),
            run.manifest.examples,
            loss,
            merged.dimmed()
        );
    }
    println!();
    Ok(())
}
