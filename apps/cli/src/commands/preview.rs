//! Preview command implementation.
//!
//! Renders training prompts exactly as they will be handed to the trainer.

use anyhow::{Context, Result};
use colored::Colorize;
use jbsw_core::FinetuneConfig;
use jbsw_training::{find_reserved_markers, load_training_data, TextDataset, TrainingRecord};
use serde_json::json;
use std::path::PathBuf;
use tracing::warn;

pub fn execute(
    config: &FinetuneConfig,
    data: Option<PathBuf>,
    limit: usize,
    write: Option<PathBuf>,
    json_output: bool,
) -> Result<()> {
    let data = data.unwrap_or_else(|| config.paths.data.clone());
    let records = load_training_data(&data).context("Failed to load training data")?;
    let dataset = TextDataset::from_records_with_field(&records, &config.prompt, &config.paths.text_field);

    let flagged: Vec<(usize, Vec<&'static str>)> = records
        .iter()
        .enumerate()
        .filter_map(|(i, record)| {
            let markers = record_markers(record);
            (!markers.is_empty()).then_some((i + 1, markers))
        })
        .collect();
    for (line, markers) in &flagged {
        warn!(record = line, markers = ?markers, "Record contains chat template markers");
    }

    if let Some(path) = &write {
        dataset.write_jsonl(path).with_context(|| format!("Failed to write {}", path.display()))?;
    }

    if json_output {
        let prompts: Vec<_> = dataset
            .iter()
            .take(limit)
            .enumerate()
            .map(|(i, text)| json!({ "index": i + 1, "text": text }))
            .collect();
        let warnings: Vec<_> =
            flagged.iter().map(|(line, markers)| json!({ "record": line, "markers": markers })).collect();
        let out = json!({
            "data": data,
            "examples": dataset.len(),
            "dataset_id": dataset.dataset_id()?.0,
            "prompts": prompts,
            "reserved_markers": warnings,
            "written": write,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Training Prompts ({} examples)", dataset.len()).bold().cyan());
    println!("  Data: {}", data.display().to_string().dimmed());
    println!();

    for (i, text) in dataset.iter().take(limit).enumerate() {
        println!("{}", format!("── #{} ", i + 1).bold());
        println!("{text}");
        println!();
    }
    if dataset.len() > limit {
        println!("  {}", format!("… {} more", dataset.len() - limit).dimmed());
        println!();
    }

    if !flagged.is_empty() {
        println!("{}", "Warning: chat template markers in training data".yellow().bold());
        for (line, markers) in &flagged {
            println!("  Record {}: {}", line, markers.join(", ").yellow());
        }
        println!("  {}", "These are copied into prompts verbatim and will split turns.".dimmed());
        println!();
    }

    if let Some(path) = &write {
        println!("  {} {}", "✓ Wrote".green(), path.display());
        println!();
    }

    Ok(())
}

fn record_markers(record: &TrainingRecord) -> Vec<&'static str> {
    let mut markers = find_reserved_markers(&record.instruction);
    markers.extend(record.input.as_deref().map(find_reserved_markers).unwrap_or_default());
    markers.extend(find_reserved_markers(&record.output));
    markers.sort_unstable();
    markers.dedup();
    markers
}
