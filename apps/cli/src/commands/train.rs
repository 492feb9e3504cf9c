//! Training command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use jbsw_core::{ExternalTrainer, FinetuneConfig, NvidiaSmiDetector};
use jbsw_training::{ArtifactKind, ProgressEvent, ProgressSink, Trainer, TrainingError, TrainingManifest};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Flag values that replace configuration file values for one run.
#[derive(Debug, Default)]
pub struct TrainOverrides {
    pub data: Option<PathBuf>,
    pub adapter_dir: Option<PathBuf>,
    pub merged_dir: Option<PathBuf>,
    pub epochs: Option<u32>,
}

impl TrainOverrides {
    fn apply(self, config: &mut FinetuneConfig) {
        if let Some(data) = self.data {
            config.paths.data = data;
        }
        if let Some(dir) = self.adapter_dir {
            config.paths.adapter_dir = dir;
        }
        if let Some(dir) = self.merged_dir {
            config.paths.merged_dir = dir;
        }
        if let Some(epochs) = self.epochs {
            config.training.epochs = epochs;
        }
    }
}

pub async fn execute(mut config: FinetuneConfig, overrides: TrainOverrides, json_output: bool) -> Result<()> {
    overrides.apply(&mut config);
    config.validate().context("Invalid training configuration")?;

    let job = config.to_job_spec();
    let detector = Arc::new(NvidiaSmiDetector::new(config.device.nvidia_smi.clone()));
    let trainer = ExternalTrainer::new(config.runner.clone(), config.layout(), detector);

    trainer.prepare(&job).await.context("Training job rejected")?;
    info!(trainer = trainer.id(), job_id = %job.job_id, "Prepared training job");

    if !json_output {
        println!();
        println!("{}", "Fine-tuning".bold().cyan());
        println!("  Model: {}", config.model.name.cyan());
        println!("  Data: {}", config.paths.data.display().to_string().dimmed());
        println!("  Epochs: {}", config.training.epochs);
        println!("  Batch size: {}", config.training.batch_size);
        println!("  Learning rate: {}", config.training.learning_rate);
        println!("  LoRA rank: {}", config.lora.rank);
        println!();
    }

    let sink = ProgressBarSink::new(json_output);
    let run = trainer.run(&job, &sink);
    tokio::pin!(run);
    // The runner has its own process group, so Ctrl-C only reaches us.
    let result = tokio::select! {
        result = &mut run => result,
        Ok(()) = tokio::signal::ctrl_c() => {
            sink.print(format!("{}", "Interrupted, stopping the runner".yellow()));
            trainer.cancel(&job.job_id).await?;
            run.await
        }
    };
    sink.finish();

    let manifest = match result {
        Ok(manifest) => manifest,
        Err(TrainingError::NoAccelerator) => {
            if json_output {
                println!("{}", serde_json::to_string_pretty(&json!({ "status": "no_accelerator" }))?);
            } else {
                println!("{}", "No CUDA GPU found".red().bold());
                println!("  {}", "Training requires an NVIDIA GPU with a working driver (check `jbsw doctor`).".dimmed());
            }
            return Ok(());
        }
        Err(e) => return Err(e).context("Training failed"),
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }

    print_summary(&manifest, &config.paths.merged_dir);
    Ok(())
}

fn print_summary(manifest: &TrainingManifest, merged_dir: &Path) {
    println!();
    println!("{}", "Fine-tuning complete".bold().green());
    println!("  Job: {}", manifest.job_id.to_string().cyan());
    println!("  Examples: {}", manifest.examples);
    if let Some(loss) = manifest.metrics.train_loss {
        println!("  Train loss: {loss:.4}");
    }
    if let Some(adapter) = manifest.artifact(&ArtifactKind::Adapter) {
        println!("  Adapter: {}", adapter.path.display().to_string().cyan());
    }
    if let Some(merged) = manifest.artifact(&ArtifactKind::MergedModel) {
        println!("  Merged model: {}", merged.path.display().to_string().cyan());
    }
    println!();
    println!("{}", "Next steps:".bold());
    println!("  1. Convert to GGUF:");
    println!(
        "     {}",
        format!("python llama.cpp/convert_hf_to_gguf.py {} --outtype q4_k_m", merged_dir.display()).dimmed()
    );
    println!("  2. Register with Ollama:");
    println!("     {}", "ollama create jbsw-llama -f Modelfile".dimmed());
    println!();
}

/// Renders runner progress as a step bar; messages are printed above it.
struct ProgressBarSink {
    bar: ProgressBar,
    quiet: bool,
}

impl ProgressBarSink {
    fn new(quiet: bool) -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden());
        if let Ok(style) = ProgressStyle::with_template("  {bar:40.cyan/blue} {pos}/{len} steps {msg}") {
            bar.set_style(style.progress_chars("=>-"));
        }
        Self { bar, quiet }
    }

    fn print(&self, line: String) {
        if !self.quiet {
            self.bar.suspend(|| println!("{line}"));
        }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for ProgressBarSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { job_id } => {
                self.print(format!("{} {}", "Started job".bold(), job_id.to_string().cyan()));
            }
            ProgressEvent::Message { message, .. } => self.print(format!("  {}", message.dimmed())),
            ProgressEvent::Step { step, total, loss, .. } => {
                if self.quiet {
                    return;
                }
                if self.bar.is_hidden() {
                    self.bar.set_draw_target(ProgressDrawTarget::stderr());
                }
                if let Some(total) = total {
                    self.bar.set_length(total);
                }
                self.bar.set_position(step);
                if let Some(loss) = loss {
                    self.bar.set_message(format!("loss {loss:.4}"));
                }
            }
            ProgressEvent::Saved { artifact, path, .. } => {
                self.print(format!("  {} {}: {}", "✓ Saved".green(), artifact, path.display()));
            }
            ProgressEvent::Finished { .. } => self.finish(),
        }
    }
}
