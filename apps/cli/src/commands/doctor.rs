//! Doctor command implementation.
//!
//! Checks the GPU, training data, runner and configuration before a run.

use crate::config::LoadedConfig;
use colored::Colorize;
use jbsw_core::NvidiaSmiDetector;
use jbsw_training::{load_training_data, AcceleratorInfo, DeviceDetector, Precision};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// Execute the doctor command.
pub async fn execute(loaded: &LoadedConfig, json_output: bool) -> anyhow::Result<()> {
    let report = DoctorReport::collect(loaded).await;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&report.to_json(loaded))?);
    } else {
        report.print(loaded);
    }
    Ok(())
}

struct DoctorReport {
    accelerator: Result<Option<AcceleratorInfo>, String>,
    precision: Precision,
    data: Result<usize, String>,
    runner: Option<PathBuf>,
}

impl DoctorReport {
    async fn collect(loaded: &LoadedConfig) -> Self {
        let config = &loaded.config;
        let detector = NvidiaSmiDetector::new(config.device.nvidia_smi.clone());
        let accelerator = detector.detect().await.map_err(|e| e.to_string());
        let precision = match &accelerator {
            Ok(Some(info)) => config.training.precision.resolve(info),
            _ => config.training.precision,
        };
        let data = load_training_data(&config.paths.data).map(|r| r.len()).map_err(|e| e.to_string());
        let runner = which_program(&config.runner.program);

        Self { accelerator, precision, data, runner }
    }

    fn print(&self, loaded: &LoadedConfig) {
        let config = &loaded.config;
        println!("{}", "JBSW Doctor - Environment Validation".bold().cyan());
        println!();

        println!("{}", "GPU:".bold());
        match &self.accelerator {
            Ok(Some(info)) => {
                println!("  Status: {}", format!("✓ {}", info.name).green());
                println!("  Memory: {:.1} GB", info.total_memory_gb());
                match info.compute_capability {
                    Some((major, minor)) => println!("  Compute capability: {major}.{minor}"),
                    None => println!("  Compute capability: {}", "unknown".dimmed()),
                }
                println!("  Precision: {}", self.precision.as_str().cyan());
            }
            Ok(None) => {
                println!("  Status: {}", "✗ No CUDA GPU found".red());
                println!("  {}", format!("Query: {}", config.device.nvidia_smi.display()).dimmed());
            }
            Err(e) => println!("  Status: {}", format!("✗ Detection failed - {e}").red()),
        }
        println!();

        println!("{}", "Training Data:".bold());
        println!("  Path: {}", config.paths.data.display().to_string().dimmed());
        match &self.data {
            Ok(0) => println!("  Status: {}", "⚠ No examples".yellow()),
            Ok(n) => println!("  Status: {}", format!("✓ {n} examples").green()),
            Err(e) => println!("  Status: {}", format!("✗ {e}").red()),
        }
        println!();

        println!("{}", "Runner:".bold());
        let command_line = std::iter::once(config.runner.program.as_str())
            .chain(config.runner.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        println!("  Command: {}", command_line.dimmed());
        match &self.runner {
            Some(path) => println!("  Status: {}", format!("✓ {}", path.display()).green()),
            None => println!("  Status: {}", format!("✗ {} not found", config.runner.program).red()),
        }
        println!();

        println!("{}", "Configuration:".bold());
        match &loaded.source {
            Some(path) => println!("  File: {}", path.display().to_string().dimmed()),
            None => println!("  File: {}", "none (defaults)".dimmed()),
        }
        println!("  Model: {}", config.model.name.dimmed());
        println!("  Runs: {}", config.paths.runs_dir.display().to_string().dimmed());
        println!();

        if self.is_ready() {
            println!("{}", "✓ Ready to train".green().bold());
        } else {
            println!("{}", "⚠ Not ready to train".yellow().bold());
        }
    }

    fn is_ready(&self) -> bool {
        matches!(self.accelerator, Ok(Some(_))) && matches!(self.data, Ok(n) if n > 0) && self.runner.is_some()
    }

    fn to_json(&self, loaded: &LoadedConfig) -> Value {
        let gpu = match &self.accelerator {
            Ok(Some(info)) => json!({
                "status": "ok",
                "name": info.name,
                "total_memory_mib": info.total_memory_mib,
                "compute_capability": info.compute_capability.map(|(major, minor)| format!("{major}.{minor}")),
                "supports_bf16": info.supports_bf16(),
            }),
            Ok(None) => json!({ "status": "missing" }),
            Err(e) => json!({ "status": "error", "error": e }),
        };
        let data = match &self.data {
            Ok(n) => json!({ "status": "ok", "path": loaded.config.paths.data, "examples": n }),
            Err(e) => json!({ "status": "error", "path": loaded.config.paths.data, "error": e }),
        };

        json!({
            "ready": self.is_ready(),
            "gpu": gpu,
            "precision": self.precision.as_str(),
            "data": data,
            "runner": {
                "program": loaded.config.runner.program,
                "args": loaded.config.runner.args,
                "resolved": self.runner,
            },
            "config_file": loaded.source,
        })
    }
}

/// Resolve a program the way a shell would: paths as given, bare names on `PATH`.
fn which_program(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }
    which_on_path(program)
}

fn which_on_path(name: &str) -> Option<PathBuf> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths).find_map(|dir| {
            let candidate = dir.join(name);
            candidate.is_file().then_some(candidate)
        })
    })
}
