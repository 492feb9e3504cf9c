//! Contract between [`ExternalTrainer`](super::ExternalTrainer) and the SFT
//! runner process.
//!
//! The runner receives the path of a `job.json` file (as its last argument and
//! in `JBSW_JOB_FILE`) and reports progress as JSON lines on stdout. Lines that
//! are not runner events are relayed verbatim.
//!
//! `training.precision` is `auto` only when the compute capability could not
//! be read; the runner then picks bf16 or fp16 itself.

use jbsw_training::{
    AcceleratorInfo, LoraConfig, ModelSpec, OutputSpec, Precision, TrainingJobId, TrainingJobSpec,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const ENV_JOB_FILE: &str = "JBSW_JOB_FILE";
pub const ENV_DATASET_FILE: &str = "JBSW_DATASET_FILE";
pub const ENV_ADAPTER_DIR: &str = "JBSW_ADAPTER_DIR";
pub const ENV_MERGED_DIR: &str = "JBSW_MERGED_DIR";

/// How to launch the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["-m".to_string(), "jbsw_sft_runner".to_string()],
            env: BTreeMap::new(),
            working_dir: None,
        }
    }
}

/// Trainer arguments with every choice already resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerTrainingArgs {
    pub output_dir: PathBuf,
    pub per_device_train_batch_size: u32,
    pub gradient_accumulation_steps: u32,
    pub learning_rate: f64,
    pub num_train_epochs: u32,
    pub warmup_steps: u32,
    pub logging_steps: u32,
    pub save_steps: u32,
    pub save_total_limit: u32,
    pub precision: Precision,
    pub fp16: bool,
    pub bf16: bool,
    pub optim: String,
    pub weight_decay: f64,
    pub lr_scheduler_type: String,
    pub seed: u64,
    pub report_to: String,
    pub max_steps_hint: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerDataset {
    pub path: PathBuf,
    pub text_field: String,
    pub examples: usize,
}

/// Everything the runner needs, written to `job.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerJob {
    pub job_id: TrainingJobId,
    pub model: ModelSpec,
    pub lora: LoraConfig,
    pub training: RunnerTrainingArgs,
    pub dataset: RunnerDataset,
    pub outputs: OutputSpec,
    pub accelerator: AcceleratorInfo,
}

impl RunnerJob {
    /// Resolve a job spec against the detected accelerator and the staged
    /// dataset. Output paths must already be absolute.
    #[must_use]
    pub fn resolve(
        job: &TrainingJobSpec,
        accelerator: &AcceleratorInfo,
        dataset: RunnerDataset,
        outputs: OutputSpec,
    ) -> Self {
        let hp = &job.hyperparams;
        let precision = hp.precision.resolve(accelerator);

        Self {
            job_id: job.job_id.clone(),
            model: job.model.clone(),
            lora: job.lora.clone(),
            training: RunnerTrainingArgs {
                output_dir: outputs.adapter_dir.clone(),
                per_device_train_batch_size: hp.batch_size,
                gradient_accumulation_steps: hp.gradient_accumulation_steps,
                learning_rate: hp.learning_rate,
                num_train_epochs: hp.epochs,
                warmup_steps: hp.warmup_steps,
                logging_steps: hp.logging_steps,
                save_steps: hp.save_steps,
                save_total_limit: hp.save_total_limit,
                precision,
                fp16: precision.is_fp16(),
                bf16: precision.is_bf16(),
                optim: hp.optimizer.clone(),
                weight_decay: hp.weight_decay,
                lr_scheduler_type: hp.lr_scheduler.clone(),
                seed: hp.seed,
                report_to: "none".to_string(),
                max_steps_hint: hp.total_steps(dataset.examples),
            },
            dataset,
            outputs,
            accelerator: accelerator.clone(),
        }
    }
}

/// One progress report from the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunnerEvent {
    Log {
        step: u64,
        #[serde(default)]
        loss: Option<f64>,
        #[serde(default)]
        learning_rate: Option<f64>,
        #[serde(default)]
        epoch: Option<f64>,
    },
    Message {
        message: String,
    },
    Saved {
        artifact: String,
        path: PathBuf,
    },
    Metrics {
        #[serde(default)]
        train_loss: Option<f64>,
        #[serde(default)]
        eval_loss: Option<f64>,
        #[serde(default)]
        steps: Option<u64>,
        #[serde(default)]
        runtime_seconds: Option<f64>,
    },
}

impl RunnerEvent {
    /// Parse a stdout line; `None` for anything that is not an event.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        serde_json::from_str(line).ok()
    }
}
