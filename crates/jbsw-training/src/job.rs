use crate::dataset::DatasetSpec;
use crate::device::Precision;
use crate::error::{TrainingError, TrainingResult};
use crate::template::PromptTemplate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

pub const DEFAULT_MODEL_NAME: &str = "unsloth/Meta-Llama-3.1-8B-Instruct-bnb-4bit";
pub const DEFAULT_ADAPTER_DIR: &str = "models/llama3.1-8b-jbsw-lora";
pub const DEFAULT_MERGED_DIR: &str = "models/llama3.1-8b-jbsw-merged";

pub const DEFAULT_TARGET_MODULES: &[&str] =
    &["q_proj", "k_proj", "v_proj", "o_proj", "gate_proj", "up_proj", "down_proj"];

/// Identifier for a training job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainingJobId(pub String);

impl TrainingJobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TrainingJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TrainingJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Pretrained base model, loaded by name by the training framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSpec {
    pub name: String,
    pub max_seq_length: u32,
    pub load_in_4bit: bool,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self { name: DEFAULT_MODEL_NAME.to_string(), max_seq_length: 2048, load_in_4bit: true }
    }
}

/// Low-rank adapter attached to the quantized base model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraConfig {
    pub rank: u32,
    pub alpha: u32,
    pub dropout: f64,
    pub target_modules: Vec<String>,
    /// Bias training mode (`none`, `all`, `lora_only`).
    pub bias: String,
    /// Gradient checkpointing mode passed through to the framework.
    pub gradient_checkpointing: String,
    pub random_state: u64,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            rank: 16,
            alpha: 16,
            dropout: 0.0,
            target_modules: DEFAULT_TARGET_MODULES.iter().map(|m| (*m).to_string()).collect(),
            bias: "none".to_string(),
            gradient_checkpointing: "unsloth".to_string(),
            random_state: 42,
        }
    }
}

impl LoraConfig {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.rank == 0 {
            return Err(TrainingError::InvalidSpec("lora.rank must be >= 1".to_string()));
        }
        if self.alpha == 0 {
            return Err(TrainingError::InvalidSpec("lora.alpha must be >= 1".to_string()));
        }
        if !self.dropout.is_finite() || !(0.0..1.0).contains(&self.dropout) {
            return Err(TrainingError::InvalidSpec("lora.dropout must be in [0, 1)".to_string()));
        }
        if self.target_modules.is_empty() {
            return Err(TrainingError::InvalidSpec("lora.target_modules must not be empty".to_string()));
        }
        if !matches!(self.bias.as_str(), "none" | "all" | "lora_only") {
            return Err(TrainingError::InvalidSpec(format!(
                "lora.bias must be one of none, all, lora_only (got {})",
                self.bias
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingHyperParams {
    pub batch_size: u32,
    pub gradient_accumulation_steps: u32,
    pub learning_rate: f64,
    pub epochs: u32,
    pub warmup_steps: u32,
    pub logging_steps: u32,
    pub save_steps: u32,
    pub save_total_limit: u32,
    pub optimizer: String,
    pub weight_decay: f64,
    pub lr_scheduler: String,
    pub seed: u64,
    pub precision: Precision,
}

impl Default for TrainingHyperParams {
    fn default() -> Self {
        Self {
            batch_size: 2,
            gradient_accumulation_steps: 4,
            learning_rate: 2e-4,
            epochs: 3,
            warmup_steps: 10,
            logging_steps: 10,
            save_steps: 100,
            save_total_limit: 3,
            optimizer: "adamw_8bit".to_string(),
            weight_decay: 0.01,
            lr_scheduler: "linear".to_string(),
            seed: 42,
            precision: Precision::Auto,
        }
    }
}

impl TrainingHyperParams {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.epochs == 0 {
            return Err(TrainingError::InvalidSpec("epochs must be >= 1".to_string()));
        }
        if !(self.learning_rate.is_finite()) || self.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidSpec("learning_rate must be > 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidSpec("batch_size must be >= 1".to_string()));
        }
        if self.gradient_accumulation_steps == 0 {
            return Err(TrainingError::InvalidSpec(
                "gradient_accumulation_steps must be >= 1".to_string(),
            ));
        }
        if self.logging_steps == 0 || self.save_steps == 0 {
            return Err(TrainingError::InvalidSpec(
                "logging_steps and save_steps must be >= 1".to_string(),
            ));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(TrainingError::InvalidSpec("weight_decay must be >= 0".to_string()));
        }
        if self.optimizer.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("optimizer is required".to_string()));
        }
        Ok(())
    }

    /// Samples consumed per optimizer step.
    #[must_use]
    pub fn effective_batch_size(&self) -> u64 {
        u64::from(self.batch_size) * u64::from(self.gradient_accumulation_steps)
    }

    /// Optimizer steps for a dataset of `examples` rows, counted the way the
    /// framework counts them (partial batches and partial accumulation
    /// windows each still produce a step).
    #[must_use]
    pub fn total_steps(&self, examples: usize) -> u64 {
        let batch = u64::from(self.batch_size.max(1));
        let accum = u64::from(self.gradient_accumulation_steps.max(1));
        let batches = (examples as u64).div_ceil(batch);
        let per_epoch = batches.div_ceil(accum);
        per_epoch * u64::from(self.epochs)
    }
}

/// How the adapter is folded back into the base weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MergeMethod {
    #[default]
    #[serde(rename = "merged_16bit")]
    Merged16Bit,
    #[serde(rename = "merged_4bit")]
    Merged4Bit,
}

impl MergeMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Merged16Bit => "merged_16bit",
            Self::Merged4Bit => "merged_4bit",
        }
    }
}

/// Output directories. The adapter directory also receives the framework's
/// intermediate checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSpec {
    pub adapter_dir: PathBuf,
    pub merged_dir: PathBuf,
    pub merge_method: MergeMethod,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            adapter_dir: PathBuf::from(DEFAULT_ADAPTER_DIR),
            merged_dir: PathBuf::from(DEFAULT_MERGED_DIR),
            merge_method: MergeMethod::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJobSpec {
    pub job_id: TrainingJobId,
    pub created_at: DateTime<Utc>,
    pub model: ModelSpec,
    pub lora: LoraConfig,
    pub hyperparams: TrainingHyperParams,
    pub template: PromptTemplate,
    pub dataset: DatasetSpec,
    pub outputs: OutputSpec,
}

impl TrainingJobSpec {
    #[must_use]
    pub fn new(model: ModelSpec, dataset: DatasetSpec, outputs: OutputSpec) -> Self {
        Self {
            job_id: TrainingJobId::new(),
            created_at: Utc::now(),
            model,
            lora: LoraConfig::default(),
            hyperparams: TrainingHyperParams::default(),
            template: PromptTemplate::default(),
            dataset,
            outputs,
        }
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.model.name.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("model.name is required".to_string()));
        }
        if self.model.max_seq_length == 0 {
            return Err(TrainingError::InvalidSpec("model.max_seq_length must be >= 1".to_string()));
        }
        if self.dataset.path.as_os_str().is_empty() {
            return Err(TrainingError::InvalidSpec("dataset.path is required".to_string()));
        }
        if self.dataset.text_field.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("dataset.text_field is required".to_string()));
        }
        if self.outputs.adapter_dir.as_os_str().is_empty()
            || self.outputs.merged_dir.as_os_str().is_empty()
        {
            return Err(TrainingError::InvalidSpec("output directories are required".to_string()));
        }
        if self.outputs.adapter_dir == self.outputs.merged_dir {
            return Err(TrainingError::InvalidSpec(
                "adapter_dir and merged_dir must differ".to_string(),
            ));
        }
        self.lora.validate()?;
        self.hyperparams.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> TrainingJobSpec {
        TrainingJobSpec::new(ModelSpec::default(), DatasetSpec::default(), OutputSpec::default())
    }

    #[test]
    fn test_default_job_is_valid() {
        job().validate().unwrap();
    }

    #[test]
    fn test_job_spec_validate_requires_model_name() {
        let mut spec = job();
        spec.model.name = "  ".to_string();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_output_dirs_must_differ() {
        let mut spec = job();
        spec.outputs.merged_dir = spec.outputs.adapter_dir.clone();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_lora_validation() {
        let mut spec = job();
        spec.lora.dropout = 1.5;
        assert!(spec.validate().is_err());

        let mut spec = job();
        spec.lora.target_modules.clear();
        assert!(spec.validate().is_err());

        let mut spec = job();
        spec.lora.bias = "some".to_string();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_total_steps() {
        let hp = TrainingHyperParams::default();
        assert_eq!(hp.effective_batch_size(), 8);
        // 100 rows -> 50 batches -> 13 optimizer steps per epoch -> 39 over 3 epochs
        assert_eq!(hp.total_steps(100), 39);
        assert_eq!(hp.total_steps(0), 0);
        assert_eq!(hp.total_steps(1), 3);
    }

    #[test]
    fn test_merge_method_serde() {
        let json = serde_json::to_string(&MergeMethod::Merged16Bit).unwrap();
        assert_eq!(json, "\"merged_16bit\"");
        let parsed: MergeMethod = serde_json::from_str("\"merged_4bit\"").unwrap();
        assert_eq!(parsed, MergeMethod::Merged4Bit);
    }
}
