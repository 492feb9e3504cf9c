//! Fine-tuning configuration file support.
//!
//! Every section defaults to the values the JBSW model was originally trained
//! with, so an empty (or absent) file reproduces that run.

use crate::training::RunnerConfig;
use jbsw_training::dataset::DEFAULT_DATA_PATH;
use jbsw_training::job::{DEFAULT_ADAPTER_DIR, DEFAULT_MERGED_DIR};
use jbsw_training::layout::DEFAULT_RUNS_DIR;
use jbsw_training::{
    DatasetSpec, LoraConfig, MergeMethod, ModelSpec, OutputSpec, PromptTemplate,
    TrainingHyperParams, TrainingJobSpec, TrainingLayout, DEFAULT_TEXT_FIELD,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming a configuration file.
pub const CONFIG_ENV_VAR: &str = "JBSW_CONFIG";

/// Configuration file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "jbsw.toml";

/// Fine-tuning configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinetuneConfig {
    pub model: ModelSpec,
    pub lora: LoraConfig,
    pub training: TrainingHyperParams,
    pub prompt: PromptTemplate,
    pub paths: PathsConfig,
    pub runner: RunnerConfig,
    pub device: DeviceConfig,
}

/// Input and output locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data: PathBuf,
    pub text_field: String,
    pub adapter_dir: PathBuf,
    pub merged_dir: PathBuf,
    pub merge_method: MergeMethod,
    /// Per-run bookkeeping (staged dataset, job file, manifest).
    pub runs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data: PathBuf::from(DEFAULT_DATA_PATH),
            text_field: DEFAULT_TEXT_FIELD.to_string(),
            adapter_dir: PathBuf::from(DEFAULT_ADAPTER_DIR),
            merged_dir: PathBuf::from(DEFAULT_MERGED_DIR),
            merge_method: MergeMethod::default(),
            runs_dir: PathBuf::from(DEFAULT_RUNS_DIR),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// `nvidia-smi` binary used for accelerator discovery.
    pub nvidia_smi: PathBuf,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { nvidia_smi: PathBuf::from("nvidia-smi") }
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl FinetuneConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> ConfigResult<()> {
        let content = self.to_toml()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::ReadError(format!("Failed to create directory: {}", e)))?;
        }

        std::fs::write(path, content)
            .map_err(|e| ConfigError::ReadError(format!("Failed to write file: {}", e)))?;

        Ok(())
    }

    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(format!("Failed to serialize: {}", e)))
    }

    /// Discover and load the configuration file.
    ///
    /// Lookup order:
    /// 1. `explicit` (must exist)
    /// 2. `$JBSW_CONFIG` (must exist)
    /// 3. `./jbsw.toml` (optional)
    /// 4. Defaults
    ///
    /// Returns the configuration and the file it came from, if any.
    pub fn discover_and_load(explicit: Option<&Path>) -> ConfigResult<(Self, Option<PathBuf>)> {
        let env_path = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
        Self::discover_from(explicit, env_path.as_deref(), Path::new(DEFAULT_CONFIG_FILE))
    }

    fn discover_from(
        explicit: Option<&Path>,
        env_path: Option<&Path>,
        local_path: &Path,
    ) -> ConfigResult<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit.or(env_path) {
            let config = Self::load_from_file(path)?;
            config.validate()?;
            return Ok((config, Some(path.to_path_buf())));
        }

        if local_path.exists() {
            let config = Self::load_from_file(local_path)?;
            config.validate()?;
            return Ok((config, Some(local_path.to_path_buf())));
        }

        Ok((Self::default(), None))
    }

    /// Reject values the training job would reject anyway, at load time.
    pub fn validate(&self) -> ConfigResult<()> {
        self.to_job_spec().validate().map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        if self.runner.program.trim().is_empty() {
            return Err(ConfigError::InvalidValue("runner.program is required".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn layout(&self) -> TrainingLayout {
        TrainingLayout::new(self.paths.runs_dir.clone())
    }

    /// Build a fresh job (new id, current timestamp) from this configuration.
    #[must_use]
    pub fn to_job_spec(&self) -> TrainingJobSpec {
        let mut job = TrainingJobSpec::new(
            self.model.clone(),
            DatasetSpec { path: self.paths.data.clone(), text_field: self.paths.text_field.clone() },
            OutputSpec {
                adapter_dir: self.paths.adapter_dir.clone(),
                merged_dir: self.paths.merged_dir.clone(),
                merge_method: self.paths.merge_method,
            },
        );
        job.lora = self.lora.clone();
        job.hyperparams = self.training.clone();
        job.template = self.prompt.clone();
        job
    }
}
