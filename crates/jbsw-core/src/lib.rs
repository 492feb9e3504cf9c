//! JBSW Core - configuration and concrete training backends.
//!
//! This crate provides:
//! - `FinetuneConfig`, the TOML configuration for a fine-tuning run
//! - `NvidiaSmiDetector`, accelerator discovery through `nvidia-smi`
//! - `ExternalTrainer`, a `Trainer` that delegates the model work to an
//!   external SFT runner process and supervises it

pub mod config;
pub mod training;

pub use config::{ConfigError, ConfigResult, FinetuneConfig};
pub use training::{ExternalTrainer, NvidiaSmiDetector, RunnerConfig, RunnerEvent, RunnerJob};
