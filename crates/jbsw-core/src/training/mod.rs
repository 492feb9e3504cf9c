//! Training backends.
//!
//! The backend-agnostic types live in `jbsw-training`. This module contains
//! the concrete pieces used by the `jbsw` binary.

pub mod external_trainer;
pub mod nvidia_smi;
pub mod runner;

pub use external_trainer::ExternalTrainer;
pub use nvidia_smi::{parse_nvidia_smi_output, NvidiaSmiDetector};
pub use runner::{RunnerConfig, RunnerEvent, RunnerJob, RunnerTrainingArgs};
