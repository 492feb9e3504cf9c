use crate::error::TrainingResult;
use crate::job::TrainingJobId;
use std::path::{Path, PathBuf};

pub const DEFAULT_RUNS_DIR: &str = "models/.runs";

/// Filesystem layout for per-run bookkeeping.
///
/// Default layout is `models/.runs/<job_id>/...`. The adapter and merged
/// model directories are configured separately and live outside it.
#[derive(Debug, Clone)]
pub struct TrainingLayout {
    root: PathBuf,
}

impl TrainingLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn job_dir(&self, job_id: &TrainingJobId) -> PathBuf {
        self.root.join(job_id.0.as_str())
    }

    #[must_use]
    pub fn job_manifest_path(&self, job_id: &TrainingJobId) -> PathBuf {
        self.job_dir(job_id).join("training_manifest.json")
    }

    #[must_use]
    pub fn job_spec_path(&self, job_id: &TrainingJobId) -> PathBuf {
        self.job_dir(job_id).join("job.json")
    }

    #[must_use]
    pub fn dataset_jsonl_path(&self, job_id: &TrainingJobId) -> PathBuf {
        self.job_dir(job_id).join("dataset.jsonl")
    }

    pub fn ensure_job_dirs(&self, job_id: &TrainingJobId) -> TrainingResult<()> {
        std::fs::create_dir_all(self.job_dir(job_id))?;
        Ok(())
    }
}

impl Default for TrainingLayout {
    fn default() -> Self {
        Self::new(PathBuf::from(DEFAULT_RUNS_DIR))
    }
}
