use crate::artifacts::TrainingManifest;
use crate::error::TrainingResult;
use crate::job::{TrainingJobId, TrainingJobSpec};
use crate::progress::ProgressSink;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainerStatus {
    Idle,
    Preparing,
    Running,
    Finished,
    Failed(String),
    Cancelled,
}

/// A training backend.
///
/// Implementations own everything from the accelerator check to the saved
/// adapter and merged model; callers only see the resulting manifest.
#[async_trait]
pub trait Trainer: Send + Sync {
    fn id(&self) -> &'static str;

    async fn prepare(&self, job: &TrainingJobSpec) -> TrainingResult<()>;

    async fn run(
        &self,
        job: &TrainingJobSpec,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<TrainingManifest>;

    async fn status(&self, job_id: &TrainingJobId) -> TrainingResult<TrainerStatus>;

    /// Stop a running job. `run` then returns `TrainingError::Cancelled`.
    ///
    /// Backends that launch processes stop the whole process tree they
    /// started, not only the direct child.
    async fn cancel(&self, job_id: &TrainingJobId) -> TrainingResult<()>;
}
