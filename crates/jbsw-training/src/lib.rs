//! JBSW Training
//!
//! Backend-agnostic primitives for supervised fine-tuning:
//! - Loading instruction records (`load_training_data`)
//! - Rendering them with the Llama 3.1 chat template (`PromptTemplate`)
//! - Wrapping rendered prompts for the framework (`TextDataset`)
//! - Describing jobs, devices and precision (`TrainingJobSpec`, `Precision`)
//! - Writing artifacts + manifests and discovering finished runs
//! - Implementing training backends (`Trainer`)

pub mod artifacts;
pub mod dataset;
pub mod device;
pub mod error;
pub mod job;
pub mod layout;
pub mod loader;
pub mod progress;
pub mod registry;
pub mod template;
pub mod text_dataset;
pub mod trainer;

pub use artifacts::{ArtifactKind, TrainingArtifact, TrainingManifest, TrainingMetrics};
pub use dataset::{DatasetId, DatasetSpec, TrainingRecord, DEFAULT_TEXT_FIELD};
pub use device::{AcceleratorInfo, DeviceDetector, Precision, StaticDetector};
pub use error::{TrainingError, TrainingResult};
pub use job::{
    LoraConfig, MergeMethod, ModelSpec, OutputSpec, TrainingHyperParams, TrainingJobId,
    TrainingJobSpec,
};
pub use layout::TrainingLayout;
pub use loader::{load_training_data, read_training_data, write_jsonl};
pub use progress::{NullProgressSink, ProgressEvent, ProgressSink};
pub use registry::{discover_runs, CompletedRun};
pub use template::{find_reserved_markers, format_prompt, PromptTemplate};
pub use text_dataset::TextDataset;
pub use trainer::{Trainer, TrainerStatus};
