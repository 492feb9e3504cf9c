use crate::artifacts::{ArtifactKind, TrainingManifest};
use crate::error::TrainingResult;
use crate::layout::TrainingLayout;
use std::path::PathBuf;
use tracing::warn;

/// A finished run discovered on disk.
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub manifest_path: PathBuf,
    pub manifest: TrainingManifest,
}

impl CompletedRun {
    #[must_use]
    pub fn adapter_dir(&self) -> Option<&PathBuf> {
        self.manifest.artifact(&ArtifactKind::Adapter).map(|a| &a.path)
    }

    #[must_use]
    pub fn merged_dir(&self) -> Option<&PathBuf> {
        self.manifest.artifact(&ArtifactKind::MergedModel).map(|a| &a.path)
    }
}

/// Discover finished runs by scanning `<runs_root>/*/training_manifest.json`.
///
/// Newest first. Runs without a manifest (failed or in flight) are skipped;
/// unreadable manifests are logged and skipped.
pub fn discover_runs(layout: &TrainingLayout) -> TrainingResult<Vec<CompletedRun>> {
    let mut out = Vec::new();

    let dir = match std::fs::read_dir(layout.root()) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };

    for entry in dir {
        let entry = entry?;
        let job_dir = entry.path();
        if !job_dir.is_dir() {
            continue;
        }
        let manifest_path = job_dir.join("training_manifest.json");
        if !manifest_path.exists() {
            continue;
        }
        match TrainingManifest::read(&manifest_path) {
            Ok(manifest) => out.push(CompletedRun { manifest_path, manifest }),
            Err(e) => warn!(path = %manifest_path.display(), error = %e, "Skipping unreadable manifest"),
        }
    }

    out.sort_by(|a, b| b.manifest.finished_at.cmp(&a.manifest.finished_at));
    Ok(out)
}
