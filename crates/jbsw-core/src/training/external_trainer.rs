use crate::training::runner::{
    RunnerConfig, RunnerDataset, RunnerEvent, RunnerJob, ENV_ADAPTER_DIR, ENV_DATASET_FILE,
    ENV_JOB_FILE, ENV_MERGED_DIR,
};
use jbsw_training::artifacts::make_artifact;
use jbsw_training::{
    load_training_data, ArtifactKind, DeviceDetector, OutputSpec, ProgressEvent,
    ProgressSink, TextDataset, Trainer, TrainerStatus, TrainingError, TrainingJobId,
    TrainingJobSpec, TrainingLayout, TrainingManifest, TrainingMetrics, TrainingResult,
};

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Stderr lines kept for the error report of a failed runner.
const STDERR_TAIL_LINES: usize = 20;

/// A trainer that stages the dataset and a resolved `job.json`, then hands the
/// model work (quantized load, LoRA attachment, optimization, adapter save and
/// merged export) to an external SFT runner process.
#[derive(Clone)]
pub struct ExternalTrainer {
    runner: RunnerConfig,
    layout: TrainingLayout,
    detector: Arc<dyn DeviceDetector>,
    statuses: Arc<Mutex<HashMap<String, TrainerStatus>>>,
    cancels: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
}

impl ExternalTrainer {
    #[must_use]
    pub fn new(runner: RunnerConfig, layout: TrainingLayout, detector: Arc<dyn DeviceDetector>) -> Self {
        Self {
            runner,
            layout,
            detector,
            statuses: Arc::new(Mutex::new(HashMap::new())),
            cancels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn layout(&self) -> &TrainingLayout {
        &self.layout
    }

    fn set_status(&self, job_id: &TrainingJobId, status: TrainerStatus) {
        self.statuses.lock().unwrap_or_else(PoisonError::into_inner).insert(job_id.0.clone(), status);
    }

    fn cancel_handle(&self, job_id: &TrainingJobId) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.cancels.lock().unwrap_or_else(PoisonError::into_inner).insert(job_id.0.clone(), notify.clone());
        notify
    }

    fn drop_cancel_handle(&self, job_id: &TrainingJobId) {
        self.cancels.lock().unwrap_or_else(PoisonError::into_inner).remove(&job_id.0);
    }

    async fn run_job(
        &self,
        job: &TrainingJobSpec,
        progress: &dyn ProgressSink,
        cancel: &Notify,
    ) -> TrainingResult<TrainingManifest> {
        let job_id = job.job_id.clone();
        let started = Instant::now();

        // Device check comes first; nothing is read or written without one.
        let accelerator = self.detector.detect().await?.ok_or(TrainingError::NoAccelerator)?;
        info!(
            gpu = %accelerator.name,
            vram_mib = accelerator.total_memory_mib,
            bf16 = accelerator.supports_bf16(),
            "Accelerator detected"
        );
        progress.on_event(ProgressEvent::Message {
            job_id: job_id.clone(),
            message: format!(
                "GPU: {} ({:.1} GB VRAM)",
                accelerator.name,
                accelerator.total_memory_gb()
            ),
        });

        let layout = &self.layout;
        layout.ensure_job_dirs(&job_id)?;

        progress.on_event(ProgressEvent::Message {
            job_id: job_id.clone(),
            message: format!("loading training data: {}", job.dataset.path.display()),
        });
        let records = load_training_data(&job.dataset.path)?;
        let dataset = TextDataset::from_records_with_field(&records, &job.template, &job.dataset.text_field);
        if dataset.is_empty() {
            return Err(TrainingError::Dataset(format!(
                "no training records in {}",
                job.dataset.path.display()
            )));
        }
        let dataset_id = dataset.dataset_id()?;

        let dataset_path = absolute(&layout.dataset_jsonl_path(&job_id))?;
        dataset.write_jsonl(&dataset_path)?;
        progress.on_event(ProgressEvent::Message {
            job_id: job_id.clone(),
            message: format!("dataset: {} examples", dataset.len()),
        });

        let outputs = OutputSpec {
            adapter_dir: absolute(&job.outputs.adapter_dir)?,
            merged_dir: absolute(&job.outputs.merged_dir)?,
            merge_method: job.outputs.merge_method,
        };
        let runner_job = RunnerJob::resolve(
            job,
            &accelerator,
            RunnerDataset {
                path: dataset_path.clone(),
                text_field: dataset.field().to_string(),
                examples: dataset.len(),
            },
            outputs.clone(),
        );
        let job_path = absolute(&layout.job_spec_path(&job_id))?;
        std::fs::write(&job_path, serde_json::to_string_pretty(&runner_job)?)?;

        progress.on_event(ProgressEvent::Message {
            job_id: job_id.clone(),
            message: format!(
                "epochs={} batch_size={} learning_rate={} lora_rank={} precision={}",
                job.hyperparams.epochs,
                job.hyperparams.batch_size,
                job.hyperparams.learning_rate,
                job.lora.rank,
                job.hyperparams.precision.resolve(&accelerator),
            ),
        });

        self.set_status(&job_id, TrainerStatus::Running);
        let total_steps = Some(runner_job.training.max_steps_hint).filter(|s| *s > 0);
        let mut metrics = self.supervise(&job_id, &job_path, &runner_job, total_steps, progress, cancel).await?;
        if metrics.runtime_seconds.is_none() {
            metrics.runtime_seconds = Some(started.elapsed().as_secs_f64());
        }

        let artifacts = vec![
            make_artifact(ArtifactKind::Adapter, outputs.adapter_dir.clone())?,
            make_artifact(ArtifactKind::MergedModel, outputs.merged_dir.clone())?,
            make_artifact(ArtifactKind::DatasetJsonl, dataset_path)?,
            make_artifact(ArtifactKind::Config, job_path)?,
        ];

        let manifest = TrainingManifest {
            job_id: job_id.clone(),
            created_at: job.created_at,
            finished_at: chrono::Utc::now(),
            model: job.model.clone(),
            lora: job.lora.clone(),
            dataset_id,
            examples: dataset.len(),
            metrics,
            artifacts,
        };
        manifest.write(&layout.job_manifest_path(&job_id))?;

        Ok(manifest)
    }

    fn command(&self, job_path: &Path, runner_job: &RunnerJob) -> Command {
        let mut cmd = Command::new(&self.runner.program);
        cmd.args(&self.runner.args)
            .arg(job_path)
            .env(ENV_JOB_FILE, job_path)
            .env(ENV_DATASET_FILE, &runner_job.dataset.path)
            .env(ENV_ADAPTER_DIR, &runner_job.outputs.adapter_dir)
            .env(ENV_MERGED_DIR, &runner_job.outputs.merged_dir)
            .envs(&self.runner.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.runner.working_dir {
            cmd.current_dir(dir);
        }
        // Own group, so cancellation reaches the framework's helper processes.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Run the runner to completion, relaying its events.
    async fn supervise(
        &self,
        job_id: &TrainingJobId,
        job_path: &Path,
        runner_job: &RunnerJob,
        total_steps: Option<u64>,
        progress: &dyn ProgressSink,
        cancel: &Notify,
    ) -> TrainingResult<TrainingMetrics> {
        info!(program = %self.runner.program, job = %job_path.display(), "Launching SFT runner");
        let mut child = self.command(job_path, runner_job).spawn().map_err(|e| {
            TrainingError::Trainer(format!("failed to spawn runner `{}`: {}", self.runner.program, e))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TrainingError::Trainer("runner stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TrainingError::Trainer("runner stderr not captured".to_string()))?;
        let mut stdout_lines = BufReader::new(stdout).split(b'\n');
        let mut stderr_lines = BufReader::new(stderr).split(b'\n');
        let mut stdout_open = true;
        let mut stderr_open = true;

        let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut relay = EventRelay::new(job_id.clone(), total_steps);

        let status = loop {
            tokio::select! {
                segment = stdout_lines.next_segment(), if stdout_open => match segment {
                    Ok(Some(bytes)) => relay.handle_line(&decode_line(&bytes), progress),
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        warn!(error = %e, "Stopped reading runner stdout");
                        stdout_open = false;
                    }
                },
                segment = stderr_lines.next_segment(), if stderr_open => match segment {
                    Ok(Some(bytes)) => {
                        let line = decode_line(&bytes);
                        debug!(target: "jbsw::runner", "{line}");
                        if stderr_tail.len() == STDERR_TAIL_LINES {
                            stderr_tail.pop_front();
                        }
                        stderr_tail.push_back(line);
                    }
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        warn!(error = %e, "Stopped reading runner stderr");
                        stderr_open = false;
                    }
                },
                () = cancel.notified() => {
                    warn!(job_id = %job_id, "Cancelling SFT runner");
                    terminate(&mut child).await;
                    return Err(TrainingError::Cancelled(job_id.0.clone()));
                }
                status = child.wait(), if !stdout_open && !stderr_open => break status?,
            }
        };

        if !status.success() {
            let tail: Vec<String> = stderr_tail.into_iter().collect();
            return Err(TrainingError::Trainer(format!(
                "runner exited with {status}{}",
                if tail.is_empty() { String::new() } else { format!(":\n{}", tail.join("\n")) }
            )));
        }

        info!(job_id = %job_id, "SFT runner finished");
        Ok(relay.into_metrics())
    }
}

/// Turns runner stdout into progress events and final metrics.
struct EventRelay {
    job_id: TrainingJobId,
    total_steps: Option<u64>,
    last_step: Option<u64>,
    last_loss: Option<f64>,
    reported: Option<TrainingMetrics>,
}

impl EventRelay {
    fn new(job_id: TrainingJobId, total_steps: Option<u64>) -> Self {
        Self { job_id, total_steps, last_step: None, last_loss: None, reported: None }
    }

    fn handle_line(&mut self, line: &str, progress: &dyn ProgressSink) {
        let job_id = self.job_id.clone();
        match RunnerEvent::parse(line) {
            Some(RunnerEvent::Log { step, loss, learning_rate, .. }) => {
                self.last_step = Some(step);
                if loss.is_some() {
                    self.last_loss = loss;
                }
                progress.on_event(ProgressEvent::Step { job_id, step, total: self.total_steps, loss, learning_rate });
            }
            Some(RunnerEvent::Message { message }) => {
                progress.on_event(ProgressEvent::Message { job_id, message });
            }
            Some(RunnerEvent::Saved { artifact, path }) => {
                info!(artifact = %artifact, path = %path.display(), "Runner saved artifact");
                progress.on_event(ProgressEvent::Saved { job_id, artifact, path });
            }
            Some(RunnerEvent::Metrics { train_loss, eval_loss, steps, runtime_seconds }) => {
                self.reported = Some(TrainingMetrics { train_loss, eval_loss, steps, runtime_seconds });
            }
            None => {
                let line = line.trim_end();
                if !line.is_empty() {
                    progress.on_event(ProgressEvent::Message { job_id, message: line.to_string() });
                }
            }
        }
    }

    fn into_metrics(self) -> TrainingMetrics {
        let mut metrics = self.reported.unwrap_or_default();
        if metrics.train_loss.is_none() {
            metrics.train_loss = self.last_loss;
        }
        if metrics.steps.is_none() {
            metrics.steps = self.last_step;
        }
        metrics
    }
}

/// Runner output is not guaranteed to be UTF-8 (progress bars, native logs).
fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end_matches('\r').to_string()
}

/// Stop the runner and everything in its process group.
async fn terminate(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let pid_arg = pid.to_string();
        match Command::new("sh").args(["-c", "kill -TERM -\"$1\"", "sh", pid_arg.as_str()]).status().await {
            Ok(status) if status.success() => {}
            Ok(status) => debug!(pid, %status, "kill on runner group failed"),
            Err(e) => debug!(pid, error = %e, "could not signal runner group"),
        }
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "runner already gone");
    }
}

fn absolute(path: &Path) -> TrainingResult<PathBuf> {
    Ok(std::path::absolute(path)?)
}

#[async_trait]
impl Trainer for ExternalTrainer {
    fn id(&self) -> &'static str {
        "external-sft"
    }

    async fn prepare(&self, job: &TrainingJobSpec) -> TrainingResult<()> {
        job.validate()?;
        if self.runner.program.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("runner.program is required".to_string()));
        }
        self.set_status(&job.job_id, TrainerStatus::Preparing);
        Ok(())
    }

    async fn run(&self, job: &TrainingJobSpec, progress: &dyn ProgressSink) -> TrainingResult<TrainingManifest> {
        job.validate()?;

        let job_id = job.job_id.clone();
        progress.on_event(ProgressEvent::Started { job_id: job_id.clone() });
        self.set_status(&job_id, TrainerStatus::Preparing);
        let cancel = self.cancel_handle(&job_id);

        let result = self.run_job(job, progress, &cancel).await;
        self.drop_cancel_handle(&job_id);

        match &result {
            Ok(_) => {
                self.set_status(&job_id, TrainerStatus::Finished);
                progress.on_event(ProgressEvent::Finished { job_id });
            }
            Err(TrainingError::Cancelled(_)) => self.set_status(&job_id, TrainerStatus::Cancelled),
            Err(e) => self.set_status(&job_id, TrainerStatus::Failed(e.to_string())),
        }
        result
    }

    async fn status(&self, job_id: &TrainingJobId) -> TrainingResult<TrainerStatus> {
        Ok(self
            .statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id.0)
            .cloned()
            .unwrap_or(TrainerStatus::Idle))
    }

    async fn cancel(&self, job_id: &TrainingJobId) -> TrainingResult<()> {
        let handle = self.cancels.lock().unwrap_or_else(PoisonError::into_inner).get(&job_id.0).cloned();
        match handle {
            Some(notify) => notify.notify_one(),
            None => debug!(job_id = %job_id, "Cancel requested for job that is not running"),
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use jbsw_training::{
        AcceleratorInfo, DatasetSpec, ModelSpec, NullProgressSink, StaticDetector,
    };
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for RecordingSink {
        fn on_event(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn ampere() -> StaticDetector {
        StaticDetector(Some(AcceleratorInfo {
            name: "NVIDIA RTX A5000".to_string(),
            total_memory_mib: 24564,
            compute_capability: Some((8, 6)),
        }))
    }

    struct Fixture {
        temp: TempDir,
        job: TrainingJobSpec,
    }

    impl Fixture {
        fn new(data: &str) -> Self {
            let temp = TempDir::new().unwrap();
            let data_path = temp.path().join("data").join("training_data.jsonl");
            std::fs::create_dir_all(data_path.parent().unwrap()).unwrap();
            std::fs::write(&data_path, data).unwrap();

            let job = TrainingJobSpec::new(
                ModelSpec::default(),
                DatasetSpec { path: data_path, text_field: "text".to_string() },
                OutputSpec {
                    adapter_dir: temp.path().join("models").join("lora"),
                    merged_dir: temp.path().join("models").join("merged"),
                    ..OutputSpec::default()
                },
            );
            Self { temp, job }
        }

        fn runs(&self) -> PathBuf {
            self.temp.path().join("runs")
        }

        fn trainer(&self, script: &str, detector: StaticDetector) -> ExternalTrainer {
            let script_path = self.temp.path().join("runner.sh");
            std::fs::write(&script_path, script).unwrap();
            let runner = RunnerConfig {
                program: "sh".to_string(),
                args: vec![script_path.to_string_lossy().into_owned()],
                ..RunnerConfig::default()
            };
            ExternalTrainer::new(runner, TrainingLayout::new(self.runs()), Arc::new(detector))
        }
    }

    const DATA: &str = "{\"instruction\":\"Say hi\",\"output\":\"Hello\"}\n\n{\"instruction\":\"Summarize\",\"input\":\"notice\",\"output\":\"short\"}\n";

    const GOOD_RUNNER: &str = r#"
set -e
test -f "$1"
test -f "$JBSW_DATASET_FILE"
echo "Unsloth: loading model"
echo '{"event":"log","step":1,"loss":2.5,"learning_rate":0.0002}'
echo '{"event":"log","step":2,"loss":1.5}'
mkdir -p "$JBSW_ADAPTER_DIR" "$JBSW_MERGED_DIR"
echo adapter > "$JBSW_ADAPTER_DIR/adapter_model.safetensors"
echo tokenizer > "$JBSW_ADAPTER_DIR/tokenizer.json"
echo '{"event":"saved","artifact":"adapter","path":"'"$JBSW_ADAPTER_DIR"'"}'
echo merged > "$JBSW_MERGED_DIR/model.safetensors"
echo 'deprecation warning' >&2
"#;

    #[tokio::test]
    async fn test_run_writes_dataset_job_and_manifest() {
        let fx = Fixture::new(DATA);
        let trainer = fx.trainer(GOOD_RUNNER, ampere());
        let sink = RecordingSink::default();

        trainer.prepare(&fx.job).await.unwrap();
        let manifest = trainer.run(&fx.job, &sink).await.unwrap();

        assert_eq!(manifest.examples, 2);
        assert_eq!(manifest.metrics.train_loss, Some(1.5));
        assert_eq!(manifest.metrics.steps, Some(2));
        assert!(manifest.metrics.runtime_seconds.is_some());
        assert!(manifest.artifact(&ArtifactKind::Adapter).is_some());
        assert!(manifest.artifact(&ArtifactKind::MergedModel).is_some());

        let layout = TrainingLayout::new(fx.runs());
        assert!(layout.job_manifest_path(&fx.job.job_id).exists());

        let staged = std::fs::read_to_string(layout.dataset_jsonl_path(&fx.job.job_id)).unwrap();
        let rows: Vec<serde_json::Value> =
            staged.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0]["text"].as_str().unwrap().contains("Say hi"));
        assert!(rows[1]["text"].as_str().unwrap().contains("입력: notice"));

        let job: RunnerJob = serde_json::from_str(
            &std::fs::read_to_string(layout.job_spec_path(&fx.job.job_id)).unwrap(),
        )
        .unwrap();
        assert!(job.training.bf16);
        assert!(!job.training.fp16);
        assert_eq!(job.dataset.examples, 2);
        assert!(job.outputs.adapter_dir.is_absolute());

        let events = sink.0.lock().unwrap();
        assert!(matches!(events.first(), Some(ProgressEvent::Started { .. })));
        assert!(matches!(events.last(), Some(ProgressEvent::Finished { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::Step { step: 2, loss: Some(l), .. } if (*l - 1.5).abs() < f64::EPSILON
        )));
        assert!(events.iter().any(|e| matches!(e, ProgressEvent::Saved { artifact, .. } if artifact == "adapter")));
        assert!(events.iter().any(|e| matches!(e, ProgressEvent::Message { message, .. } if message == "Unsloth: loading model")));

        assert_eq!(trainer.status(&fx.job.job_id).await.unwrap(), TrainerStatus::Finished);
    }

    #[tokio::test]
    async fn test_missing_accelerator_stops_before_anything_else() {
        let fx = Fixture::new(DATA);
        let marker = fx.temp.path().join("runner-ran");
        let trainer = fx.trainer(&format!("touch '{}'\n", marker.display()), StaticDetector(None));

        let err = trainer.run(&fx.job, &NullProgressSink).await.unwrap_err();

        assert!(matches!(err, TrainingError::NoAccelerator));
        assert!(!fx.runs().exists());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_malformed_data_fails_before_launch() {
        let fx = Fixture::new("{\"instruction\":\"ok\",\"output\":\"1\"}\n{broken\n");
        let marker = fx.temp.path().join("runner-ran");
        let trainer = fx.trainer(&format!("touch '{}'\n", marker.display()), ampere());

        let err = trainer.run(&fx.job, &NullProgressSink).await.unwrap_err();

        assert!(matches!(err, TrainingError::Dataset(_)));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_empty_dataset_is_rejected() {
        let fx = Fixture::new("\n\n");
        let trainer = fx.trainer("exit 0\n", ampere());

        let err = trainer.run(&fx.job, &NullProgressSink).await.unwrap_err();
        assert!(matches!(err, TrainingError::Dataset(_)));
    }

    #[tokio::test]
    async fn test_runner_failure_reports_stderr_tail() {
        let fx = Fixture::new(DATA);
        let trainer = fx.trainer("echo 'torch.OutOfMemoryError: CUDA out of memory' >&2\nexit 3\n", ampere());

        let err = trainer.run(&fx.job, &NullProgressSink).await.unwrap_err();

        match err {
            TrainingError::Trainer(msg) => assert!(msg.contains("CUDA out of memory"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(trainer.status(&fx.job.job_id).await.unwrap(), TrainerStatus::Failed(_)));
        assert!(!TrainingLayout::new(fx.runs()).job_manifest_path(&fx.job.job_id).exists());
    }

    #[tokio::test]
    async fn test_missing_merged_output_is_artifact_error() {
        let fx = Fixture::new(DATA);
        let trainer = fx.trainer("mkdir -p \"$JBSW_ADAPTER_DIR\"\n", ampere());

        let err = trainer.run(&fx.job, &NullProgressSink).await.unwrap_err();
        assert!(matches!(err, TrainingError::Artifact(_)));
    }

    #[tokio::test]
    async fn test_runner_metrics_take_precedence() {
        let fx = Fixture::new(DATA);
        let script = r#"
echo '{"event":"log","step":5,"loss":0.9}'
echo '{"event":"metrics","train_loss":0.75,"steps":6,"runtime_seconds":12.5}'
mkdir -p "$JBSW_ADAPTER_DIR" "$JBSW_MERGED_DIR"
"#;
        let trainer = fx.trainer(script, ampere());

        let manifest = trainer.run(&fx.job, &NullProgressSink).await.unwrap();
        assert_eq!(manifest.metrics.train_loss, Some(0.75));
        assert_eq!(manifest.metrics.steps, Some(6));
        assert_eq!(manifest.metrics.runtime_seconds, Some(12.5));
    }

    #[tokio::test]
    async fn test_cancel_kills_runner() {
        let fx = Fixture::new(DATA);
        let trainer = fx.trainer("sleep 30\n", ampere());
        let job = fx.job.clone();

        let task = {
            let trainer = trainer.clone();
            let job = job.clone();
            tokio::spawn(async move { trainer.run(&job, &NullProgressSink).await })
        };

        for _ in 0..200 {
            if trainer.status(&job.job_id).await.unwrap() == TrainerStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        trainer.cancel(&job.job_id).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), task).await.unwrap().unwrap();
        assert!(matches!(result, Err(TrainingError::Cancelled(_))));
        assert_eq!(trainer.status(&job.job_id).await.unwrap(), TrainerStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_non_utf8_runner_output_is_relayed() {
        let fx = Fixture::new(DATA);
        let script = r#"
printf 'loss \377\n' >&2
printf 'tqdm \377\r\n'
mkdir -p "$JBSW_ADAPTER_DIR" "$JBSW_MERGED_DIR"
exit 0
"#;
        let trainer = fx.trainer(script, ampere());
        let sink = RecordingSink::default();

        let manifest = trainer.run(&fx.job, &sink).await.unwrap();
        assert_eq!(manifest.examples, 2);

        let events = sink.0.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::Message { message, .. } if message == "tqdm \u{FFFD}"
        )));
    }

    #[tokio::test]
    async fn test_non_utf8_stderr_kept_in_failure_report() {
        let fx = Fixture::new(DATA);
        let trainer = fx.trainer("printf 'RuntimeError: bad \\377 byte\\n' >&2\nexit 1\n", ampere());

        let err = trainer.run(&fx.job, &NullProgressSink).await.unwrap_err();
        match err {
            TrainingError::Trainer(msg) => assert!(msg.contains("RuntimeError: bad \u{FFFD} byte"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(target_os = "linux")]
    fn process_gone(pid: &str) -> bool {
        // Zombies count as gone: the container's init may never reap them.
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            Ok(stat) => stat.rsplit_once(')').is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_cancel_stops_runner_helpers() {
        let fx = Fixture::new(DATA);
        let pid_file = fx.temp.path().join("helper.pid");
        let script = format!("sleep 30 &\necho $! > '{}'\nwait\n", pid_file.display());
        let trainer = fx.trainer(&script, ampere());
        let job = fx.job.clone();

        let task = {
            let trainer = trainer.clone();
            let job = job.clone();
            tokio::spawn(async move { trainer.run(&job, &NullProgressSink).await })
        };

        let mut helper = String::new();
        for _ in 0..500 {
            helper = std::fs::read_to_string(&pid_file).unwrap_or_default().trim().to_string();
            if !helper.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!helper.is_empty(), "runner never started its helper");

        trainer.cancel(&job.job_id).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(10), task).await.unwrap().unwrap();
        assert!(matches!(result, Err(TrainingError::Cancelled(_))));

        let mut gone = false;
        for _ in 0..100 {
            if process_gone(&helper) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(gone, "helper process {helper} survived cancellation");
    }

    #[tokio::test]
    async fn test_status_survives_poisoned_lock() {
        let fx = Fixture::new(DATA);
        let trainer = fx.trainer("exit 0\n", ampere());

        let statuses = Arc::clone(&trainer.statuses);
        let _ = std::thread::spawn(move || {
            let _guard = statuses.lock().unwrap();
            panic!("poison the status map");
        })
        .join();
        assert!(trainer.statuses.is_poisoned());

        trainer.prepare(&fx.job).await.unwrap();
        assert_eq!(trainer.status(&fx.job.job_id).await.unwrap(), TrainerStatus::Preparing);
    }

    #[tokio::test]
    async fn test_prepare_rejects_invalid_job() {
        let fx = Fixture::new(DATA);
        let trainer = fx.trainer("exit 0\n", ampere());
        let mut job = fx.job.clone();
        job.hyperparams.epochs = 0;

        assert!(matches!(trainer.prepare(&job).await, Err(TrainingError::InvalidSpec(_))));
    }
}
