use async_trait::async_trait;
use jbsw_training::{AcceleratorInfo, DeviceDetector, TrainingError, TrainingResult};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

const FULL_QUERY: &str = "--query-gpu=name,memory.total,compute_cap";
/// Drivers older than 510 reject the `compute_cap` field.
const LEGACY_QUERY: &str = "--query-gpu=name,memory.total";

/// Accelerator discovery through `nvidia-smi`.
///
/// Reports device 0. A missing binary, a failing query or empty output all
/// mean "no accelerator".
#[derive(Debug, Clone)]
pub struct NvidiaSmiDetector {
    program: PathBuf,
}

impl NvidiaSmiDetector {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    async fn query(&self, fields: &str) -> TrainingResult<Option<String>> {
        let output = match Command::new(&self.program)
            .args([fields, "--format=csv,noheader,nounits"])
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(program = %self.program.display(), "nvidia-smi not found");
                return Ok(None);
            }
            Err(e) => {
                return Err(TrainingError::Device(format!(
                    "failed to run {}: {}",
                    self.program.display(),
                    e
                )));
            }
        };

        if !output.status.success() {
            debug!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "nvidia-smi query failed"
            );
            return Ok(None);
        }

        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }
}

impl Default for NvidiaSmiDetector {
    fn default() -> Self {
        Self::new("nvidia-smi")
    }
}

#[async_trait]
impl DeviceDetector for NvidiaSmiDetector {
    async fn detect(&self) -> TrainingResult<Option<AcceleratorInfo>> {
        let stdout = match self.query(FULL_QUERY).await? {
            Some(out) => out,
            None => match self.query(LEGACY_QUERY).await? {
                Some(out) => out,
                None => return Ok(None),
            },
        };

        Ok(parse_nvidia_smi_output(&stdout).into_iter().next())
    }
}

/// Parse `name, memory.total[, compute_cap]` CSV rows, one GPU per line.
///
/// Rows that do not parse are skipped. Names may contain commas, so fields
/// are split from the right. `compute_cap` may be `[N/A]`.
#[must_use]
pub fn parse_nvidia_smi_output(stdout: &str) -> Vec<AcceleratorInfo> {
    stdout.lines().filter_map(parse_row).collect()
}

fn parse_row(line: &str) -> Option<AcceleratorInfo> {
    let (rest, last) = line.trim().rsplit_once(',')?;
    let last = last.trim();

    if let Some((name, memory)) = rest.rsplit_once(',') {
        if let Ok(memory) = memory.trim().parse::<u64>() {
            return accelerator(name, memory, parse_compute_cap(last));
        }
    }

    accelerator(rest, last.parse().ok()?, None)
}

fn accelerator(name: &str, total_memory_mib: u64, compute_capability: Option<(u32, u32)>) -> Option<AcceleratorInfo> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some(AcceleratorInfo { name: name.to_string(), total_memory_mib, compute_capability })
}

fn parse_compute_cap(value: &str) -> Option<(u32, u32)> {
    let (major, minor) = value.trim().split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}
