//! Shared fixtures for CLI integration tests.

#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const DATA: &str = concat!(
    "{\"instruction\":\"Say hi\",\"output\":\"Hello\"}\n",
    "\n",
    "{\"instruction\":\"Summarize\",\"input\":\"notice text\",\"output\":\"short\"}\n",
);

/// A working directory with training data and a `jbsw.toml`.
pub struct Workspace {
    pub temp: TempDir,
}

impl Workspace {
    pub fn new(data: &str) -> Self {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("data")).unwrap();
        std::fs::write(temp.path().join("data").join("training_data.jsonl"), data).unwrap();
        Self { temp }
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.path().join("jbsw.toml")
    }

    /// Write `jbsw.toml` pointing the GPU query and runner at the given programs.
    pub fn write_config(&self, nvidia_smi: &Path, runner_script: &str) {
        let runner = self.path().join("runner.sh");
        std::fs::write(&runner, runner_script).unwrap();
        let config = format!(
            r#"[training]
epochs = 1

[paths]
adapter_dir = "out/lora"
merged_dir = "out/merged"
runs_dir = "out/.runs"

[runner]
program = "sh"
args = ["{}"]

[device]
nvidia_smi = "{}"
"#,
            runner.display(),
            nvidia_smi.display()
        );
        std::fs::write(self.config_path(), config).unwrap();
    }

    #[cfg(unix)]
    pub fn fake_gpu(&self) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = self.path().join("nvidia-smi");
        std::fs::write(&script, "#!/bin/sh\necho 'NVIDIA RTX A5000, 24564, 8.6'\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    pub fn jbsw(&self) -> Command {
        let mut cmd = Command::cargo_bin("jbsw").unwrap();
        cmd.current_dir(self.path()).env_remove("JBSW_CONFIG");
        cmd
    }
}

pub const GOOD_RUNNER: &str = r#"
set -e
test -f "$JBSW_JOB_FILE"
echo "Unsloth: loading model"
echo '{"event":"log","step":1,"loss":2.0}'
mkdir -p "$JBSW_ADAPTER_DIR" "$JBSW_MERGED_DIR"
echo adapter > "$JBSW_ADAPTER_DIR/adapter_model.safetensors"
echo merged > "$JBSW_MERGED_DIR/model.safetensors"
echo '{"event":"metrics","train_loss":1.75,"steps":2}'
"#;
