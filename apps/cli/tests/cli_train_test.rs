//! Integration tests for the `jbsw train` command.

mod common;

use common::{Workspace, DATA, GOOD_RUNNER};
use predicates::prelude::*;
use std::path::Path;

#[test]
fn test_train_without_gpu_exits_cleanly() {
    let ws = Workspace::new(DATA);
    ws.write_config(Path::new("/nonexistent/bin/nvidia-smi"), GOOD_RUNNER);

    ws.jbsw()
        .arg("train")
        .assert()
        .success()
        .stdout(predicate::str::contains("No CUDA GPU found"));

    assert!(!ws.path().join("out").exists(), "nothing should be written without a GPU");
}

#[test]
fn test_train_without_gpu_json() {
    let ws = Workspace::new(DATA);
    ws.write_config(Path::new("/nonexistent/bin/nvidia-smi"), GOOD_RUNNER);

    let assert = ws.jbsw().arg("train").arg("--json").assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("train --json should print JSON");
    assert_eq!(json["status"], "no_accelerator");
}

#[test]
fn test_train_rejects_invalid_override() {
    let ws = Workspace::new(DATA);
    ws.write_config(Path::new("/nonexistent/bin/nvidia-smi"), GOOD_RUNNER);

    ws.jbsw()
        .args(["train", "--epochs", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("epochs must be >= 1"));
}

#[cfg(unix)]
#[test]
fn test_train_end_to_end_with_fake_runner() {
    let ws = Workspace::new(DATA);
    let gpu = ws.fake_gpu();
    ws.write_config(&gpu, GOOD_RUNNER);

    ws.jbsw()
        .arg("train")
        .assert()
        .success()
        .stdout(predicate::str::contains("Fine-tuning complete"))
        .stdout(predicate::str::contains("Unsloth: loading model"))
        .stdout(predicate::str::contains("convert_hf_to_gguf.py"))
        .stdout(predicate::str::contains("ollama create"));

    assert!(ws.path().join("out/lora/adapter_model.safetensors").exists());
    assert!(ws.path().join("out/merged/model.safetensors").exists());

    ws.jbsw()
        .args(["list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"train_loss\": 1.75"))
        .stdout(predicate::str::contains("\"examples\": 2"));
}

#[cfg(unix)]
#[test]
fn test_train_json_prints_manifest() {
    let ws = Workspace::new(DATA);
    let gpu = ws.fake_gpu();
    ws.write_config(&gpu, GOOD_RUNNER);

    let assert = ws.jbsw().args(["train", "--json"]).assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let manifest: serde_json::Value = serde_json::from_str(&stdout).expect("manifest JSON");
    assert_eq!(manifest["examples"], 2);
    assert_eq!(manifest["metrics"]["steps"], 2);
    assert!(manifest["artifacts"].as_array().is_some_and(|a| a.len() >= 2));
}

#[cfg(unix)]
#[test]
fn test_train_fails_on_malformed_data() {
    let ws = Workspace::new("{\"instruction\":\"ok\",\"output\":\"fine\"}\nnot json\n");
    let gpu = ws.fake_gpu();
    ws.write_config(&gpu, GOOD_RUNNER);

    ws.jbsw()
        .arg("train")
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 2"));

    assert!(!ws.path().join("out/lora").exists());
}

#[cfg(unix)]
#[test]
fn test_train_surfaces_runner_failure() {
    let ws = Workspace::new(DATA);
    let gpu = ws.fake_gpu();
    ws.write_config(&gpu, "echo 'torch.OutOfMemoryError: CUDA out of memory' >&2\nexit 1\n");

    ws.jbsw()
        .arg("train")
        .assert()
        .failure()
        .stderr(predicate::str::contains("CUDA out of memory"));
}

#[cfg(unix)]
#[test]
fn test_train_flag_overrides_output_dirs() {
    let ws = Workspace::new(DATA);
    let gpu = ws.fake_gpu();
    ws.write_config(&gpu, GOOD_RUNNER);

    ws.jbsw()
        .args(["train", "--adapter-dir", "alt/lora", "--merged-dir", "alt/merged"])
        .assert()
        .success();

    assert!(ws.path().join("alt/lora/adapter_model.safetensors").exists());
    assert!(ws.path().join("alt/merged/model.safetensors").exists());
    assert!(!ws.path().join("out/lora").exists());
}
