//! Shared test utilities for knnidx-cli integration tests.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;

/// Get a Command for the knnidx binary with `HOME` pointed at `home`.
///
/// Isolating `HOME` keeps a developer's `~/.knnidx/config.yaml` out of the
/// tests.
///
/// # Panics
///
/// Panics if the knnidx binary cannot be found.
#[allow(deprecated)]
pub fn knnidx_cmd(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("knnidx").expect("knnidx binary should exist");
    cmd.env("HOME", home)
        .env_remove("KNNIDX_CONFIG")
        .env_remove("KNNIDX_VERBOSE");
    cmd
}

/// Write JSON Lines build input and return its path.
pub fn write_records(dir: &Path, records: &[(u64, &[f32])]) -> PathBuf {
    let path = dir.join("vectors.jsonl");
    let lines: Vec<String> = records
        .iter()
        .map(|(label, vector)| {
            serde_json::json!({ "label": label, "vector": vector }).to_string()
        })
        .collect();
    fs::write(&path, lines.join("\n")).expect("write records");
    path
}
