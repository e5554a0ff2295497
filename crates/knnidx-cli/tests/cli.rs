//! Integration tests for the knnidx binary.
//!
//! These tests build real index files in a temp directory and read them back
//! through every command.

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use predicates::prelude::*;
use tempfile::TempDir;

use common::{knnidx_cmd, write_records};

const UNIT_VECTORS: &[(u64, &[f32])] = &[
    (1, &[1.0, 0.0, 0.0, 0.0]),
    (2, &[0.0, 1.0, 0.0, 0.0]),
    (3, &[0.0, 0.0, 1.0, 0.0]),
];

/// Build `vectors.knn` from `records` and return its path.
fn build_index(temp: &TempDir, records: &[(u64, &[f32])], extra: &[&str]) -> PathBuf {
    let input = write_records(temp.path(), records);
    let output = temp.path().join("vectors.knn");

    knnidx_cmd(temp.path())
        .arg("build")
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .args(extra)
        .assert()
        .success();

    output
}

fn path_str(path: &Path) -> &str {
    path.to_str().expect("utf-8 path")
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_build_reports_summary() {
    let temp = TempDir::new().expect("create temp dir");
    let input = write_records(temp.path(), UNIT_VECTORS);
    let output = temp.path().join("out.knn");

    knnidx_cmd(temp.path())
        .args(["build", path_str(&input), "-o", path_str(&output)])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 vectors"))
        .stdout(predicate::str::contains("metric=euclidean"))
        .stdout(predicate::str::contains("dimension=4"));

    assert!(output.exists());
}

#[test]
fn test_query_returns_nearest_first() {
    let temp = TempDir::new().expect("create temp dir");
    let index = build_index(
        &temp,
        &[(1, &[0.0, 0.0]), (2, &[1.0, 0.0]), (3, &[3.0, 0.0])],
        &[],
    );

    knnidx_cmd(temp.path())
        .args(["query", path_str(&index), "--vector", "0,0", "-k", "2"])
        .assert()
        .success()
        .stdout("1\t0\n2\t1\n");
}

#[test]
fn test_query_json_output() {
    let temp = TempDir::new().expect("create temp dir");
    let index = build_index(&temp, UNIT_VECTORS, &[]);

    let output = knnidx_cmd(temp.path())
        .args(["--json", "query", path_str(&index), "--vector", "0,1,0,0", "-k", "10"])
        .output()
        .expect("run query");
    assert!(output.status.success());

    let hits: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid json");
    let hits = hits.as_array().expect("array");
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0]["label"], 2);
    assert_eq!(hits[0]["distance"], 0.0);
}

#[test]
fn test_query_dimension_mismatch_fails() {
    let temp = TempDir::new().expect("create temp dir");
    let index = build_index(&temp, UNIT_VECTORS, &[]);

    knnidx_cmd(temp.path())
        .args(["query", path_str(&index), "--vector", "1,0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("dimension mismatch"));
}

#[test]
fn test_get_found_and_missing() {
    let temp = TempDir::new().expect("create temp dir");
    let index = build_index(&temp, &[(9, &[3.0, 4.0])], &["--metric", "angular"]);

    knnidx_cmd(temp.path())
        .args(["get", path_str(&index), "9"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0.6"))
        .stdout(predicate::str::contains("0.8"));

    knnidx_cmd(temp.path())
        .args(["get", path_str(&index), "10"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Label 10 not found"));
}

#[test]
fn test_labels_sorted() {
    let temp = TempDir::new().expect("create temp dir");
    let index = build_index(
        &temp,
        &[(30, &[3.0]), (10, &[1.0]), (20, &[2.0])],
        &[],
    );

    knnidx_cmd(temp.path())
        .args(["labels", path_str(&index)])
        .assert()
        .success()
        .stdout("10\n20\n30\n");
}

#[test]
fn test_distance_between_labels() {
    let temp = TempDir::new().expect("create temp dir");
    let index = build_index(&temp, &[(1, &[0.0, 0.0]), (2, &[3.0, 4.0])], &[]);

    knnidx_cmd(temp.path())
        .args(["distance", path_str(&index), "1", "2"])
        .assert()
        .success()
        .stdout("25\n");

    knnidx_cmd(temp.path())
        .args(["distance", path_str(&index), "1", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Label 3 not found"));
}

#[test]
fn test_info_json() {
    let temp = TempDir::new().expect("create temp dir");
    let index = build_index(
        &temp,
        UNIT_VECTORS,
        &["--metric", "innerproduct", "--m", "16", "--seed", "7"],
    );

    let output = knnidx_cmd(temp.path())
        .args(["info", path_str(&index), "--json"])
        .output()
        .expect("run info");
    assert!(output.status.success());

    let info: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid json");
    assert_eq!(info["metric"], "innerproduct");
    assert_eq!(info["dimension"], 4);
    assert_eq!(info["elementCount"], 3);
    assert_eq!(info["m"], 16);
    assert_eq!(info["seed"], 7);
}

#[test]
fn test_build_duplicate_label_fails() {
    let temp = TempDir::new().expect("create temp dir");
    let input = write_records(temp.path(), &[(1, &[0.0, 1.0]), (1, &[1.0, 0.0])]);

    knnidx_cmd(temp.path())
        .args(["build", path_str(&input), "-o", path_str(&temp.path().join("dup.knn"))])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already present"));
}

#[test]
fn test_build_invalid_record_reports_line() {
    let temp = TempDir::new().expect("create temp dir");
    let input = temp.path().join("bad.jsonl");
    fs::write(&input, "{\"label\": 1, \"vector\": [1.0]}\nnot json\n").expect("write input");

    knnidx_cmd(temp.path())
        .args(["build", path_str(&input), "-o", path_str(&temp.path().join("bad.knn"))])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bad.jsonl:2"));
}

#[test]
fn test_build_uses_config_file() {
    let temp = TempDir::new().expect("create temp dir");
    let config = temp.path().join("knnidx.yaml");
    fs::write(&config, "metric: angular\ndimension: 2\nefSearch: 32\n").expect("write config");

    let input = write_records(temp.path(), &[(1, &[5.0, 0.0])]);
    let output = temp.path().join("configured.knn");

    knnidx_cmd(temp.path())
        .args(["build", path_str(&input), "-o", path_str(&output)])
        .env("KNNIDX_CONFIG", &config)
        .assert()
        .success()
        .stdout(predicate::str::contains("metric=angular"));

    knnidx_cmd(temp.path())
        .args(["info", path_str(&output)])
        .assert()
        .success()
        .stdout(predicate::str::contains("efSearch:        32"));
}

#[test]
fn test_missing_config_fails() {
    let temp = TempDir::new().expect("create temp dir");
    let input = write_records(temp.path(), UNIT_VECTORS);

    knnidx_cmd(temp.path())
        .args(["build", path_str(&input), "-o", path_str(&temp.path().join("x.knn"))])
        .args(["--config", path_str(&temp.path().join("absent.yaml"))])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config not found"));
}

#[test]
fn test_open_garbage_file_fails() {
    let temp = TempDir::new().expect("create temp dir");
    let path = temp.path().join("garbage.knn");
    fs::write(&path, "not an index").expect("write garbage");

    knnidx_cmd(temp.path())
        .args(["labels", path_str(&path)])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a knnidx index file"));
}

type Records = &'static [(u64, &'static [f32])];

/// Build each `(file name, records)` pair into a service directory.
fn build_service_dir(temp: &TempDir, parts: &[(&str, Records)]) -> PathBuf {
    let dir = temp.path().join("parts");
    fs::create_dir(&dir).expect("create service dir");
    for (name, records) in parts {
        let input = write_records(temp.path(), records);
        knnidx_cmd(temp.path())
            .args(["build", path_str(&input), "-o", path_str(&dir.join(name))])
            .assert()
            .success();
    }
    dir
}

#[test]
fn test_partitions_listing() {
    let temp = TempDir::new().expect("create temp dir");
    const FIRST: Records = &[(10, &[0.0, 0.0]), (11, &[4.0, 0.0])];
    const EXTRA: Records = &[(90, &[0.5, 0.0])];
    const SECOND: Records = &[(20, &[2.0, 2.0])];
    let dir = build_service_dir(
        &temp,
        &[("1.0.knn", FIRST), ("1.0.extra.knn", EXTRA), ("2.0.knn", SECOND)],
    );

    knnidx_cmd(temp.path())
        .args(["partitions", path_str(&dir)])
        .assert()
        .success()
        .stdout("1\t1 searchable\t1 extra\t3 elements\n2\t1 searchable\t0 extra\t1 elements\n");
}

#[test]
fn test_closest_from_stored_labels() {
    let temp = TempDir::new().expect("create temp dir");
    const FIRST: Records = &[(10, &[0.0, 0.0]), (11, &[8.0, 0.0])];
    const EXTRA: Records = &[(90, &[9.0, 0.0])];
    const SECOND: Records = &[(20, &[1.0, 0.0]), (21, &[8.0, 0.0])];
    let dir = build_service_dir(
        &temp,
        &[("1.0.knn", FIRST), ("1.0.extra.knn", EXTRA), ("2.0.knn", SECOND)],
    );

    // Mean of (9, 0) and (8, 0) is (8.5, 0).
    let output = knnidx_cmd(temp.path())
        .args(["--json", "closest", path_str(&dir), "--partition", "2", "--from", "1:90,1:11", "-k", "1"])
        .output()
        .expect("run closest");
    assert!(output.status.success());

    let hits: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid json");
    assert_eq!(hits[0]["label"], 21);
    assert_eq!(hits[0]["distance"], 0.25);

    knnidx_cmd(temp.path())
        .args(["closest", path_str(&dir), "--partition", "5", "--from", "1:10"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Partition 5 not found"));
}
