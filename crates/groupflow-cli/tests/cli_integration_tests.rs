//! CLI integration tests.
//!
//! Drive the `groupflow` binary end to end with `assert_cmd`.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const PLAN: &str = r#"
[[groups]]
name = "region"
level = 1
field_paths = ["region"]

[[aggregates]]
kind = "sum"
field = "amt"

[[aggregates]]
kind = "count"

[[variables]]
name = "total_count"
kind = "count"
"#;

const INPUT: &str = r#"{"region": "A", "amt": 10}
{"region": "A", "amt": 5}
{"region": "B", "amt": 7}
"#;

/// Get the CLI binary command
#[allow(deprecated)]
fn groupflow_cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("groupflow").unwrap();
    cmd.current_dir(dir.path()).env_remove("RUST_LOG");
    cmd
}

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("plan.toml"), PLAN).unwrap();
    fs::write(dir.path().join("sales.jsonl"), INPUT).unwrap();
    dir
}

// =============================================================================
// Help & Version Tests
// =============================================================================

#[test]
fn test_help_displays_usage() {
    let dir = workspace();
    groupflow_cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("streaming group aggregation"))
        .stdout(predicate::str::contains("Usage:"));
}

#[test]
fn test_version_displays_version() {
    let dir = workspace();
    groupflow_cmd(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("groupflow"));
}

#[test]
fn test_invalid_command_shows_error() {
    let dir = workspace();
    groupflow_cmd(&dir)
        .arg("invalid_command_xyz")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

// =============================================================================
// Run Command Tests
// =============================================================================

#[test]
fn test_run_json_output() {
    let dir = workspace();
    let output = groupflow_cmd(&dir)
        .args(["run", "--plan", "plan.toml", "--input", "sales.jsonl", "--format", "json"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["record_count"], 3);
    assert_eq!(json["groups"][0]["key"], serde_json::json!([["A"]]));
    assert_eq!(json["groups"][0]["aggregates"]["sum_amt"], 15);
    assert_eq!(json["groups"][1]["aggregates"]["count"], 1);
    assert_eq!(json["variables"]["values"]["total_count"], 3);
}

#[test]
fn test_run_table_output() {
    let dir = workspace();
    groupflow_cmd(&dir)
        .args(["run", "--plan", "plan.toml", "--input", "sales.jsonl"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sum_amt"))
        .stdout(predicate::str::contains("15"))
        .stdout(predicate::str::contains("total_count"))
        .stdout(predicate::str::contains("3 records, 2 groups (0 failed)"));
}

#[test]
fn test_run_reads_stdin() {
    let dir = workspace();
    groupflow_cmd(&dir)
        .args(["run", "--plan", "plan.toml", "--input", "-", "--format", "json"])
        .write_stdin(INPUT)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"record_count\": 3"));
}

#[test]
fn test_run_with_footers() {
    let dir = workspace();
    let output = groupflow_cmd(&dir)
        .args([
            "run", "--plan", "plan.toml", "--input", "sales.jsonl", "--format", "json", "--footers",
        ])
        .output()
        .unwrap();

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let footers = json["footers"].as_array().unwrap();
    assert_eq!(footers.len(), 2);
    assert_eq!(footers[0]["group"], "region");
    assert_eq!(footers[0]["snapshot"]["values"]["total_count"], 2);
}

#[test]
fn test_run_with_sample() {
    let dir = workspace();
    let output = groupflow_cmd(&dir)
        .args([
            "run", "--plan", "plan.toml", "--input", "sales.jsonl", "--format", "json", "--sample",
            "2",
        ])
        .output()
        .unwrap();

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["sample"].as_array().map(Vec::len), Some(2));
    assert_eq!(json["groups"][0]["aggregates"]["sum_amt"], 15);
}

#[test]
fn test_run_sample_without_size_uses_config() {
    let dir = workspace();
    fs::write(dir.path().join("groupflow.toml"), "[sample]\nsample_size = 1\n").unwrap();
    let output = groupflow_cmd(&dir)
        .args([
            "run", "--plan", "plan.toml", "--input", "sales.jsonl", "--format", "json", "--sample",
        ])
        .output()
        .unwrap();

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["sample"].as_array().map(Vec::len), Some(1));
}

#[test]
fn test_run_group_limit_fails() {
    let dir = workspace();
    groupflow_cmd(&dir)
        .args([
            "run", "--plan", "plan.toml", "--input", "sales.jsonl", "--max-groups", "1",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("GFLOW-007"));
}

#[test]
fn test_run_missing_input_fails() {
    let dir = workspace();
    groupflow_cmd(&dir)
        .args(["run", "--plan", "plan.toml", "--input", "missing.jsonl"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to open input"));
}

#[test]
fn test_run_malformed_input_reports_line() {
    let dir = workspace();
    fs::write(dir.path().join("bad.jsonl"), "{\"region\": \"A\"}\nnope\n").unwrap();
    groupflow_cmd(&dir)
        .args(["run", "--plan", "plan.toml", "--input", "bad.jsonl"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 2"));
}

#[test]
fn test_config_file_batch_size_is_used() {
    let dir = workspace();
    fs::write(dir.path().join("groupflow.toml"), "[engine]\nbatch_size = 1\n").unwrap();
    let output = groupflow_cmd(&dir)
        .args(["run", "--plan", "plan.toml", "--input", "sales.jsonl", "--format", "json"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["stats"]["batches"], 3);
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = workspace();
    fs::write(dir.path().join("custom.toml"), "[engine]\nbatch_size = 0\n").unwrap();
    groupflow_cmd(&dir)
        .args(["--config", "custom.toml", "validate", "--plan", "plan.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("batch_size"));
}

// =============================================================================
// Validate & Init Tests
// =============================================================================

#[test]
fn test_validate_accepts_plan() {
    let dir = workspace();
    groupflow_cmd(&dir)
        .args(["validate", "--plan", "plan.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Plan OK"))
        .stdout(predicate::str::contains("1 group levels"));
}

#[test]
fn test_validate_rejects_bad_levels() {
    let dir = workspace();
    fs::write(
        dir.path().join("bad.toml"),
        "[[groups]]\nname = \"region\"\nlevel = 3\nfield_paths = [\"region\"]\n",
    )
    .unwrap();
    groupflow_cmd(&dir)
        .args(["validate", "--plan", "bad.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("GFLOW-005"));
}

#[test]
fn test_init_writes_runnable_plan() {
    let dir = workspace();
    groupflow_cmd(&dir)
        .args(["init", "--output", "example.toml", "--with-config"])
        .assert()
        .success();

    assert!(dir.path().join("example.toml").exists());
    assert!(dir.path().join("groupflow.toml").exists());
    groupflow_cmd(&dir)
        .args(["validate", "--plan", "example.toml"])
        .assert()
        .success();
}

#[test]
fn test_init_refuses_to_overwrite() {
    let dir = workspace();
    groupflow_cmd(&dir)
        .args(["init", "--output", "plan.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}
