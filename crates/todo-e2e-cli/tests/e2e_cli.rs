//! E2E tests for the `todo-e2e` binary: labels, simulation, config and
//! error reporting. Nothing here needs a live TODO service.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

fn todo_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("todo-e2e"));
    cmd.current_dir(dir);
    cmd.env("TODO_E2E_LOG", "error");
    cmd.env("HOME", dir);
    cmd.env("XDG_CONFIG_HOME", dir.join(".config"));
    cmd.env_remove("TODO_E2E_FORMAT");
    cmd.env_remove("TODO_E2E_BASE_URL");
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("valid JSON on stdout")
}

#[test]
fn label_json_carries_scope_and_key() {
    let dir = TempDir::new().expect("tempdir");
    let output = todo_cmd(dir.path())
        .args([
            "label",
            "--worker",
            "webkit",
            "--test",
            "can remove a TODO item",
            "--seed",
            "7",
            "--format",
            "json",
        ])
        .output()
        .expect("label should not crash");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    let label = json["label"].as_str().expect("label");
    assert!(label.starts_with("TODO for webkit can remove a TODO item "), "{label}");
    assert_eq!(json["worker"], "webkit");
    assert_eq!(json["key"]["test"], "can remove a TODO item");
    assert_eq!(json["key"]["nonce"], json["nonce"]);
}

#[test]
fn label_respects_config_in_working_directory() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(
        dir.path().join("todo-e2e.toml"),
        "[tag]\nstyle = \"legacy\"\nmatch_mode = \"contains\"\nprefix = \"Item for\"\n",
    )
    .expect("write config");

    let output = todo_cmd(dir.path())
        .args(["label", "--worker", "firefox", "--test", "t", "--format", "json"])
        .output()
        .expect("label should not crash");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    assert!(json["label"].as_str().expect("label").starts_with("Item for firefox t "));
    assert!(json["key"].is_null());
}

#[test]
fn sim_run_scoped_campaign_passes() {
    let dir = TempDir::new().expect("tempdir");
    let output = todo_cmd(dir.path())
        .args(["sim", "run", "--seeds", "3", "--format", "json"])
        .output()
        .expect("sim run should not crash");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    assert_eq!(json["seeds_run"], 3);
    assert_eq!(json["all_passed"], true);
    assert!(json["failures"].as_array().expect("failures").is_empty());
}

#[test]
fn sim_run_delete_all_fails_with_cross_scope_deletes() {
    let dir = TempDir::new().expect("tempdir");
    todo_cmd(dir.path())
        .args(["sim", "run", "--seeds", "12", "--policy", "delete-all", "--format", "text"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("all_passed=false"))
        .stdout(predicate::str::contains("hint todo-e2e sim replay --seed"));
}

#[test]
fn sim_replay_is_deterministic() {
    let dir = TempDir::new().expect("tempdir");
    let run = || {
        todo_cmd(dir.path())
            .args(["sim", "replay", "--seed", "11", "--format", "json"])
            .output()
            .expect("replay should not crash")
    };
    let first = run();
    let second = run();
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    assert_eq!(first.stdout, second.stdout);

    let json = stdout_json(&first);
    assert_eq!(json["trace"]["seed"], 11);
    assert_eq!(json["passed"], true);
}

#[test]
fn sim_rejects_exact_matching_of_legacy_tags() {
    let dir = TempDir::new().expect("tempdir");
    todo_cmd(dir.path())
        .args(["sim", "run", "--seeds", "1", "--legacy-tags"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--match exact needs structured tags"));
}

#[test]
fn missing_explicit_config_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    todo_cmd(dir.path())
        .args(["--config", "nope.toml", "label", "--worker", "w", "--test", "t"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn malformed_config_reports_parse_code() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("todo-e2e.toml"), "workers = [\"chromium\"\n").expect("write");
    let output = todo_cmd(dir.path())
        .args(["label", "--worker", "w", "--test", "t", "--format", "json"])
        .output()
        .expect("label should not crash");
    assert!(!output.status.success());

    let json: Value = serde_json::from_slice(&output.stderr).expect("JSON error on stderr");
    assert_eq!(json["error"]["error_code"], "E1002");
}

#[test]
fn cleanup_against_unreachable_service_reports_transport_code() {
    let dir = TempDir::new().expect("tempdir");
    let output = todo_cmd(dir.path())
        .env("TODO_E2E_BASE_URL", "http://127.0.0.1:9")
        .args(["cleanup", "--worker", "chromium", "--test", "t", "--format", "json"])
        .output()
        .expect("cleanup should not crash");
    assert!(!output.status.success());

    let json: Value = serde_json::from_slice(&output.stderr).expect("JSON error on stderr");
    assert_eq!(json["error"]["error_code"], "E4001");
    assert!(json["error"]["suggestion"].is_string());
}

#[test]
fn cleanup_requires_scope_or_all() {
    let dir = TempDir::new().expect("tempdir");
    todo_cmd(dir.path())
        .args(["cleanup", "--worker", "chromium"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--test"));
}
