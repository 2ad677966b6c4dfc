// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Command-line behaviour

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn pipesh() -> Command {
    let mut cmd = Command::cargo_bin("pipesh").unwrap();
    cmd.env("NO_COLOR", "1");
    cmd
}

fn write_definition(dir: &TempDir, yaml: &str) -> std::path::PathBuf {
    let path = dir.path().join("pipeline.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

const GREP: &str = r#"
name: "grep"
pipeline:
  pipe:
    - stage: { program: printf, args: ["apple\nbanana\ncherry\n"] }
    - stage: { program: grep, args: [an] }
"#;

#[test]
fn test_help() {
    pipesh()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn test_run_json() {
    let dir = TempDir::new().unwrap();
    let path = write_definition(&dir, GREP);

    let output = pipesh().arg("run").arg(&path).arg("--json").output().unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["name"], "grep");
    assert_eq!(value["success"], true);
    assert_eq!(value["stdout"], "banana\n");
    assert_eq!(value["stages"].as_array().unwrap().len(), 2);
}

#[test]
fn test_run_capture_prints_output() {
    let dir = TempDir::new().unwrap();
    let path = write_definition(&dir, GREP);

    pipesh()
        .arg("run")
        .arg(&path)
        .arg("--capture")
        .assert()
        .success()
        .stdout("banana\n");
}

#[test]
fn test_run_failure_exit_code() {
    let dir = TempDir::new().unwrap();
    let path = write_definition(
        &dir,
        r#"
name: "fail"
pipeline:
  stage: { program: sh, args: ["-c", "exit 7"] }
"#,
    );

    pipesh().arg("run").arg(&path).assert().code(7);
}

#[test]
fn test_run_from_directory() {
    let dir = TempDir::new().unwrap();
    write_definition(&dir, GREP);

    pipesh()
        .arg("-C")
        .arg(dir.path())
        .arg("run")
        .arg("--capture")
        .assert()
        .success()
        .stdout("banana\n");
}

#[test]
fn test_plan() {
    let dir = TempDir::new().unwrap();
    let path = write_definition(&dir, GREP);

    pipesh()
        .arg("plan")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("grep"))
        .stdout(predicate::str::contains("printf"));
}

#[test]
fn test_check_reports_missing_program() {
    let dir = TempDir::new().unwrap();
    let path = write_definition(
        &dir,
        r#"
name: "missing"
pipeline:
  pipe:
    - stage: { program: cat }
    - stage: { program: pipesh-no-such-program }
"#,
    );

    pipesh()
        .arg("check")
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("pipesh-no-such-program not found"));
}

#[test]
fn test_check_ok() {
    let dir = TempDir::new().unwrap();
    let path = write_definition(&dir, GREP);

    pipesh()
        .arg("check")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("ready to run"));
}

#[test]
fn test_missing_definition() {
    let dir = TempDir::new().unwrap();

    pipesh()
        .arg("run")
        .arg(dir.path().join("nope.yaml"))
        .assert()
        .failure();
}
