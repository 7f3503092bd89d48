//! Integration tests for the apkx CLI.
//!
//! These drive the built binary end-to-end; each task runs in a real
//! subordinate process.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::tempdir;

/// Get a command for the apkx binary, isolated from the caller's env.
fn apkx() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("apkx").unwrap();
    for var in ["APKX_WORKERS", "APKX_TIMEOUT", "APKX_SKIP_LOG", "APKX_LOG", "RUST_LOG"] {
        cmd.env_remove(var);
    }
    cmd
}

/// Writes an analyzer script that prints a fixed feature set, and returns
/// the `--analyzer` value that runs it.
///
/// The script is run through `sh` rather than executed directly.
fn fake_analyzer(dir: &Path) -> String {
    let script = dir.join("analyzer.sh");
    std::fs::write(
        &script,
        r#"printf '{"urls":["example.com"],"activities":[".Main"],"providers":[]}'"#,
    )
    .unwrap();
    format!("sh {}", script.display())
}

#[test]
fn test_help() {
    apkx()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("extract"))
        .stdout(predicate::str::contains("completions"));
}

#[test]
fn test_version() {
    apkx()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("apkx"));
}

#[test]
fn test_run_plain_output() {
    let dir = tempdir().unwrap();
    apkx()
        .current_dir(dir.path())
        .args(["run", "-j", "2", "--format", "plain", "--", "echo", "hi", "{}"])
        .write_stdin("a\n\nb\n")
        .assert()
        .success()
        .stdout("a\thi a\nb\thi b\n")
        .stderr(predicate::str::contains("Processed 2 inputs"));
    assert!(!dir.path().join("apks_not_processed.txt").exists());
}

#[test]
fn test_run_input_file() {
    let dir = tempdir().unwrap();
    let inputs = dir.path().join("inputs.txt");
    std::fs::write(&inputs, "x\ny\nz\n").unwrap();

    apkx()
        .current_dir(dir.path())
        .args(["run", "-j", "2", "--format", "plain", "--input"])
        .arg(&inputs)
        .args(["--", "echo"])
        .assert()
        .success()
        .stdout("x\tx\ny\ty\nz\tz\n");
}

#[test]
fn test_run_timeout_goes_to_skip_log() {
    let dir = tempdir().unwrap();
    let skip_log = dir.path().join("skipped.txt");

    let output = apkx()
        .args(["run", "-j", "2", "-t", "1", "--format", "json", "--skip-log"])
        .arg(&skip_log)
        .args(["--", "sh", "-c", "[ {} = slow ] && sleep 30; echo {}"])
        .write_stdin("fast\nslow\n")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(
        json,
        serde_json::json!([
            {"input": "fast", "value": "fast"},
            {"input": "slow", "value": null}
        ])
    );
    assert_eq!(std::fs::read_to_string(&skip_log).unwrap(), "slow\n");
}

#[test]
fn test_run_default_skip_log_location() {
    let dir = tempdir().unwrap();
    apkx()
        .current_dir(dir.path())
        .args(["run", "-j", "2", "-t", "1", "--format", "plain", "--", "sh", "-c", "sleep 30 # {}"])
        .write_stdin("stuck\n")
        .assert()
        .success()
        .stdout("stuck\t-\n")
        .stderr(predicate::str::contains("apks_not_processed.txt"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("apks_not_processed.txt")).unwrap(),
        "stuck\n"
    );
}

#[test]
fn test_run_single_worker_fails() {
    let dir = tempdir().unwrap();
    apkx()
        .current_dir(dir.path())
        .args(["run", "-j", "1", "--", "echo"])
        .write_stdin("a\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least 2"));
    assert!(!dir.path().join("apks_not_processed.txt").exists());
}

#[test]
fn test_run_workers_from_env() {
    let dir = tempdir().unwrap();
    apkx()
        .current_dir(dir.path())
        .env("APKX_WORKERS", "1")
        .args(["run", "--", "echo"])
        .write_stdin("a\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid worker count 1"));
}

#[test]
fn test_extract_rejects_short_timeout() {
    let dir = tempdir().unwrap();
    apkx()
        .current_dir(dir.path())
        .args(["extract", "-j", "2", "--analyzer", "true", "-t", "5", "a.apk"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must be at least 10s"));
}

#[test]
fn test_extract_features_and_cache() {
    let dir = tempdir().unwrap();
    let apk = dir.path().join("app.apk");
    std::fs::write(&apk, b"PK\x03\x04").unwrap();
    let out_dir = dir.path().join("features");

    apkx()
        .current_dir(dir.path())
        .args(["extract", "-j", "2", "--format", "plain", "--analyzer"])
        .arg(fake_analyzer(dir.path()))
        .arg("--out-dir")
        .arg(&out_dir)
        .arg(&apk)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "urls::example.com activities::.Main",
        ));

    let cached: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out_dir.join("app.json")).unwrap())
            .unwrap();
    assert_eq!(cached["urls"], serde_json::json!(["example.com"]));

    // A second run is served from the cache even with a broken analyzer.
    apkx()
        .current_dir(dir.path())
        .args(["extract", "-j", "2", "--format", "plain", "--analyzer", "false"])
        .arg("--out-dir")
        .arg(&out_dir)
        .arg(&apk)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "urls::example.com activities::.Main",
        ));
}

#[test]
fn test_extract_missing_apk() {
    let dir = tempdir().unwrap();
    apkx()
        .current_dir(dir.path())
        .args(["extract", "-j", "2", "--format", "json", "--analyzer"])
        .arg(fake_analyzer(dir.path()))
        .arg(dir.path().join("missing.apk"))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"value\": null"))
        .stderr(predicate::str::contains("does not exist"));
    assert!(!dir.path().join("apks_not_processed.txt").exists());
}

#[test]
fn test_quiet_hides_summary() {
    let dir = tempdir().unwrap();
    apkx()
        .current_dir(dir.path())
        .args(["-q", "run", "-j", "2", "--format", "plain", "--", "echo"])
        .write_stdin("a\n")
        .assert()
        .success()
        .stdout("a\ta\n")
        .stderr(predicate::str::is_empty());
}

#[test]
fn test_completions_bash() {
    apkx()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("apkx"));
}
