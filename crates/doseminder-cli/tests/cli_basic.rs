//! Basic CLI E2E tests.
//!
//! Tests invoke CLI commands via cargo run and verify outputs. Each test
//! points HOME at its own temporary directory so config and history never
//! touch the real profile.

use std::path::Path;
use std::process::Command;

/// Run a CLI command with `home` as the home directory and return output.
fn run_cli(home: &Path, args: &[&str]) -> (i32, String, String) {
    let output = Command::new("cargo")
        .args(["run", "-q", "-p", "doseminder-cli", "--"])
        .args(args)
        .env("HOME", home)
        .env_remove("DOSEMINDER_ENV")
        .env("RUST_LOG", "off")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (code, stdout, stderr)
}

#[test]
fn test_countdown_plain() {
    let home = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run_cli(
        home.path(),
        &["countdown", "09:00", "-i", "8", "--at", "2026-10-19T08:59:50"],
    );
    assert_eq!(code, 0, "countdown failed");
    assert!(stdout.starts_with("00:00:10"), "unexpected output: {stdout}");
}

#[test]
fn test_countdown_rolls_stale_time_forward() {
    let home = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run_cli(
        home.path(),
        &["countdown", "09:00", "-i", "8", "--at", "2026-10-21T10:00:00", "--json"],
    );
    assert_eq!(code, 0, "countdown --json failed");
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["secondsRemaining"], 25_200);
    assert_eq!(parsed["countdown"], "07:00:00");
    assert_eq!(parsed["dueAt"], "2026-10-21T17:00:00");
}

#[test]
fn test_countdown_rejects_malformed_hour() {
    let home = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run_cli(home.path(), &["countdown", "nine", "-i", "8"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("error:"));
}

#[test]
fn test_config_defaults() {
    let home = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run_cli(home.path(), &["config", "get", "policy.grace_minutes"]);
    assert_eq!(code, 0, "config get failed");
    assert_eq!(stdout.trim(), "5");

    let (code, stdout, _) = run_cli(home.path(), &["config", "path"]);
    assert_eq!(code, 0, "config path failed");
    assert!(stdout.trim().ends_with("doseminder/config.toml"));
}

#[test]
fn test_config_set_persists() {
    let home = tempfile::tempdir().unwrap();
    let (code, _, _) = run_cli(
        home.path(),
        &["config", "set", "policy.auto_resolve_minutes", "60"],
    );
    assert_eq!(code, 0, "config set failed");

    let (_, stdout, _) = run_cli(home.path(), &["config", "list"]);
    assert!(stdout.contains("policy.auto_resolve_minutes = 60"));
}

#[test]
fn test_config_rejects_unknown_key() {
    let home = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run_cli(home.path(), &["config", "set", "policy.snooze", "1"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("Unknown configuration key"));

    let (code, _, _) = run_cli(home.path(), &["config", "get", "policy.snooze"]);
    assert_ne!(code, 0);
}

#[test]
fn test_history_stats_empty() {
    let home = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run_cli(home.path(), &["history", "stats"]);
    assert_eq!(code, 0, "history stats failed");
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["total"], 0);

    let (code, stdout, _) = run_cli(home.path(), &["history", "list", "--medication", "med-1"]);
    assert_eq!(code, 0, "history list failed");
    assert_eq!(stdout.trim(), "[]");
}

#[test]
fn test_gateway_requires_user() {
    let home = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run_cli(home.path(), &["gateway", "taken", "med-1"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("user"));
}

#[test]
fn test_completions() {
    let home = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run_cli(home.path(), &["completions", "bash"]);
    assert_eq!(code, 0, "completions failed");
    assert!(stdout.contains("doseminder-cli"));
}
