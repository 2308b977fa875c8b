//! Basic CLI E2E tests.
//!
//! Each test runs the built binary against a throwaway home directory.

use std::process::Command;

use tempfile::TempDir;

/// Run a CLI command and return (stdout, stderr, exit code).
fn run_cli(home: &TempDir, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_locshare-cli"))
        .args(args)
        .env("HOME", home.path())
        .env("LOCSHARE_ENV", "dev")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    let (stdout, _, code) = run_cli(&home, &["--help"]);
    assert_eq!(code, 0);
    for command in ["track", "locations", "config"] {
        assert!(stdout.contains(command), "missing {command} in help");
    }
}

#[test]
fn test_config_set_get_roundtrip() {
    let home = TempDir::new().unwrap();
    let (stdout, _, code) = run_cli(&home, &["config", "set", "broker.port", "61614"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "broker.port = 61614");

    let (stdout, _, code) = run_cli(&home, &["config", "get", "broker.port"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "61614");
}

#[test]
fn test_config_unknown_key_fails() {
    let home = TempDir::new().unwrap();
    let (_, stderr, code) = run_cli(&home, &["config", "get", "broker.nope"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("unknown key"));
}

#[test]
fn test_config_set_rejects_mistyped_value() {
    let home = TempDir::new().unwrap();
    let (_, stderr, code) = run_cli(&home, &["config", "set", "broker.port", "not-a-port"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("Configuration error"));
    assert!(stderr.contains("broker.port"));

    let (stdout, _, _) = run_cli(&home, &["config", "get", "broker.port"]);
    assert_ne!(stdout.trim(), "not-a-port");
}

#[test]
fn test_config_path_is_inside_home() {
    let home = TempDir::new().unwrap();
    let (stdout, _, code) = run_cli(&home, &["config", "path"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("locshare-dev"));
    assert!(stdout.trim().ends_with("config.toml"));
}

#[test]
fn test_track_status_without_session() {
    let home = TempDir::new().unwrap();
    let (stdout, _, code) = run_cli(&home, &["track", "status"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("not tracking"));

    let (stdout, _, code) = run_cli(&home, &["track", "clear"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("session cleared"));
}

#[test]
fn test_track_start_requires_location_source() {
    let home = TempDir::new().unwrap();
    let (_, stderr, code) = run_cli(&home, &["track", "start", "--workspace", "ws-1"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("--replay"));
}
