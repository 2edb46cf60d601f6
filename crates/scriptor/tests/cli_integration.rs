//! CLI integration tests for the Scriptor command-line interface.
//!
//! Every test points `--config` at a file inside a temp dir so the user's
//! own configuration never leaks in.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for the scriptor binary.
fn scriptor() -> Command {
    let mut cmd = Command::cargo_bin("scriptor").unwrap();
    cmd.env("SCRIPTOR_CONFIG_DIR", std::env::temp_dir().join("scriptor-cli-none"));
    cmd
}

fn write_config(dir: &Path, extra: &str) -> std::path::PathBuf {
    let root = dir.join("resources");
    let cache = dir.join("cache");
    let path = dir.join("scriptor.toml");
    std::fs::write(
        &path,
        format!(
            "[runtime]\nresource_root = {:?}\ncache_dir = {:?}\n{extra}",
            root.display().to_string(),
            cache.display().to_string()
        ),
    )
    .unwrap();
    path
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_lists_subcommands() {
    scriptor()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("polyglot"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("engines"))
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("storage"));
}

#[test]
fn test_version_displays() {
    scriptor()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("scriptor"));
}

#[test]
fn test_run_requires_engine_and_path() {
    scriptor()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("<ENGINE>"));
}

#[test]
fn test_run_rejects_malformed_param() {
    scriptor()
        .args(["run", "js", "/a.js", "--param", "novalue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("KEY=VALUE"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_engines_lists_configured_engines() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        dir.path(),
        "[engines]\nenabled = [\"command\", \"job\"]\n",
    );

    scriptor()
        .arg("--config")
        .arg(&config)
        .args(["--json", "engines"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"type\": \"command\""))
        .stdout(predicate::str::contains("\"alias\": \"Job\""))
        .stdout(predicate::str::contains("java").not());
}

#[test]
fn test_unknown_engine_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    scriptor()
        .arg("--config")
        .arg(&config)
        .args(["run", "cobol", "/x.cbl"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown engine type: cobol"));
}

#[test]
fn test_deploy_then_run_command() {
    let sh_available = std::process::Command::new("sh")
        .args(["-c", "true"])
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    if !sh_available {
        eprintln!("Skipping: sh not available");
        return;
    }

    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");
    let local = dir.path().join("hello.json");
    std::fs::write(
        &local,
        r#"{"commands": [{"os": "any", "command": "sh -c 'echo hello $SCRIPTOR_PARAM_WHO'"}]}"#,
    )
    .unwrap();

    scriptor()
        .arg("--config")
        .arg(&config)
        .arg("deploy")
        .arg(&local)
        .arg("/cmd/hello.json")
        .assert()
        .success()
        .stdout(predicate::str::contains("/cmd/hello.json"));

    scriptor()
        .arg("--config")
        .arg(&config)
        .args(["run", "command", "/cmd/hello.json", "--param", "WHO=world"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello world"));
}

#[test]
fn test_storage_roundtrip_with_sqlite() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("storage.db");
    let config = write_config(
        dir.path(),
        &format!(
            "[storage]\nbackend = \"sqlite\"\npath = {:?}\n",
            db.display().to_string()
        ),
    );

    scriptor()
        .arg("--config")
        .arg(&config)
        .args(["storage", "put", "/notes/a", "hello"])
        .assert()
        .success();

    scriptor()
        .arg("--config")
        .arg(&config)
        .args(["storage", "get", "/notes/a"])
        .assert()
        .success()
        .stdout("hello");

    scriptor()
        .arg("--config")
        .arg(&config)
        .args(["storage", "list", "/notes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/notes/a"));

    scriptor()
        .arg("--config")
        .arg(&config)
        .args(["storage", "delete", "/notes/a"])
        .assert()
        .success();

    scriptor()
        .arg("--config")
        .arg(&config)
        .args(["storage", "get", "/notes/a"])
        .assert()
        .failure();
}
