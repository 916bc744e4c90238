//! CLI smoke tests
//!
//! Only surface-level: parsing, config management and completions. Nothing
//! here touches the network or needs privileges.

use assert_cmd::Command;
use predicates::prelude::*;

fn tetherveil() -> Command {
    Command::cargo_bin("tetherveil").unwrap()
}

#[test]
fn help_lists_commands() {
    tetherveil()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("connect"))
        .stdout(predicate::str::contains("doctor"))
        .stdout(predicate::str::contains("daemon"));
}

#[test]
fn version_prints() {
    tetherveil()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tetherveil"));
}

#[test]
fn unknown_profile_is_rejected() {
    tetherveil()
        .args(["--profile", "warp-speed", "config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown profile"));
}

#[test]
fn config_show_emits_toml() {
    tetherveil()
        .args(["--quiet", "--profile", "compat", "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[general]"))
        .stdout(predicate::str::contains("proxy_redirect = true"));
}

#[test]
fn config_init_and_validate_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    tetherveil()
        .args(["--quiet", "config", "init", "--profile", "paranoid"])
        .args(["--output", path.to_str().unwrap()])
        .assert()
        .success();

    tetherveil()
        .args(["--quiet", "config", "validate", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"));

    // Refuses to clobber without --force
    tetherveil()
        .args(["--quiet", "config", "init", "--profile", "paranoid"])
        .args(["--output", path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn validate_rejects_broken_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[health]\nwindow = 0\n").unwrap();

    tetherveil()
        .args(["--quiet", "config", "validate", path.to_str().unwrap()])
        .assert()
        .failure();
}

#[test]
fn completions_generate_for_bash() {
    tetherveil()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tetherveil"));
}

#[test]
fn connect_check_prints_layer_plan() {
    tetherveil()
        .args(["--quiet", "--profile", "standard", "connect", "--check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ttl_clamp"))
        .stdout(predicate::str::contains("proxy_redirect"));
}
