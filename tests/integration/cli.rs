#[path = "common/mod.rs"]
mod common;

use std::fs;

use assert_cmd::Command;
use common::plugin_tree;
use predicates::boolean::PredicateBooleanExt;
use predicates::str::contains;
use tempfile::tempdir;

fn chartsup() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("chartsup"));
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn check_prints_planned_command_line() {
    let temp = tempdir().expect("failed to create tempdir");
    let root = temp.path();
    let charts = root.join("charts");
    fs::create_dir_all(&charts).expect("failed to create chart dir");
    let config = plugin_tree(
        root,
        "exit 0\n",
        &format!("port: 8099\nthreads: 3\nchart_dir: \"{}\"\n", charts.display()),
    );

    let script = root.join("provider.sh").display().to_string();
    let cfg_dir = root.join("cfg").display().to_string();
    chartsup()
        .arg("check")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(
            contains(format!("/bin/sh {script} -t 3 -d 1 -s 2"))
                .and(contains(format!("{cfg_dir} 8099 {}", charts.display()))),
        );

    assert!(root.join("cfg").is_dir(), "check creates the config dir");
}

#[test]
fn check_fails_without_s57_data() {
    let temp = tempdir().expect("failed to create tempdir");
    let root = temp.path();
    let config = plugin_tree(root, "exit 0\n", "");
    fs::remove_dir(root.join("share/opencpn/s57data")).expect("failed to remove s57data");

    chartsup()
        .arg("check")
        .arg("-c")
        .arg(&config)
        .assert()
        .failure()
        .stderr(contains("S57 data directory"));
}

#[test]
fn check_fails_for_missing_chart_dir() {
    let temp = tempdir().expect("failed to create tempdir");
    let root = temp.path();
    let config = plugin_tree(root, "exit 0\n", "chart_dir: \"/definitely/not/here\"\n");

    chartsup()
        .arg("check")
        .arg("-c")
        .arg(&config)
        .assert()
        .failure()
        .stderr(contains("/definitely/not/here"));
}

#[test]
fn missing_config_file_is_reported() {
    let temp = tempdir().expect("failed to create tempdir");
    let missing = temp.path().join("nope.yaml");

    chartsup()
        .arg("check")
        .arg("-c")
        .arg(&missing)
        .assert()
        .failure()
        .stderr(contains("nope.yaml"));
}

#[test]
fn status_without_record() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = plugin_tree(temp.path(), "exit 0\n", "");

    chartsup()
        .arg("status")
        .arg("-c")
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("no status recorded"));
}

#[test]
fn disabled_run_reports_inactive() {
    let temp = tempdir().expect("failed to create tempdir");
    let root = temp.path();
    let config = plugin_tree(root, "exit 0\n", "enabled: false\n");
    fs::create_dir_all(root.join("cfg")).expect("failed to create config dir");

    chartsup().arg("run").arg("-c").arg(&config).assert().success();

    chartsup()
        .arg("status")
        .arg("-c")
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("INACTIVE module not enabled in server config"));
}

#[test]
fn invalid_log_level_is_rejected() {
    chartsup()
        .arg("--log-level")
        .arg("loud")
        .arg("status")
        .assert()
        .failure()
        .stderr(contains("invalid log level"));
}
