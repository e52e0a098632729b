use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

/// A closed local port so nothing in these tests reaches a real API.
const DEAD_API: &str = "http://127.0.0.1:9";

fn propsync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("propsync"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("GITHUB_TOKEN")
        .env_remove("GITHUB_ORG")
        .env("PROPSYNC_API_URL", DEAD_API);
    cmd
}

fn write_config(dir: &Path, yaml: &str) -> PathBuf {
    let path = dir.join("propsync.yaml");
    fs::write(&path, yaml).expect("write config");
    path
}

fn reports_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("sync-results-") && n.ends_with(".json"))
        })
        .collect()
}

#[test]
fn help_lists_flags() {
    let home = TempDir::new().unwrap();
    propsync_cmd(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("--source"))
        .stdout(contains("--property"))
        .stdout(contains("--dry-run"))
        .stdout(contains("--verbose"));
}

#[test]
fn missing_token_is_fatal() {
    let home = TempDir::new().unwrap();
    propsync_cmd(home.path())
        .assert()
        .failure()
        .code(1)
        .stderr(contains("GITHUB_TOKEN environment variable is required"));
}

#[test]
fn unknown_source_is_rejected_before_any_request() {
    let home = TempDir::new().unwrap();
    propsync_cmd(home.path())
        .env("GITHUB_TOKEN", "t0ken")
        .args(["--source", "jira"])
        .assert()
        .failure()
        .stderr(contains("unknown source 'jira'"))
        .stderr(contains("billing-api"));
}

#[test]
fn unconfigured_source_is_rejected() {
    let home = TempDir::new().unwrap();
    propsync_cmd(home.path())
        .env("GITHUB_TOKEN", "t0ken")
        .args(["--source", "cmdb"])
        .assert()
        .failure()
        .stderr(contains("source 'cmdb' is not configured"));
}

#[test]
fn explicit_config_must_exist() {
    let home = TempDir::new().unwrap();
    let missing = home.path().join("nope.yaml");
    propsync_cmd(home.path())
        .env("GITHUB_TOKEN", "t0ken")
        .arg("--config")
        .arg(&missing)
        .assert()
        .failure()
        .stderr(contains("config file not found"));
}

#[test]
fn unknown_config_key_is_a_parse_error() {
    let home = TempDir::new().unwrap();
    let config = write_config(home.path(), "concurency: 4\n");
    propsync_cmd(home.path())
        .env("GITHUB_TOKEN", "t0ken")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(contains("failed to parse config"));
}

#[test]
fn filter_that_selects_nothing_is_rejected() {
    let home = TempDir::new().unwrap();
    let config = write_config(
        home.path(),
        "sources:\n  billing-api:\n    customer_tier:\n      values:\n        repo-a: enterprise\n",
    );
    propsync_cmd(home.path())
        .env("GITHUB_TOKEN", "t0ken")
        .arg("--config")
        .arg(&config)
        .args(["--source", "billing-api", "--property", "team_owner"])
        .assert()
        .failure()
        .stderr(contains("nothing to sync"));
}

#[test]
fn unreachable_feed_fails_its_property_and_still_reports() {
    let home = TempDir::new().unwrap();
    let out = home.path().join("reports");
    let config = write_config(
        home.path(),
        &format!(
            "timeout_secs: 1\nsources:\n  billing-api:\n    customer_tier:\n      file: {}\n",
            home.path().join("missing-billing.json").display()
        ),
    );

    propsync_cmd(home.path())
        .env("GITHUB_TOKEN", "t0ken")
        .arg("--config")
        .arg(&config)
        .arg("--output-dir")
        .arg(&out)
        .args(["--source", "billing-api", "--dry-run"])
        .assert()
        .failure()
        .code(1)
        .stdout(contains("FAILED"))
        .stdout(contains("DRY-RUN MODE"))
        .stderr(contains("GITHUB_ORG is not set"));

    let reports = reports_in(&out);
    assert_eq!(reports.len(), 1, "exactly one report: {reports:?}");
    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&reports[0]).unwrap()).unwrap();
    assert_eq!(report["org"], "your-org");
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["failed_properties"], 1);
    assert_eq!(report["total_errors"], 0);
    assert_eq!(report["sources"][0]["property"], "customer_tier");
    assert!(report["sources"][0]["failure"]
        .as_str()
        .unwrap()
        .contains("billing-api"));
}

#[test]
fn unreachable_remote_aborts_without_report() {
    let home = TempDir::new().unwrap();
    let out = home.path().join("reports");
    let config = write_config(
        home.path(),
        "timeout_secs: 1\nsources:\n  billing-api:\n    customer_tier:\n      values:\n        repo-a: enterprise\n",
    );

    propsync_cmd(home.path())
        .env("GITHUB_TOKEN", "t0ken")
        .env("GITHUB_ORG", "acme")
        .arg("--config")
        .arg(&config)
        .arg("--output-dir")
        .arg(&out)
        .args(["--source", "billing-api"])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("cannot enumerate entities"))
        .stderr(contains("GITHUB_ORG is not set").not());

    assert!(reports_in(&out).is_empty());
}

#[test]
fn default_config_location_is_used() {
    let home = TempDir::new().unwrap();
    let dir = home.path().join(".propsync");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config.yaml"), "concurrency: 0\n").unwrap();

    propsync_cmd(home.path())
        .env("GITHUB_TOKEN", "t0ken")
        .assert()
        .failure()
        .stderr(contains("invalid setting 'concurrency'"));
}
