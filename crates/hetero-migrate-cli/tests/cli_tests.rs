//! CLI smoke tests.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_list_engines_needs_no_config() {
    Command::cargo_bin("hetero-migrate")
        .unwrap()
        .arg("list-engines")
        .assert()
        .success()
        .stdout(predicate::str::contains("postgres"))
        .stdout(predicate::str::contains("mssql"))
        .stdout(predicate::str::contains("mysql"));
}

#[test]
fn test_missing_config_is_a_config_error() {
    Command::cargo_bin("hetero-migrate")
        .unwrap()
        .args(["--config", "/nonexistent/config.yaml", "show-checkpoints", "--run-id", "20240101-000000-abc123"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_malformed_run_id_rejected() {
    let tmp = tempfile::TempDir::new().unwrap();
    let config_path = tmp.path().join("config.yaml");
    std::fs::write(
        &config_path,
        r#"
source:
  engine: postgres
  host: localhost
  database: appdb
  user: app
  password: secret
target:
  host: localhost
  database: appdb
  user: loader
  password: secret
runs:
  artifact_root: "."
"#,
    )
    .unwrap();

    Command::cargo_bin("hetero-migrate")
        .unwrap()
        .current_dir(tmp.path())
        .args([
            "--config",
            config_path.to_str().unwrap(),
            "show-checkpoints",
            "--run-id",
            "not-a-run-id",
        ])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("malformed run id"));
}

#[test]
fn test_show_checkpoints_empty_run() {
    let tmp = tempfile::TempDir::new().unwrap();
    let config_path = tmp.path().join("config.yaml");
    std::fs::write(
        &config_path,
        format!(
            r#"
source:
  engine: postgres
  host: localhost
  database: appdb
  user: app
  password: secret
target:
  host: localhost
  database: appdb
  user: loader
  password: secret
runs:
  artifact_root: "{}"
"#,
            tmp.path().display()
        ),
    )
    .unwrap();

    Command::cargo_bin("hetero-migrate")
        .unwrap()
        .args([
            "--config",
            config_path.to_str().unwrap(),
            "show-checkpoints",
            "--run-id",
            "20240101-000000-abc123",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("No checkpoints found"));
}
