//! Command-line surface tests that need no database

#![allow(clippy::unwrap_used, clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;

fn massindex() -> Command {
    let mut cmd = Command::cargo_bin("massindex").unwrap();
    cmd.env_remove("DATABASE_URL").env("LOG_LEVEL", "error");
    cmd
}

#[test]
fn test_help_lists_commands() {
    massindex()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("resume"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn test_run_requires_entity_types() {
    massindex()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ENTITY_TYPES"));
}

#[test]
fn test_invalid_filter_fails_before_connecting() {
    massindex()
        .args(["plan", "Employee", "--filter", "salary"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid filter"));
}

#[test]
fn test_zero_item_count_is_a_usage_error() {
    massindex()
        .args(["run", "Employee", "--item-count", "0"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Checkpoint item count"));
}

#[test]
fn test_resume_rejects_malformed_job_id() {
    massindex()
        .args(["resume", "not-a-job"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}
