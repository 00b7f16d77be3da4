//! End-to-end smoke tests for the `co` binary: each invocation runs against
//! a fresh project directory so the database and `.co/debug.log` never
//! collide across tests.

use assert_cmd::Command;
use predicates::prelude::*;

fn co_cmd(project: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("co").unwrap();
    cmd.arg("--project").arg(project);
    cmd
}

#[test]
fn status_on_empty_project_reports_no_works() {
    let project = tempfile::tempdir().unwrap();

    co_cmd(project.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No works found."));
}

#[test]
fn work_create_then_status_shows_the_new_work() {
    let project = tempfile::tempdir().unwrap();

    let create = co_cmd(project.path())
        .args(["work", "create", "co/add-auth", "--base-branch", "main"])
        .assert()
        .success();
    let work_id = String::from_utf8(create.get_output().stdout.clone())
        .unwrap()
        .trim()
        .to_string();
    assert!(!work_id.is_empty());

    co_cmd(project.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("co/add-auth"));

    co_cmd(project.path())
        .args(["status", &work_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Work: co/add-auth"));
}

#[test]
fn status_for_unknown_work_id_fails() {
    let project = tempfile::tempdir().unwrap();

    co_cmd(project.path())
        .args(["status", "nonexistent-work"])
        .assert()
        .failure();
}

#[test]
fn debug_log_is_created_under_the_project_co_directory() {
    let project = tempfile::tempdir().unwrap();

    co_cmd(project.path()).arg("status").assert().success();

    assert!(project.path().join(".co/debug.log").exists());
}
