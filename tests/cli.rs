//! Binary surface tests: subcommands, flags, and the exit-code contract.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn tshift(cwd: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tshift").unwrap();
    cmd.current_dir(cwd);
    cmd
}

fn seed_tree(root: &Path) {
    fs::create_dir_all(root).unwrap();
    fs::write(root.join("a.py"), "import b\n").unwrap();
    fs::write(root.join("b.py"), "VALUE = 1\n").unwrap();
    fs::write(root.join("README.md"), "# demo\n").unwrap();
    fs::write(root.join("run_checks.sh"), "#!/bin/sh\n").unwrap();
}

#[test]
fn init_writes_config_and_refuses_overwrite() {
    let tmp = TempDir::new().unwrap();

    tshift(tmp.path())
        .args(["init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("treeshift.toml"));
    assert!(tmp.path().join("treeshift.toml").exists());

    // Second init without --force is an error; with --force it succeeds.
    tshift(tmp.path()).args(["init"]).assert().failure();
    tshift(tmp.path()).args(["init", "--force"]).assert().success();
}

#[test]
fn dry_run_exits_zero_and_moves_nothing() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("project");
    seed_tree(&root);

    tshift(tmp.path())
        .args([
            "reorganize",
            "--dry-run",
            "--project-root",
            root.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("dry run"));

    assert!(root.join("a.py").is_file());
    assert!(!root.join("core").exists());
    assert!(root.join("REORGANIZATION_REPORT.md").exists());
}

#[cfg(unix)]
#[test]
fn reorganize_validate_report_rollback_flow() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("project");
    seed_tree(&root);

    tshift(tmp.path())
        .args([
            "reorganize",
            "--yes",
            "--project-root",
            root.to_str().unwrap(),
        ])
        .assert()
        .success();

    // b.py is referenced by a.py: alias at the old path.
    assert!(root.join("core/src/b.py").is_file());
    assert!(
        fs::symlink_metadata(root.join("b.py"))
            .unwrap()
            .file_type()
            .is_symlink()
    );
    assert!(root.join("docs/user/README.md").is_file());
    assert!(root.join("dev/scripts/run_checks.sh").is_file());

    // Validator passes against the reorganized tree.
    tshift(tmp.path())
        .args(["validate", "--project-root", root.to_str().unwrap(), "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pass"));

    // The report can be regenerated from the recorded run.
    let report = root.join("REORGANIZATION_REPORT.md");
    fs::remove_file(&report).unwrap();
    tshift(tmp.path())
        .args(["report", "--project-root", root.to_str().unwrap()])
        .assert()
        .success();
    assert!(report.exists());

    // Rollback restores the original layout.
    tshift(tmp.path())
        .args([
            "rollback",
            "--yes",
            "--project-root",
            root.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("rollback complete"));

    assert!(
        fs::symlink_metadata(root.join("b.py"))
            .unwrap()
            .file_type()
            .is_file()
    );
    assert!(root.join("a.py").is_file());
    assert!(!root.join("core").exists());
    assert!(!root.join("docs").exists());
}

#[test]
fn missing_config_file_exits_with_code_four() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("project");
    seed_tree(&root);

    tshift(tmp.path())
        .args([
            "reorganize",
            "--yes",
            "--config",
            "does_not_exist.toml",
            "--project-root",
            root.to_str().unwrap(),
        ])
        .assert()
        .code(4);
}

#[test]
fn nonexistent_project_root_exits_with_code_four() {
    let tmp = TempDir::new().unwrap();

    tshift(tmp.path())
        .args([
            "reorganize",
            "--yes",
            "--project-root",
            "/definitely/not/a/real/path",
        ])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("project_root"));
}

#[test]
fn unknown_flag_exits_with_code_four() {
    let tmp = TempDir::new().unwrap();
    tshift(tmp.path())
        .args(["reorganize", "--frobnicate"])
        .assert()
        .code(4);
}

#[test]
fn rollback_without_log_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("project");
    seed_tree(&root);

    tshift(tmp.path())
        .args([
            "rollback",
            "--yes",
            "--project-root",
            root.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("transaction log not found"));
}
