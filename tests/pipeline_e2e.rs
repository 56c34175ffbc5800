//! End-to-end pipeline tests against real temporary trees.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tempfile::TempDir;
use treeshift::core::pipeline::Orchestrator;
use treeshift::core::rollback::RollbackService;
use treeshift::core::{ReorgError, RunState};
use treeshift::infra::config::Config;
use treeshift::infra::hash::stream_blake3;
use treeshift::infra::walk::TreeWalker;

/// A small mixed tree: a.py imports b.py, c.py is unreferenced, two
/// documentation files, one development script.
fn seed_tree(root: &Path) {
    fs::create_dir_all(root).unwrap();
    fs::write(root.join("a.py"), "import b\n\nprint(b.VALUE)\n").unwrap();
    fs::write(root.join("b.py"), "VALUE = 42\n").unwrap();
    fs::write(root.join("c.py"), "def unused():\n    return 0\n").unwrap();
    fs::write(root.join("README.md"), "# demo project\n").unwrap();
    fs::write(root.join("ARCHITECTURE.md"), "# architecture\n").unwrap();
    fs::write(root.join("run_checks.sh"), "#!/bin/sh\nexit 0\n").unwrap();
}

fn test_config(root: &Path, backup_dest: &Path) -> Config {
    let mut config = Config::default();
    config.project_root = root.to_path_buf();
    config.assume_yes = true;
    config.backup.path = Some(backup_dest.to_path_buf());
    // Keep the generated report outside the root so re-scans never see it.
    config.report_path = root.parent().unwrap().join("REORGANIZATION_REPORT.md");
    config
}

/// Per-file content digests of the whole tree, keyed by relative path.
/// Symlinks are recorded by name so orphan aliases are visible.
fn tree_digest(root: &Path) -> BTreeMap<PathBuf, String> {
    let walked = TreeWalker::new(&[".treeshift".to_string()]).unwrap().walk(root);
    let mut out = BTreeMap::new();
    for abs in walked.files {
        let rel = abs.strip_prefix(root).unwrap().to_path_buf();
        out.insert(rel, stream_blake3(&abs).unwrap());
    }
    out
}

fn run_pipeline(config: Config) -> treeshift::core::pipeline::RunOutcome {
    let cancel = Arc::new(AtomicBool::new(false));
    Orchestrator::new(config, cancel).unwrap().execute().unwrap()
}

#[cfg(unix)]
#[test]
fn reorganize_moves_aliases_and_validates_clean() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("project");
    seed_tree(&root);
    let outcome = run_pipeline(test_config(&root, &tmp.path().join("backup")));

    assert_eq!(outcome.state, RunState::Completed, "{:?}", outcome.failure);
    assert_eq!(outcome.state.exit_code(), 0);

    // b.py moved under core with an alias at its original path, because
    // a.py references it.
    assert!(root.join("core/src/b.py").is_file());
    assert!(
        fs::symlink_metadata(root.join("b.py"))
            .unwrap()
            .file_type()
            .is_symlink()
    );
    assert_eq!(fs::read_to_string(root.join("b.py")).unwrap(), "VALUE = 42\n");

    // c.py moved with no alias: nothing references it.
    assert!(root.join("core/src/c.py").is_file());
    assert!(fs::symlink_metadata(root.join("c.py")).is_err());

    // Documentation and dev files landed in their subtrees, no aliases.
    assert!(root.join("docs/user/README.md").is_file());
    assert!(root.join("docs/project/ARCHITECTURE.md").is_file());
    assert!(root.join("dev/scripts/run_checks.sh").is_file());
    assert!(fs::symlink_metadata(root.join("README.md")).is_err());
    assert!(fs::symlink_metadata(root.join("run_checks.sh")).is_err());
}

#[cfg(unix)]
#[test]
fn rollback_round_trips_to_identical_tree() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("project");
    seed_tree(&root);

    let before = tree_digest(&root);
    let outcome = run_pipeline(test_config(&root, &tmp.path().join("backup")));
    assert_eq!(outcome.state, RunState::Completed, "{:?}", outcome.failure);

    // The tree is genuinely reorganized now.
    assert_ne!(before, tree_digest(&root));

    let log_path = Config::transaction_log_path(&root);
    let report = RollbackService::new(&root)
        .rollback(&log_path, None)
        .unwrap();
    assert!(report.is_complete(), "blocked: {:?}", report.blocked);

    // File set and per-file digests are identical to the pre-run state.
    assert_eq!(before, tree_digest(&root));
}

#[test]
fn dry_run_leaves_filesystem_untouched_and_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("project");
    seed_tree(&root);

    let mut config = test_config(&root, &tmp.path().join("backup"));
    config.dry_run = true;
    let report_path = config.report_path.clone();

    let before = tree_digest(&root);
    let first = run_pipeline(config.clone());
    assert_eq!(first.state, RunState::DryRunComplete);

    // Apart from the run record under .treeshift, nothing changed.
    assert_eq!(before, tree_digest(&root));
    assert!(!tmp.path().join("backup").exists());

    // Second dry run produces an identical plan and report body.
    let first_report = fs::read_to_string(&report_path).unwrap();
    let second = run_pipeline(config);
    assert_eq!(second.state, RunState::DryRunComplete);
    let second_report = fs::read_to_string(&report_path).unwrap();
    let tail = |s: &str| s.split("## Statistics").nth(1).unwrap().to_string();
    assert_eq!(tail(&first_report), tail(&second_report));
}

#[cfg(unix)]
#[test]
fn mid_pass_failure_restores_original_tree() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("project");
    seed_tree(&root);
    let before = tree_digest(&root);

    // An occupant at a planned destination that the scanner cannot see
    // forces the corresponding move to fail after earlier moves succeeded.
    fs::create_dir_all(root.join("core/src")).unwrap();
    fs::write(root.join("core/src/c.py"), "occupant\n").unwrap();
    let mut config = test_config(&root, &tmp.path().join("backup"));
    config.exclude_patterns.push("core".to_string());

    let outcome = run_pipeline(config);
    assert_eq!(outcome.state, RunState::Failed { rolled_back: true });
    assert_eq!(outcome.state.exit_code(), 2);

    // After automatic rollback: zero files outside their original
    // locations and zero orphan aliases.
    let mut after = tree_digest(&root);
    after.remove(Path::new("core/src/c.py"));
    assert_eq!(before, after);
    for name in ["a.py", "b.py", "c.py"] {
        let meta = fs::symlink_metadata(root.join(name)).unwrap();
        assert!(meta.file_type().is_file());
    }
}

#[test]
fn backup_failure_prevents_any_mutation() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("project");
    seed_tree(&root);
    let before = tree_digest(&root);

    // Pre-existing backup destination makes the snapshot refuse to start.
    let backup_dest = tmp.path().join("backup");
    fs::create_dir_all(&backup_dest).unwrap();

    let config = test_config(&root, &backup_dest);
    let cancel = Arc::new(AtomicBool::new(false));
    let err = Orchestrator::new(config, cancel)
        .unwrap()
        .execute()
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ReorgError>(),
        Some(ReorgError::BackupIncomplete { .. })
    ));
    assert_eq!(before, tree_digest(&root));
}

#[cfg(unix)]
#[test]
fn duplicate_content_gets_no_alias_of_its_own() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("project");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("main.py"), "import helper\n").unwrap();
    fs::write(root.join("helper.py"), "def go():\n    pass\n").unwrap();
    // Same bytes as helper.py, so it is flagged as a duplicate.
    fs::write(root.join("helper_copy.py"), "def go():\n    pass\n").unwrap();

    let mut config = test_config(&root, &tmp.path().join("backup"));
    // Force-alias everything; duplicates must still be exempt.
    config.aliases.force_all = true;

    let outcome = run_pipeline(config);
    assert_eq!(outcome.state, RunState::Completed, "{:?}", outcome.failure);

    // Canonical copy and the importer both get aliases (force_all).
    assert!(
        fs::symlink_metadata(root.join("helper.py"))
            .unwrap()
            .file_type()
            .is_symlink()
    );
    // The duplicate moved but left no alias behind.
    assert!(root.join("core/src/helper_copy.py").is_file());
    assert!(fs::symlink_metadata(root.join("helper_copy.py")).is_err());
}
