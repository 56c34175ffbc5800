//! Pipeline orchestration: the explicit phase state machine.
//!
//! Phases run strictly in order; the planning phases (scan, classify,
//! analyze) are pure and repeatable, and a dry run stops after them. From
//! backup onward every phase mutates the tree, so each one is bracketed by a
//! guard comparing the transaction log's committed-entry count against the
//! expected operation count. Any operation-fatal error halts the run and
//! triggers automatic log-based rollback unless manual rollback was
//! requested. All cross-phase state travels in explicit values; nothing is
//! shared mutably between phases.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use indexmap::IndexSet;
use owo_colors::OwoColorize;
use tracing::{error, info, warn};

use crate::cli::{AppContext, ReorganizeArgs};
use crate::core::backup::{BackupManifest, BackupService};
use crate::core::classify::Classifier;
use crate::core::deps::DependencyAnalyzer;
use crate::core::error::{EXIT_INVALID_CONFIG, ReorgError, RunState};
use crate::core::linker::{LinkStyle, Linker};
use crate::core::model::{Category, ExecutedMove, LinkRecord, ReorganizationPlan};
use crate::core::mover::Mover;
use crate::core::report::{self, RunRecord};
use crate::core::rollback::RollbackService;
use crate::core::scan::Scanner;
use crate::core::txlog::TransactionLog;
use crate::core::validate::Validator;
use crate::infra::config::{Config, load_config};

/// Result of one orchestrated run.
#[derive(Debug)]
pub struct RunOutcome {
    pub state: RunState,
    pub run_id: String,
    pub record_path: PathBuf,
    pub report_path: Option<PathBuf>,
    pub moved: usize,
    pub linked: usize,
    pub warnings: usize,
    /// Reason the run failed, when it did.
    pub failure: Option<String>,
}

/// Drives the end-to-end pipeline against one validated configuration.
pub struct Orchestrator {
    config: Config,
    root: PathBuf,
    /// When set, a failed run reports instead of rolling back automatically.
    manual_rollback: bool,
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(config: Config, cancel: Arc<AtomicBool>) -> Result<Self> {
        config.validate()?;
        let root = config.resolved_root()?;
        Ok(Self {
            config,
            root,
            manual_rollback: false,
            cancel,
        })
    }

    /// Opt out of automatic rollback on failure.
    pub fn with_manual_rollback(mut self, manual: bool) -> Self {
        self.manual_rollback = manual;
        self
    }

    /// Execute the full phase sequence. Errors returned from here mean no
    /// mutation was attempted (precondition failures); everything after the
    /// first mutation resolves to a terminal `RunState` instead.
    pub fn execute(&self) -> Result<RunOutcome> {
        let started = Utc::now();
        let mut warnings: Vec<String> = Vec::new();

        // SCAN
        info!(phase = "scan", root = %self.root.display(), "starting");
        let scanner = Scanner::new(
            &self.root,
            &self.config.exclude_patterns,
            self.config.max_hash_bytes,
        )?;
        let scan = scanner.scan()?;
        warnings.extend(scan.warnings);
        info!(files = scan.records.len(), bytes = scan.total_bytes, "scanned");

        // CLASSIFY
        info!(phase = "classify", "starting");
        let classifier = Classifier::new()?;
        let classifications = classifier.classify(&scan.records);

        // ANALYZE
        info!(phase = "analyze", "starting");
        let analyzer = DependencyAnalyzer::new(&self.root)?;
        let analysis = analyzer.analyze(&scan.records);
        warnings.extend(analysis.warnings);
        let referenced = analysis.referenced;
        info!(
            edges = analysis.edges.len(),
            referenced = referenced.len(),
            "analyzed"
        );

        let (plan, plan_warnings) = ReorganizationPlan::assemble(
            &self.root,
            scan.records,
            classifications,
            analysis.edges,
            self.config.aliases.force_all,
        );
        warnings.extend(plan_warnings);

        if self.config.dry_run {
            return self.finish_dry_run(started, plan, referenced, warnings);
        }

        // BACKUP is the last gate before mutation. All-or-nothing.
        let backup = if self.config.backup.enabled {
            info!(phase = "backup", "starting");
            let service = BackupService::new(&self.root, &self.config.exclude_patterns);
            let manifest = service.snapshot(
                self.config.backup.path.as_deref(),
                self.config.backup.retention_days,
            )?;
            BackupService::verify(&manifest)?;
            Some(manifest)
        } else {
            if !self.config.assume_yes {
                return Err(ReorgError::InvalidConfig(
                    "backup is disabled; confirm with assume_yes to proceed without a snapshot"
                        .into(),
                )
                .into());
            }
            warnings.push("backup disabled; restore-from-backup will be unavailable".into());
            None
        };

        let log_path = Config::transaction_log_path(&self.root);
        let mut log = TransactionLog::create(&log_path)?;
        let run_id = log.run_id().to_string();

        match self.mutate(&mut log, &plan, &referenced, &mut warnings) {
            Ok((executed, links)) => {
                drop(log);

                // VALIDATE
                info!(phase = "validate", "starting");
                let validation = Validator::new(&self.root).validate(
                    &executed,
                    &links,
                    &referenced,
                    self.config.validation.check_all_hashes,
                );
                if !validation.all_passed() {
                    warnings.extend(validation.failure_lines());
                }

                // CLEANUP
                info!(phase = "cleanup", "starting");
                let service = BackupService::new(&self.root, &self.config.exclude_patterns);
                match service.prune(Utc::now()) {
                    Ok(removed) if !removed.is_empty() => {
                        info!(count = removed.len(), "pruned expired backups");
                    }
                    Ok(_) => {}
                    Err(e) => warnings.push(format!("backup pruning failed: {e:#}")),
                }

                // REPORT
                let state = if warnings.is_empty() {
                    RunState::Completed
                } else {
                    RunState::CompletedWithWarnings
                };
                let record = RunRecord {
                    run_id: run_id.clone(),
                    state: state_label(&state).to_string(),
                    started,
                    finished: Utc::now(),
                    dry_run: false,
                    plan,
                    executed_moves: executed,
                    links,
                    referenced: referenced.into_iter().collect(),
                    warnings: warnings.clone(),
                    validation: Some(validation),
                    backup_root: backup.as_ref().map(|m| m.backup_root.clone()),
                    transaction_log: Some(log_path),
                };
                let (record_path, report_path) = self.persist(&record)?;

                Ok(RunOutcome {
                    state,
                    run_id,
                    record_path,
                    report_path: Some(report_path),
                    moved: record.executed_moves.len(),
                    linked: record.links.len(),
                    warnings: warnings.len(),
                    failure: None,
                })
            }
            Err(failure) => {
                drop(log);
                self.finish_failed(
                    started, run_id, log_path, plan, referenced, warnings, backup, failure,
                )
            }
        }
    }

    /// The mutating phases: structure, three move passes, links. Returns the
    /// executed moves and created aliases, or the first operation-fatal
    /// error (with the specific operation already reverted by its owner).
    fn mutate(
        &self,
        log: &mut TransactionLog,
        plan: &ReorganizationPlan,
        referenced: &IndexSet<PathBuf>,
        warnings: &mut Vec<String>,
    ) -> Result<(Vec<ExecutedMove>, Vec<LinkRecord>)> {
        let mover = Mover::new(&self.root, self.config.preserve_timestamps);
        let mut expected: u64 = 0;

        // CREATE_STRUCTURE
        info!(phase = "create_structure", "starting");
        self.guard(log, expected)?;
        for dir in plan.target_dirs() {
            self.check_cancel()?;
            expected += mover.create_directory(log, &dir)? as u64;
        }
        self.guard(log, expected)?;

        // MOVE_CORE, MOVE_DOCS, MOVE_DEV
        let mut executed = Vec::new();
        let passes = [
            ("move_core", Category::Core),
            ("move_docs", Category::Documentation),
            ("move_dev", Category::Development),
        ];
        for (phase, category) in passes {
            info!(phase, "starting");
            self.guard(log, expected)?;
            for planned in plan.moves_for(category) {
                self.check_cancel()?;
                let m = mover.move_file(log, &planned.source, &planned.dest, planned.requires_alias)?;
                executed.push(m);
                expected += 1;
            }
            self.guard(log, expected)?;
        }

        // CREATE_LINKS
        info!(phase = "create_links", "starting");
        let mut links = Vec::new();
        if self.config.aliases.enabled {
            let style = if self.config.aliases.relative_targets {
                LinkStyle::Relative
            } else {
                LinkStyle::Absolute
            };
            let linker = Linker::new(&self.root, style);
            for m in executed.iter().filter(|m| m.requires_alias) {
                self.check_cancel()?;
                match linker.create_link(log, &m.source, &m.dest) {
                    Ok(record) => {
                        links.push(record);
                        expected += 1;
                    }
                    Err(e) => {
                        // An alias demanded by an incoming reference cannot
                        // be skipped; dependents would silently break.
                        if referenced.contains(&m.source) {
                            return Err(e.context(format!(
                                "mandatory alias for referenced file {}",
                                m.source.display()
                            )));
                        }
                        warnings.push(format!(
                            "optional alias skipped for {}: {e:#}",
                            m.source.display()
                        ));
                    }
                }
            }
            self.guard(log, expected)?;
        } else if executed.iter().any(|m| m.requires_alias) {
            warnings.push(
                "alias creation disabled; moved files are not reachable at their old paths".into(),
            );
        }

        Ok((executed, links))
    }

    /// Phase guard: the log's committed count must match what the phases so
    /// far were expected to produce.
    fn guard(&self, log: &TransactionLog, expected: u64) -> Result<()> {
        let committed = log.committed_count();
        if committed != expected {
            bail!(
                "transaction log committed count {committed} does not match expected {expected}"
            );
        }
        Ok(())
    }

    /// Cooperative cancellation, checked between file-level operations.
    fn check_cancel(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            bail!("run cancelled by operator");
        }
        Ok(())
    }

    fn finish_dry_run(
        &self,
        started: chrono::DateTime<Utc>,
        plan: ReorganizationPlan,
        referenced: IndexSet<PathBuf>,
        warnings: Vec<String>,
    ) -> Result<RunOutcome> {
        info!(phase = "report", "dry run; skipping all mutation");
        let state = RunState::DryRunComplete;
        let record = RunRecord {
            run_id: format!("dryrun_{}", started.format("%Y%m%d_%H%M%S")),
            state: state_label(&state).to_string(),
            started,
            finished: Utc::now(),
            dry_run: true,
            plan,
            executed_moves: Vec::new(),
            links: Vec::new(),
            referenced: referenced.into_iter().collect(),
            warnings: warnings.clone(),
            validation: None,
            backup_root: None,
            transaction_log: None,
        };
        let (record_path, report_path) = self.persist(&record)?;
        Ok(RunOutcome {
            state,
            run_id: record.run_id.clone(),
            record_path,
            report_path: Some(report_path),
            moved: 0,
            linked: 0,
            warnings: warnings.len(),
            failure: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_failed(
        &self,
        started: chrono::DateTime<Utc>,
        run_id: String,
        log_path: PathBuf,
        plan: ReorganizationPlan,
        referenced: IndexSet<PathBuf>,
        mut warnings: Vec<String>,
        backup: Option<BackupManifest>,
        failure: anyhow::Error,
    ) -> Result<RunOutcome> {
        error!("run failed: {failure:#}");

        let rolled_back = if self.manual_rollback {
            warn!("manual rollback requested; leaving tree as-is");
            false
        } else {
            let service = RollbackService::new(&self.root);
            match service.rollback(&log_path, backup.as_ref()) {
                Ok(report) if report.is_complete() => {
                    info!(reversed = report.reversed, "automatic rollback complete");
                    true
                }
                Ok(report) => {
                    error!(
                        "automatic rollback blocked: {}",
                        report.blocked.as_deref().unwrap_or("unknown")
                    );
                    warnings.push(format!(
                        "rollback blocked: {}",
                        report.blocked.unwrap_or_default()
                    ));
                    false
                }
                Err(e) => {
                    error!("automatic rollback failed: {e:#}");
                    warnings.push(format!("rollback failed: {e:#}"));
                    false
                }
            }
        };

        let state = RunState::Failed { rolled_back };
        let record = RunRecord {
            run_id: run_id.clone(),
            state: state_label(&state).to_string(),
            started,
            finished: Utc::now(),
            dry_run: false,
            plan,
            executed_moves: Vec::new(),
            links: Vec::new(),
            referenced: referenced.into_iter().collect(),
            warnings: warnings.clone(),
            validation: None,
            backup_root: backup.as_ref().map(|m| m.backup_root.clone()),
            transaction_log: Some(log_path),
        };
        let (record_path, report_path) = self.persist(&record)?;

        Ok(RunOutcome {
            state,
            run_id,
            record_path,
            report_path: Some(report_path),
            moved: 0,
            linked: 0,
            warnings: warnings.len(),
            failure: Some(format!("{failure:#}")),
        })
    }

    /// Save the run record and write the markdown report.
    fn persist(&self, record: &RunRecord) -> Result<(PathBuf, PathBuf)> {
        let record_path = Config::run_record_path(&self.root);
        record.save(&record_path)?;
        let report_path = self.root.join(&self.config.report_path);
        report::write(record, &report_path)?;
        Ok((record_path, report_path))
    }
}

fn state_label(state: &RunState) -> &'static str {
    match state {
        RunState::Completed => "completed",
        RunState::CompletedWithWarnings => "completed_with_warnings",
        RunState::Failed { rolled_back: true } => "failed_rolled_back",
        RunState::Failed { rolled_back: false } => "failed_manual_rollback_required",
        RunState::DryRunComplete => "dry_run_complete",
    }
}

/// `tshift reorganize` entry point. Returns the process exit code.
pub fn run(args: &ReorganizeArgs, ctx: &AppContext) -> Result<i32> {
    let mut config = load_config(args.config.as_deref())?;
    crate::infra::logging::init(&config.log_level, ctx.quiet);
    if args.dry_run || ctx.dry_run {
        config.dry_run = true;
    }
    if args.no_backup {
        config.backup.enabled = false;
    }
    if args.yes {
        config.assume_yes = true;
    }
    if let Some(root) = &args.project_root {
        config.project_root = root.clone();
    }

    if let Err(e) = config.validate() {
        eprintln!("{} {e}", "error:".red());
        return Ok(EXIT_INVALID_CONFIG);
    }

    if !config.dry_run && !config.assume_yes && !confirm(&config, ctx)? {
        if !ctx.quiet {
            println!("Cancelled.");
        }
        return Ok(0);
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let orchestrator = Orchestrator::new(config, cancel)?;
    match orchestrator.execute() {
        Ok(outcome) => {
            print_summary(&outcome, ctx);
            Ok(outcome.state.exit_code())
        }
        Err(e) => Ok(precondition_exit(&e, ctx)),
    }
}

/// Interactive confirmation before a mutating run.
fn confirm(config: &Config, ctx: &AppContext) -> Result<bool> {
    if ctx.quiet {
        // No prompt is possible; refuse rather than mutate silently.
        return Ok(false);
    }
    println!(
        "{} this will reorganize files under {}",
        "warning:".yellow(),
        config.project_root.display()
    );
    println!("  backup enabled: {}", config.backup.enabled);
    print!("Continue? (yes/no): ");
    std::io::stdout().flush().ok();

    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("read confirmation")?;
    let answer = answer.trim().to_ascii_lowercase();
    Ok(answer == "yes" || answer == "y")
}

fn print_summary(outcome: &RunOutcome, ctx: &AppContext) {
    if ctx.quiet {
        return;
    }
    match &outcome.state {
        RunState::Completed => println!("{} run {}", "completed:".green(), outcome.run_id),
        RunState::CompletedWithWarnings => println!(
            "{} run {} finished with {} warning(s)",
            "completed:".yellow(),
            outcome.run_id,
            outcome.warnings
        ),
        RunState::DryRunComplete => {
            println!("{} no filesystem changes were made", "dry run:".cyan());
        }
        RunState::Failed { rolled_back } => {
            println!(
                "{} {}",
                "failed:".red(),
                outcome.failure.as_deref().unwrap_or("unknown error")
            );
            if *rolled_back {
                println!("automatic rollback restored the original tree");
            } else {
                println!("manual intervention required; see `tshift rollback`");
            }
        }
    }
    println!("  moved: {}, aliases: {}", outcome.moved, outcome.linked);
    if let Some(report) = &outcome.report_path {
        println!("  report: {}", report.display());
    }
}

/// Map a precondition failure (nothing mutated) to the exit contract.
fn precondition_exit(err: &anyhow::Error, ctx: &AppContext) -> i32 {
    if !ctx.quiet {
        eprintln!("{} {err:#}", "error:".red());
    }
    match err.downcast_ref::<ReorgError>() {
        Some(ReorgError::InvalidConfig(_)) => EXIT_INVALID_CONFIG,
        _ => {
            // Backup or scan failed before any mutation; the tree is intact.
            if !ctx.quiet {
                eprintln!("no changes were made to the project tree");
            }
            RunState::Failed { rolled_back: true }.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn test_config(root: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.project_root = root.to_path_buf();
        config.assume_yes = true;
        // Keep snapshots inside the TempDir, beside the project root, and
        // the report outside the root so re-scans never pick it up.
        config.backup.path = Some(root.parent().unwrap().join("snapshot"));
        config.report_path = root.parent().unwrap().join("REORGANIZATION_REPORT.md");
        config
    }

    fn seed_tree(root: &std::path::Path) {
        fs::create_dir_all(root).unwrap();
        fs::write(root.join("a.py"), "import b\n").unwrap();
        fs::write(root.join("b.py"), "VALUE = 1\n").unwrap();
        fs::write(root.join("c.py"), "print('standalone')\n").unwrap();
        fs::write(root.join("README.md"), "# project\n").unwrap();
        fs::write(root.join("GUIDE.md"), "# guide\n").unwrap();
        fs::write(root.join("run_all.sh"), "#!/bin/sh\n").unwrap();
    }

    #[test]
    fn dry_run_mutates_nothing_and_is_repeatable() -> Result<()> {
        let tmp = TempDir::new()?;
        let root = tmp.path().join("project");
        seed_tree(&root);
        let mut config = test_config(&root);
        config.dry_run = true;

        let report_path = config.report_path.clone();
        let cancel = Arc::new(AtomicBool::new(false));
        let first = Orchestrator::new(config.clone(), cancel.clone())?.execute()?;
        assert_eq!(first.state, RunState::DryRunComplete);
        assert!(root.join("a.py").exists());
        assert!(!root.join("core").exists());

        let report_first = fs::read_to_string(&report_path)?;
        let second = Orchestrator::new(config, cancel)?.execute()?;
        assert_eq!(second.state, RunState::DryRunComplete);
        let report_second = fs::read_to_string(&report_path)?;

        // Identical plans render identical mapping/tree sections.
        let tail = |s: &str| s.split("## Statistics").nth(1).unwrap().to_string();
        assert_eq!(tail(&report_first), tail(&report_second));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn full_run_moves_classifies_and_aliases() -> Result<()> {
        let tmp = TempDir::new()?;
        let root = tmp.path().join("project");
        seed_tree(&root);
        let config = test_config(&root);

        let cancel = Arc::new(AtomicBool::new(false));
        let outcome = Orchestrator::new(config, cancel)?.execute()?;
        assert_eq!(outcome.state, RunState::Completed, "failure: {:?}", outcome.failure);

        // b.py is referenced by a.py: moved with an alias at its old path.
        assert!(root.join("core/src/b.py").is_file());
        let alias_meta = fs::symlink_metadata(root.join("b.py"))?;
        assert!(alias_meta.file_type().is_symlink());
        assert_eq!(fs::read_to_string(root.join("b.py"))?, "VALUE = 1\n");

        // c.py is unreferenced: moved, no alias left behind.
        assert!(root.join("core/src/c.py").is_file());
        assert!(fs::symlink_metadata(root.join("c.py")).is_err());

        // Docs and dev files reached their subtrees.
        assert!(root.join("docs/user/README.md").is_file());
        assert!(root.join("docs/project/GUIDE.md").is_file());
        assert!(root.join("dev/scripts/run_all.sh").is_file());

        // Run record and report were persisted.
        assert!(Config::run_record_path(&root).exists());
        assert!(root.parent().unwrap().join("REORGANIZATION_REPORT.md").exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn mid_move_failure_rolls_back_automatically() -> Result<()> {
        let tmp = TempDir::new()?;
        let root = tmp.path().join("project");
        seed_tree(&root);

        // Occupy one core destination with content the scanner never sees
        // (excluded), so the planner cannot route around it and the third
        // core move fails after two files already moved.
        fs::create_dir_all(root.join("core/src"))?;
        fs::write(root.join("core/src/c.py"), "unrelated occupant\n")?;
        let mut config = test_config(&root);
        config.exclude_patterns.push("core".to_string());

        let cancel = Arc::new(AtomicBool::new(false));
        let outcome = Orchestrator::new(config, cancel)?.execute()?;
        assert_eq!(outcome.state, RunState::Failed { rolled_back: true });

        // Zero files outside their original locations, zero orphan aliases.
        for name in ["a.py", "b.py", "c.py", "README.md", "GUIDE.md", "run_all.sh"] {
            let meta = fs::symlink_metadata(root.join(name))?;
            assert!(meta.file_type().is_file(), "{name} is not a plain file");
        }
        assert!(!root.join("core/src/a.py").exists());
        assert!(!root.join("core/src/b.py").exists());
        assert!(!root.join("docs").exists());
        assert!(!root.join("dev").exists());
        // The unrelated occupant was never touched.
        assert_eq!(
            fs::read_to_string(root.join("core/src/c.py"))?,
            "unrelated occupant\n"
        );
        Ok(())
    }

    #[test]
    fn cancellation_behaves_like_failure_with_rollback() -> Result<()> {
        let tmp = TempDir::new()?;
        let root = tmp.path().join("project");
        seed_tree(&root);
        let config = test_config(&root);

        let cancel = Arc::new(AtomicBool::new(true));
        let outcome = Orchestrator::new(config, cancel)?.execute()?;
        assert_eq!(outcome.state, RunState::Failed { rolled_back: true });

        // Original tree intact.
        for name in ["a.py", "b.py", "c.py", "README.md", "GUIDE.md", "run_all.sh"] {
            assert!(root.join(name).is_file(), "missing {name}");
        }
        assert!(!root.join("core").exists());
        Ok(())
    }

    #[test]
    fn disabled_backup_without_confirmation_is_refused() -> Result<()> {
        let tmp = TempDir::new()?;
        let root = tmp.path().join("project");
        seed_tree(&root);
        let mut config = test_config(&root);
        config.backup.enabled = false;
        config.assume_yes = false;

        let cancel = Arc::new(AtomicBool::new(false));
        let err = Orchestrator::new(config, cancel)?.execute();
        assert!(err.is_err());
        // Nothing happened.
        assert!(root.join("a.py").exists());
        assert!(!root.join("core").exists());
        Ok(())
    }
}
