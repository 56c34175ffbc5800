//! Post-run validation: three independent read-only checks.
//!
//! (a) every alias resolves and points at content matching the hash recorded
//! at move time; (b) every externally-referenced file is still reachable via
//! its pre-move path; (c) moved content re-hashes to what was recorded (a
//! deterministic sample, or all files when configured). Nothing here mutates
//! state.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::linker::Linker;
use crate::core::model::{ExecutedMove, LinkRecord};
use crate::infra::hash::stream_blake3;

/// Upper bound on sampled re-hashes when full checking is off.
const SPOT_CHECK_LIMIT: usize = 16;

/// Outcome of one named check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub failures: Vec<String>,
}

impl CheckResult {
    fn new(name: &str, failures: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: failures.is_empty(),
            failures,
        }
    }
}

/// All three checks; the run is "clean" only if every one passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub checks: Vec<CheckResult>,
}

impl ValidationReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failure_lines(&self) -> Vec<String> {
        self.checks
            .iter()
            .flat_map(|c| c.failures.iter().map(|f| format!("{}: {f}", c.name)))
            .collect()
    }
}

/// Validates a finished (or current) tree state against recorded outcomes.
pub struct Validator {
    root: PathBuf,
}

impl Validator {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn validate(
        &self,
        moves: &[ExecutedMove],
        links: &[LinkRecord],
        referenced: &IndexSet<PathBuf>,
        check_all_hashes: bool,
    ) -> ValidationReport {
        let report = ValidationReport {
            checks: vec![
                self.check_links(moves, links),
                self.check_reachability(moves, referenced),
                self.check_integrity(moves, check_all_hashes),
            ],
        };
        info!(
            passed = report.all_passed(),
            failures = report.failure_lines().len(),
            "validation complete"
        );
        report
    }

    /// (a) Aliases resolve, and the content behind each matches the digest
    /// recorded when its target was moved.
    fn check_links(&self, moves: &[ExecutedMove], links: &[LinkRecord]) -> CheckResult {
        let mut failures = Vec::new();
        for link in links {
            if !Linker::verify_link(&self.root, &link.original) {
                failures.push(format!("alias does not resolve: {}", link.original.display()));
                continue;
            }
            let recorded = moves.iter().find(|m| m.dest == link.target);
            if let Some(mv) = recorded {
                match stream_blake3(&self.root.join(&link.original)) {
                    Ok(h) if h == mv.hash => {}
                    Ok(_) => failures.push(format!(
                        "alias content differs from move-time digest: {}",
                        link.original.display()
                    )),
                    Err(e) => failures.push(format!("{}: {e}", link.original.display())),
                }
            }
        }
        CheckResult::new("links", failures)
    }

    /// (b) Every externally-referenced file is reachable via its pre-move
    /// path, through an alias or because it never moved.
    fn check_reachability(
        &self,
        moves: &[ExecutedMove],
        referenced: &IndexSet<PathBuf>,
    ) -> CheckResult {
        let mut failures = Vec::new();
        for rel in referenced {
            let reachable = fs::metadata(self.root.join(rel))
                .map(|m| m.is_file())
                .unwrap_or(false);
            if !reachable {
                let moved = moves.iter().any(|m| &m.source == rel);
                failures.push(format!(
                    "referenced file unreachable at original path{}: {}",
                    if moved { " after move" } else { "" },
                    rel.display()
                ));
            }
        }
        CheckResult::new("reachability", failures)
    }

    /// (c) Spot-recompute digests of moved content.
    fn check_integrity(&self, moves: &[ExecutedMove], check_all: bool) -> CheckResult {
        let sample: Vec<&ExecutedMove> = if check_all || moves.len() <= SPOT_CHECK_LIMIT {
            moves.iter().collect()
        } else {
            // Deterministic spread across the move list.
            let step = moves.len().div_ceil(SPOT_CHECK_LIMIT);
            moves.iter().step_by(step).collect()
        };

        let mut failures = Vec::new();
        for mv in sample {
            match stream_blake3(&self.root.join(&mv.dest)) {
                Ok(h) if h == mv.hash => {}
                Ok(_) => failures.push(format!(
                    "moved content changed since move: {}",
                    mv.dest.display()
                )),
                Err(e) => failures.push(format!("{}: {e}", mv.dest.display())),
            }
        }
        CheckResult::new("integrity", failures)
    }
}

/// `tshift validate` entry point: re-run the three checks against the tree
/// as it stands, using the last recorded run's outcomes.
pub fn run(args: &crate::cli::ValidateArgs, ctx: &crate::cli::AppContext) -> Result<i32> {
    use crate::core::report::RunRecord;
    use crate::infra::config::Config;
    use anyhow::Context;
    use owo_colors::OwoColorize;

    crate::infra::logging::init("info", ctx.quiet);
    let root = dunce::canonicalize(&args.project_root)
        .with_context(|| format!("resolve project root: {}", args.project_root.display()))?;
    let record = RunRecord::load(&Config::run_record_path(&root))
        .context("no recorded run found; run `tshift reorganize` first")?;

    let referenced: IndexSet<PathBuf> = record.referenced.iter().cloned().collect();
    let report = Validator::new(&root).validate(
        &record.executed_moves,
        &record.links,
        &referenced,
        args.all,
    );

    if !ctx.quiet {
        for check in &report.checks {
            if check.passed {
                println!("{} {}", "pass".green(), check.name);
            } else {
                println!("{} {}", "FAIL".red(), check.name);
                for failure in &check.failures {
                    println!("  - {failure}");
                }
            }
        }
    }

    Ok(if report.all_passed() { 0 } else { 1 })
}
