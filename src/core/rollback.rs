//! Undo: replays the transaction log in reverse, applying the inverse of
//! each completed operation.
//!
//! Every inverse is checked against the recorded pre-state before it is
//! applied; the first entry that cannot be inverted safely (for example a
//! source path now occupied by unrelated content) halts the replay with an
//! explicit report instead of guessing. Restoring wholesale from a backup
//! snapshot remains available independently of the log.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::core::backup::{BackupManifest, BackupService};
use crate::core::txlog::{self, LoggedOp, OpKind, OpOutcome};
use crate::infra::hash::stream_blake3;

/// What happened to one log entry during rollback.
enum Inversion {
    Reversed,
    Skipped(String),
    Blocked(String),
}

/// Summary of one rollback attempt.
#[derive(Debug)]
pub struct RollbackReport {
    pub run_id: String,
    pub considered: usize,
    pub reversed: usize,
    pub skipped: Vec<(PathBuf, String)>,
    /// Set when replay halted at an irreversible entry; manual intervention
    /// (or restore-from-backup) is required.
    pub blocked: Option<String>,
}

impl RollbackReport {
    pub fn is_complete(&self) -> bool {
        self.blocked.is_none()
    }
}

/// Outcome of comparing a restored tree against a backup manifest.
#[derive(Debug)]
pub struct VerifyReport {
    pub checked: usize,
    pub matched: usize,
    pub mismatched: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.mismatched.is_empty() && self.missing.is_empty()
    }
}

/// Replays transaction logs in reverse and restores from snapshots.
pub struct RollbackService {
    root: PathBuf,
}

impl RollbackService {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Undo a run recorded at `log_path`. Completed operations are inverted
    /// newest-first; intent-only entries (crash evidence) are inverted too
    /// when on-disk state shows the mutation actually happened. `backup` is
    /// only needed to restore deleted files.
    pub fn rollback(
        &self,
        log_path: &Path,
        backup: Option<&BackupManifest>,
    ) -> Result<RollbackReport> {
        let replay = txlog::read_all(log_path)?;
        if replay.truncated_tail {
            warn!("transaction log has a torn trailing line; continuing with parsed entries");
        }

        // Failed entries were already reverted by the component that logged
        // them; Done and IntentOnly entries are candidates for inversion.
        let mut candidates: Vec<&LoggedOp> = replay
            .ops
            .iter()
            .filter(|op| !matches!(op.outcome, OpOutcome::Failed(_)))
            .collect();
        candidates.sort_by(|a, b| b.seq.cmp(&a.seq));

        let mut report = RollbackReport {
            run_id: replay.run_id.clone(),
            considered: candidates.len(),
            reversed: 0,
            skipped: Vec::new(),
            blocked: None,
        };

        for op in candidates {
            match self.invert(op, backup)? {
                Inversion::Reversed => report.reversed += 1,
                Inversion::Skipped(reason) => {
                    report.skipped.push((op.source.clone(), reason));
                }
                Inversion::Blocked(reason) => {
                    warn!(seq = op.seq, "{reason}");
                    report.blocked = Some(format!("entry {}: {reason}", op.seq));
                    break;
                }
            }
        }

        info!(
            reversed = report.reversed,
            skipped = report.skipped.len(),
            complete = report.is_complete(),
            "rollback finished"
        );
        Ok(report)
    }

    fn invert(&self, op: &LoggedOp, backup: Option<&BackupManifest>) -> Result<Inversion> {
        match op.op {
            OpKind::Move => self.invert_move(op),
            OpKind::Link => self.invert_link(op),
            OpKind::Mkdir => self.invert_mkdir(op),
            OpKind::Delete => self.invert_delete(op, backup),
        }
    }

    /// Move back from the recorded destination to the recorded source.
    fn invert_move(&self, op: &LoggedOp) -> Result<Inversion> {
        let dest_rel = match &op.dest {
            Some(d) => d,
            None => return Ok(Inversion::Blocked("move entry without destination".into())),
        };
        let source_abs = self.root.join(&op.source);
        let dest_abs = self.root.join(dest_rel);

        let dest_present = fs::symlink_metadata(&dest_abs).is_ok();
        let source_present = fs::symlink_metadata(&source_abs).is_ok();

        match (dest_present, source_present) {
            (false, true) => {
                // Nothing to undo (intent that never copied, or already
                // rolled back).
                Ok(Inversion::Skipped("already at original location".into()))
            }
            (false, false) => Ok(Inversion::Blocked(format!(
                "moved content missing from both {} and {}",
                op.source.display(),
                dest_rel.display()
            ))),
            (true, false) => {
                if let Some(parent) = source_abs.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("recreate dir: {}", parent.display()))?;
                }
                fs::rename(&dest_abs, &source_abs).with_context(|| {
                    format!(
                        "move {} back to {}",
                        dest_rel.display(),
                        op.source.display()
                    )
                })?;
                Ok(Inversion::Reversed)
            }
            (true, true) => {
                // The original path is occupied again. Only remove the
                // destination copy if the occupant is provably the same
                // content that was moved.
                let recorded = op.pre_state.source_hash.as_deref();
                let occupant = stream_blake3(&source_abs).ok();
                match (recorded, occupant) {
                    (Some(rec), Some(occ)) if rec == occ => {
                        fs::remove_file(&dest_abs).with_context(|| {
                            format!("remove leftover copy: {}", dest_abs.display())
                        })?;
                        Ok(Inversion::Reversed)
                    }
                    _ => Ok(Inversion::Blocked(format!(
                        "original path occupied by unrelated content: {}",
                        op.source.display()
                    ))),
                }
            }
        }
    }

    /// Delete the alias that was created.
    fn invert_link(&self, op: &LoggedOp) -> Result<Inversion> {
        let link_abs = self.root.join(&op.source);
        let meta = match fs::symlink_metadata(&link_abs) {
            Ok(m) => m,
            Err(_) => return Ok(Inversion::Skipped("alias already gone".into())),
        };
        if !meta.file_type().is_symlink() {
            return Ok(Inversion::Blocked(format!(
                "expected a symbolic link at {}",
                op.source.display()
            )));
        }
        fs::remove_file(&link_abs)
            .with_context(|| format!("remove alias: {}", link_abs.display()))?;
        Ok(Inversion::Reversed)
    }

    /// Remove a created directory, but only if it is empty now.
    fn invert_mkdir(&self, op: &LoggedOp) -> Result<Inversion> {
        let dir_abs = self.root.join(&op.source);
        if !dir_abs.exists() {
            return Ok(Inversion::Skipped("directory already gone".into()));
        }
        if !dir_abs.is_dir() {
            return Ok(Inversion::Blocked(format!(
                "expected a directory at {}",
                op.source.display()
            )));
        }
        let empty = fs::read_dir(&dir_abs)
            .with_context(|| format!("read dir: {}", dir_abs.display()))?
            .next()
            .is_none();
        if !empty {
            return Ok(Inversion::Skipped("directory not empty".into()));
        }
        fs::remove_dir(&dir_abs)
            .with_context(|| format!("remove dir: {}", dir_abs.display()))?;
        Ok(Inversion::Reversed)
    }

    /// Bring back a deleted file from the backup snapshot.
    fn invert_delete(&self, op: &LoggedOp, backup: Option<&BackupManifest>) -> Result<Inversion> {
        let Some(manifest) = backup else {
            return Ok(Inversion::Blocked(format!(
                "no backup available to restore deleted file: {}",
                op.source.display()
            )));
        };
        let Some(entry) = manifest.files.iter().find(|e| e.rel_path == op.source) else {
            return Ok(Inversion::Blocked(format!(
                "deleted file not present in backup: {}",
                op.source.display()
            )));
        };
        let dest = self.root.join(&op.source);
        if fs::symlink_metadata(&dest).is_ok() {
            return Ok(Inversion::Blocked(format!(
                "path occupied, cannot restore deleted file: {}",
                op.source.display()
            )));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("recreate dir: {}", parent.display()))?;
        }
        fs::copy(manifest.backup_root.join(&entry.rel_path), &dest)
            .with_context(|| format!("restore deleted file: {}", dest.display()))?;
        Ok(Inversion::Reversed)
    }

    /// The stronger fallback: overwrite the tree from the snapshot, ignoring
    /// the log entirely. Used when the log itself is suspect.
    pub fn restore_from_backup(&self, manifest: &BackupManifest) -> Result<usize> {
        BackupService::restore(manifest, &self.root)
    }

    /// Compare the current tree against a backup manifest, file by file.
    pub fn verify_against_backup(&self, manifest: &BackupManifest) -> Result<VerifyReport> {
        let mut report = VerifyReport {
            checked: 0,
            matched: 0,
            mismatched: Vec::new(),
            missing: Vec::new(),
        };
        for entry in &manifest.files {
            report.checked += 1;
            let current = self.root.join(&entry.rel_path);
            if !current.is_file() {
                report.missing.push(entry.rel_path.clone());
                continue;
            }
            match stream_blake3(&current) {
                Ok(h) if h == entry.hash => report.matched += 1,
                _ => report.mismatched.push(entry.rel_path.clone()),
            }
        }
        Ok(report)
    }
}

/// `tshift rollback` entry point. Returns the process exit code: 0 when the
/// replay completed, 3 when it halted on an irreversible entry.
pub fn run(args: &crate::cli::RollbackArgs, ctx: &crate::cli::AppContext) -> Result<i32> {
    use crate::infra::config::Config;
    use owo_colors::OwoColorize;

    crate::infra::logging::init("info", ctx.quiet);
    let root = dunce::canonicalize(&args.project_root)
        .with_context(|| format!("resolve project root: {}", args.project_root.display()))?;
    let log_path = args
        .log
        .clone()
        .unwrap_or_else(|| Config::transaction_log_path(&root));
    if !log_path.exists() {
        anyhow::bail!(
            "transaction log not found: {} (specify one with --log)",
            log_path.display()
        );
    }
    let backup = args
        .backup
        .as_deref()
        .map(BackupManifest::load)
        .transpose()?;

    if !args.yes {
        use std::io::{BufRead, Write};
        if ctx.quiet {
            return Ok(0);
        }
        println!(
            "{} this will undo the run recorded in {}",
            "warning:".yellow(),
            log_path.display()
        );
        print!("Continue? (yes/no): ");
        std::io::stdout().flush().ok();
        let mut answer = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut answer)
            .context("read confirmation")?;
        let answer = answer.trim().to_ascii_lowercase();
        if answer != "yes" && answer != "y" {
            println!("Cancelled.");
            return Ok(0);
        }
    }

    let service = RollbackService::new(&root);
    let report = service.rollback(&log_path, backup.as_ref())?;

    if !ctx.quiet {
        println!("run: {}", report.run_id);
        println!(
            "reversed: {} of {} operations",
            report.reversed, report.considered
        );
        for (path, reason) in &report.skipped {
            println!("  skipped {}: {reason}", path.display());
        }
        match &report.blocked {
            None => println!("{} tree restored", "rollback complete:".green()),
            Some(reason) => {
                println!("{} {reason}", "rollback blocked:".red());
                println!("restore-from-backup remains available via --backup");
            }
        }
    }

    if let Some(manifest) = &backup {
        let verify = service.verify_against_backup(manifest)?;
        if !ctx.quiet {
            println!(
                "backup verification: {}/{} files match",
                verify.matched, verify.checked
            );
            for path in &verify.mismatched {
                println!("  differs: {}", path.display());
            }
            for path in &verify.missing {
                println!("  missing: {}", path.display());
            }
        }
    }

    Ok(if report.is_complete() { 0 } else { 3 })
}
