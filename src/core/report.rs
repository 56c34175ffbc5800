//! Markdown reporting and the persisted run record.
//!
//! The `RunRecord` is everything a finished (or dry) run decided and did:
//! the plan, the executed moves, the aliases, warnings, and validation
//! results. It is saved under `.treeshift/` so `tshift report` can
//! regenerate the document later without re-running anything.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::model::{Category, ExecutedMove, LinkRecord, ReorganizationPlan};
use crate::core::validate::ValidationReport;

/// Recorded outcome of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    /// Terminal state label (completed, completed_with_warnings, failed,
    /// dry_run_complete).
    pub state: String,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub dry_run: bool,
    pub plan: ReorganizationPlan,
    pub executed_moves: Vec<ExecutedMove>,
    pub links: Vec<LinkRecord>,
    /// Files with incoming references at analysis time.
    pub referenced: Vec<PathBuf>,
    pub warnings: Vec<String>,
    pub validation: Option<ValidationReport>,
    pub backup_root: Option<PathBuf>,
    pub transaction_log: Option<PathBuf>,
}

impl RunRecord {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create state dir: {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self).context("serialize run record")?;
        fs::write(path, text).with_context(|| format!("write run record: {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read run record: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parse run record: {}", path.display()))
    }
}

/// Render the full markdown report for a recorded run.
pub fn render(record: &RunRecord) -> String {
    let mut lines: Vec<String> = Vec::new();
    let duration = (record.finished - record.started).num_milliseconds() as f64 / 1000.0;

    lines.push("# Reorganization Report".into());
    lines.push(String::new());
    lines.push(format!("- Run: `{}`", record.run_id));
    lines.push(format!("- State: **{}**", record.state));
    lines.push(format!("- Started: {}", record.started.to_rfc3339()));
    lines.push(format!("- Duration: {duration:.2}s"));
    if record.dry_run {
        lines.push("- Mode: dry run (no filesystem changes were made)".into());
    }
    if let Some(backup) = &record.backup_root {
        lines.push(format!("- Backup: `{}`", backup.display()));
    }
    if let Some(log) = &record.transaction_log {
        lines.push(format!("- Transaction log: `{}`", log.display()));
    }
    lines.push(String::new());

    lines.push("## Statistics".into());
    lines.push(String::new());
    let total_bytes: u64 = record.plan.files.iter().map(|f| f.size).sum();
    lines.push(format!("- Files scanned: {}", record.plan.files.len()));
    lines.push(format!(
        "- Total size: {:.2} MiB",
        total_bytes as f64 / (1024.0 * 1024.0)
    ));
    lines.push(format!("- Moves planned: {}", record.plan.moves.len()));
    lines.push(format!("- Moves executed: {}", record.executed_moves.len()));
    lines.push(format!("- Aliases created: {}", record.links.len()));
    lines.push(format!("- Referenced files: {}", record.referenced.len()));
    lines.push(String::new());

    lines.push("## Files by Category".into());
    lines.push(String::new());
    lines.push("| Category | Files |".into());
    lines.push("| --- | --- |".into());
    for category in [
        Category::Core,
        Category::Documentation,
        Category::Development,
        Category::Other,
    ] {
        let count = record
            .plan
            .category_counts()
            .get(&category)
            .copied()
            .unwrap_or(0);
        lines.push(format!("| {} | {count} |", category.label()));
    }
    lines.push(String::new());

    if !record.plan.moves.is_empty() {
        lines.push("## File Mappings".into());
        lines.push(String::new());
        for m in &record.plan.moves {
            let mut annotations = Vec::new();
            if m.requires_alias {
                annotations.push("alias");
            }
            if m.duplicate {
                annotations.push("duplicate");
            }
            let suffix = if annotations.is_empty() {
                String::new()
            } else {
                format!(" [{}]", annotations.join(", "))
            };
            lines.push(format!(
                "- `{}` \u{2192} `{}` ({}){suffix}",
                m.source.display(),
                m.dest.display(),
                m.category.label(),
            ));
        }
        lines.push(String::new());
    }

    if !record.links.is_empty() {
        lines.push("## Compatibility Aliases".into());
        lines.push(String::new());
        for link in &record.links {
            lines.push(format!(
                "- `{}` \u{2192} `{}`",
                link.original.display(),
                link.encoded_target
            ));
        }
        lines.push(String::new());
    }

    if let Some(validation) = &record.validation {
        lines.push("## Validation".into());
        lines.push(String::new());
        for check in &validation.checks {
            let status = if check.passed { "pass" } else { "FAIL" };
            lines.push(format!("- {}: {status}", check.name));
            for failure in &check.failures {
                lines.push(format!("  - {failure}"));
            }
        }
        lines.push(String::new());
    }

    if !record.warnings.is_empty() {
        lines.push("## Warnings".into());
        lines.push(String::new());
        for warning in &record.warnings {
            lines.push(format!("- {warning}"));
        }
        lines.push(String::new());
    }

    lines.push("## Tree Before".into());
    lines.push(String::new());
    lines.push("```".into());
    let before: Vec<&Path> = record.plan.files.iter().map(|f| f.rel_path.as_path()).collect();
    lines.extend(render_tree(&before));
    lines.push("```".into());
    lines.push(String::new());

    lines.push("## Tree After".into());
    lines.push(String::new());
    lines.push("```".into());
    let after_paths = after_tree_paths(&record.plan, &record.executed_moves, record.dry_run);
    let after: Vec<&Path> = after_paths.iter().map(PathBuf::as_path).collect();
    lines.extend(render_tree(&after));
    lines.push("```".into());
    lines.push(String::new());

    lines.join("\n")
}

/// Render and write the report document.
pub fn write(record: &RunRecord, output: &Path) -> Result<PathBuf> {
    let text = render(record);
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create report dir: {}", parent.display()))?;
        }
    }
    fs::write(output, text).with_context(|| format!("write report: {}", output.display()))?;
    Ok(output.to_path_buf())
}

/// Project the post-run file set: executed moves for a real run, planned
/// moves for a dry run.
fn after_tree_paths(
    plan: &ReorganizationPlan,
    executed: &[ExecutedMove],
    dry_run: bool,
) -> Vec<PathBuf> {
    let mut mapping: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();
    if dry_run {
        for m in &plan.moves {
            mapping.insert(m.source.clone(), m.dest.clone());
        }
    } else {
        for m in executed {
            mapping.insert(m.source.clone(), m.dest.clone());
        }
    }
    plan.files
        .iter()
        .map(|f| {
            mapping
                .get(&f.rel_path)
                .cloned()
                .unwrap_or_else(|| f.rel_path.clone())
        })
        .collect()
}

/// `tshift report` entry point: regenerate the document from the last
/// recorded run without re-running anything.
pub fn run(args: &crate::cli::ReportArgs, ctx: &crate::cli::AppContext) -> Result<i32> {
    use crate::infra::config::Config;

    let root = dunce::canonicalize(&args.project_root)
        .with_context(|| format!("resolve project root: {}", args.project_root.display()))?;
    let record = RunRecord::load(&Config::run_record_path(&root))
        .context("no recorded run found; run `tshift reorganize` first")?;

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| root.join("REORGANIZATION_REPORT.md"));
    let written = write(&record, &output)?;
    if !ctx.quiet {
        println!("report written to {}", written.display());
    }
    Ok(0)
}

#[derive(Default)]
struct TreeNode {
    children: BTreeMap<String, TreeNode>,
    is_file: bool,
}

/// Indented text sketch of a path set, directories first at each level.
fn render_tree(paths: &[&Path]) -> Vec<String> {
    let mut root = TreeNode::default();
    for path in paths {
        let mut node = &mut root;
        let components: Vec<String> = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        for (i, comp) in components.iter().enumerate() {
            node = node.children.entry(comp.clone()).or_default();
            if i == components.len() - 1 {
                node.is_file = true;
            }
        }
    }

    let mut out = Vec::new();
    fn walk(node: &TreeNode, depth: usize, out: &mut Vec<String>) {
        let indent = "  ".repeat(depth);
        let (dirs, files): (Vec<_>, Vec<_>) = node
            .children
            .iter()
            .partition(|(_, child)| !child.children.is_empty() || !child.is_file);
        for (name, child) in dirs.iter().chain(files.iter()) {
            let marker = if child.children.is_empty() && child.is_file {
                ""
            } else {
                "/"
            };
            out.push(format!("{indent}{name}{marker}"));
            walk(child, depth + 1, out);
        }
    }
    walk(&root, 0, &mut out);
    out
}
