use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Shared application context for global flags
#[derive(Clone, Debug)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
    pub dry_run: bool,  // global --dry-run
}

#[derive(Parser)]
#[command(name = "treeshift")]
#[command(
    about = "A transactional CLI for restructuring project trees with compatibility symlinks and full rollback"
)]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Show what would be done without executing
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a treeshift.toml config file
    Init(InitArgs),

    /// Run the reorganization pipeline
    Reorganize(ReorganizeArgs),

    /// Undo a recorded run by replaying its transaction log in reverse
    Rollback(RollbackArgs),

    /// Re-check aliases, reachability, and content integrity
    Validate(ValidateArgs),

    /// Regenerate the report document from the last recorded run
    Report(ReportArgs),
}

#[derive(Parser)]
pub struct InitArgs {
    /// Directory to initialize config in
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser)]
pub struct ReorganizeArgs {
    /// Path to configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Plan only; perform no filesystem changes
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the backup snapshot (requires --yes)
    #[arg(long)]
    pub no_backup: bool,

    /// Project root directory (overrides config)
    #[arg(long)]
    pub project_root: Option<PathBuf>,

    /// Proceed without interactive confirmation
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(Parser)]
pub struct RollbackArgs {
    /// Explicit transaction log path (defaults to the project's last run)
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Backup directory used to restore deleted files and verify results
    #[arg(long)]
    pub backup: Option<PathBuf>,

    /// Project root directory
    #[arg(long, default_value = ".")]
    pub project_root: PathBuf,

    /// Proceed without interactive confirmation
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(Parser)]
pub struct ValidateArgs {
    /// Project root directory
    #[arg(long, default_value = ".")]
    pub project_root: PathBuf,

    /// Re-hash every moved file instead of a sample
    #[arg(long)]
    pub all: bool,
}

#[derive(Parser)]
pub struct ReportArgs {
    /// Project root directory
    #[arg(long, default_value = ".")]
    pub project_root: PathBuf,

    /// Output path for the report document
    #[arg(long)]
    pub output: Option<PathBuf>,
}
