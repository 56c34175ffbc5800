//! **treeshift** - Transactional reorganization of project directory trees
//!
//! Separates production code, documentation, and development artifacts into
//! clean subtrees while preserving backward compatibility through symlink
//! aliases. Every mutation is hash-verified and durably logged, so a run can
//! always be undone: by reverse-replaying the transaction log, or wholesale
//! from the verified backup snapshot taken before the first change.

/// Command-line interface with clap integration
pub mod cli;

/// Core pipeline - scanning, planning, and transactional execution
pub mod core {
    /// Failure taxonomy and exit-code mapping
    pub mod error;
    pub use error::{ReorgError, RunState};

    /// Shared data model (records, plan, links)
    pub mod model;
    pub use model::{Category, FileRecord, ReorganizationPlan};

    /// Directory scanning into file records
    pub mod scan;
    pub use scan::Scanner;

    /// Rule-table classification and duplicate detection
    pub mod classify;
    pub use classify::Classifier;

    /// Static reference analysis and the dependency graph
    pub mod deps;
    pub use deps::DependencyAnalyzer;

    /// Hash-verified whole-tree snapshots
    pub mod backup;
    pub use backup::{BackupManifest, BackupService};

    /// Durable append-only transaction log
    pub mod txlog;
    pub use txlog::TransactionLog;

    /// Verified file relocation
    pub mod mover;
    pub use mover::Mover;

    /// Compatibility symlink aliases
    pub mod linker;
    pub use linker::Linker;

    /// Post-run validation checks
    pub mod validate;
    pub use validate::Validator;

    /// Reverse-replay undo and backup restore
    pub mod rollback;
    pub use rollback::RollbackService;

    /// Markdown reporting and the persisted run record
    pub mod report;
    pub use report::RunRecord;

    /// Orchestration state machine
    pub mod pipeline;
    pub use pipeline::Orchestrator;
}

/// Infrastructure - configuration, walking, hashing, logging
pub mod infra {
    /// Configuration management with TOML support and env overrides
    pub mod config;
    pub use config::{Config, load_config};

    /// Exclusion-aware directory walking
    pub mod walk;
    pub use walk::TreeWalker;

    /// Streaming content hashing
    pub mod hash;

    /// Tracing bootstrap
    pub mod logging;
}

// Strategic re-exports for clean CLI interface
pub use cli::{AppContext, Cli, Commands};
pub use core::{Orchestrator, ReorgError, RunState};
pub use infra::{Config, TreeWalker, load_config};
