//! Failure taxonomy for the reorganization pipeline.
//!
//! Fatal conditions carry a named variant so callers (and the CLI) can map
//! them to a specific recovery path; everything recoverable travels as a
//! warning string instead of an error.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that halt an operation or the whole run.
#[derive(Debug, Error)]
pub enum ReorgError {
    /// A file or directory could not be read during scanning. Recorded as a
    /// warning by the scanner; only fatal when raised for the project root.
    #[error("cannot access {path}: {source}")]
    InaccessibleEntry {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Destination content did not hash-match the source after a copy.
    #[error("content hash mismatch after copying {source_path} to {dest_path}")]
    IntegrityMismatch {
        source_path: PathBuf,
        dest_path: PathBuf,
    },

    /// The platform or filesystem refused to create a symbolic link.
    #[error("symbolic link unsupported at {path}: {reason}")]
    LinkUnsupported { path: PathBuf, reason: String },

    /// Snapshot could not be completed; nothing has been mutated yet.
    #[error("backup incomplete: {reason}")]
    BackupIncomplete { reason: String },

    /// An inverse operation cannot be applied safely during rollback.
    #[error("rollback blocked at entry {seq}: {reason}")]
    RollbackBlocked { seq: u64, reason: String },

    /// Configuration failed validation before any work started.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Terminal state of a pipeline run, mapped to a process exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// All phases clean.
    Completed,
    /// Non-fatal issues were recorded along the way.
    CompletedWithWarnings,
    /// The run halted; `rolled_back` tells whether automatic rollback ran.
    Failed { rolled_back: bool },
    /// Planning phases finished; no mutation was attempted.
    DryRunComplete,
}

impl RunState {
    /// CLI exit code contract: 0 clean, 1 warnings, 2 rolled back,
    /// 3 manual rollback required.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunState::Completed | RunState::DryRunComplete => 0,
            RunState::CompletedWithWarnings => 1,
            RunState::Failed { rolled_back: true } => 2,
            RunState::Failed { rolled_back: false } => 3,
        }
    }
}

/// Exit code for configuration or argument problems.
pub const EXIT_INVALID_CONFIG: i32 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_contract() {
        assert_eq!(RunState::Completed.exit_code(), 0);
        assert_eq!(RunState::DryRunComplete.exit_code(), 0);
        assert_eq!(RunState::CompletedWithWarnings.exit_code(), 1);
        assert_eq!(RunState::Failed { rolled_back: true }.exit_code(), 2);
        assert_eq!(RunState::Failed { rolled_back: false }.exit_code(), 3);
    }

    #[test]
    fn error_messages_name_the_paths() {
        let err = ReorgError::IntegrityMismatch {
            source_path: PathBuf::from("a.txt"),
            dest_path: PathBuf::from("core/a.txt"),
        };
        let msg = err.to_string();
        assert!(msg.contains("a.txt"));
        assert!(msg.contains("core/a.txt"));
    }
}
