//! Configuration management with TOML support and environment overrides.
//!
//! The loaded `Config` is validated before the pipeline sees it; every other
//! component treats it as a read-only supplier of settings.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::{AppContext, InitArgs};
use crate::core::error::ReorgError;

/// Validated pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project root to reorganize.
    pub project_root: PathBuf,

    /// Plan only; stop before any mutation.
    pub dry_run: bool,

    /// Proceed with destructive operations without prompting.
    pub assume_yes: bool,

    /// Preserve permission bits and timestamps on moved files.
    pub preserve_timestamps: bool,

    /// Logging verbosity (trace, debug, info, warn, error).
    pub log_level: String,

    /// Where the final markdown report is written (root-relative).
    pub report_path: PathBuf,

    /// Largest file the scanner will hash, in bytes.
    pub max_hash_bytes: u64,

    /// Exclusion globs applied during scanning and backup.
    pub exclude_patterns: Vec<String>,

    /// Backup settings.
    pub backup: BackupConfig,

    /// Compatibility alias settings.
    pub aliases: AliasConfig,

    /// Validation settings.
    pub validation: ValidationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    pub enabled: bool,
    /// Override for the backup directory; default is a timestamped sibling
    /// of the project root.
    pub path: Option<PathBuf>,
    /// Days a snapshot stays eligible for rollback before pruning.
    pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasConfig {
    pub enabled: bool,
    /// Create an alias for every moved file, not just referenced ones.
    pub force_all: bool,
    /// Encode link targets relative to the link's parent directory.
    pub relative_targets: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Re-hash every moved file instead of a deterministic sample.
    pub check_all_hashes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            exclude_patterns: vec![
                ".git".to_string(),
                ".treeshift".to_string(),
                "__pycache__".to_string(),
                "*.pyc".to_string(),
                ".pytest_cache".to_string(),
                ".venv".to_string(),
                "venv".to_string(),
                "node_modules".to_string(),
                "target".to_string(),
                ".idea".to_string(),
                ".vscode".to_string(),
                ".DS_Store".to_string(),
            ],
            max_hash_bytes: 256 * 1024 * 1024,
            backup: BackupConfig {
                enabled: true,
                path: None,
                retention_days: 7,
            },
            aliases: AliasConfig {
                enabled: true,
                force_all: false,
                relative_targets: true,
            },
            validation: ValidationConfig {
                check_all_hashes: false,
            },
            dry_run: false,
            assume_yes: false,
            preserve_timestamps: true,
            log_level: "info".to_string(),
            report_path: PathBuf::from("REORGANIZATION_REPORT.md"),
        }
    }
}

impl Config {
    /// Check the settings the pipeline depends on. Returns the crate's
    /// `InvalidConfig` so the CLI can map it to exit code 4.
    pub fn validate(&self) -> Result<(), ReorgError> {
        if self.project_root.as_os_str().is_empty() {
            return Err(ReorgError::InvalidConfig("project_root is required".into()));
        }
        if !self.project_root.is_dir() {
            return Err(ReorgError::InvalidConfig(format!(
                "project_root is not a directory: {}",
                self.project_root.display()
            )));
        }
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ReorgError::InvalidConfig(format!(
                "unknown log_level: {}",
                self.log_level
            )));
        }
        if self.backup.retention_days == 0 {
            return Err(ReorgError::InvalidConfig(
                "backup.retention_days must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Resolved, canonical project root.
    pub fn resolved_root(&self) -> Result<PathBuf> {
        let expanded = shellexpand::tilde(&self.project_root.to_string_lossy()).into_owned();
        dunce::canonicalize(Path::new(&expanded))
            .with_context(|| format!("resolve project root: {expanded}"))
    }

    /// Directory holding per-run state (transaction log, recorded plan).
    pub fn state_dir(root: &Path) -> PathBuf {
        root.join(".treeshift")
    }

    /// Fixed, discoverable transaction log location for the current run.
    pub fn transaction_log_path(root: &Path) -> PathBuf {
        Self::state_dir(root).join("transaction.log")
    }

    /// Location of the last recorded run (plan + outcomes).
    pub fn run_record_path(root: &Path) -> PathBuf {
        Self::state_dir(root).join("run.json")
    }
}

/// Load configuration from an explicit path, the conventional file names, or
/// defaults, with `TREESHIFT_`-prefixed environment variables layered on top.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut builder = config::Config::builder();

    if let Some(path) = explicit {
        if !path.exists() {
            anyhow::bail!("config file not found: {}", path.display());
        }
        builder = builder.add_source(config::File::from(path.to_path_buf()));
    } else {
        let config_paths = ["treeshift.toml", ".treeshift.toml"];
        for path in &config_paths {
            if Path::new(path).exists() {
                builder = builder.add_source(config::File::with_name(path));
                break;
            }
        }
    }

    builder = builder.add_source(config::Environment::with_prefix("TREESHIFT").separator("__"));

    let cfg = builder.build().context("Failed to load configuration")?;

    // Empty sources fall back to defaults field by field.
    let defaults = Config::default();
    let parsed = Config {
        project_root: cfg
            .get::<PathBuf>("project_root")
            .unwrap_or(defaults.project_root),
        exclude_patterns: cfg
            .get::<Vec<String>>("exclude_patterns")
            .unwrap_or(defaults.exclude_patterns),
        max_hash_bytes: cfg
            .get::<u64>("max_hash_bytes")
            .unwrap_or(defaults.max_hash_bytes),
        backup: BackupConfig {
            enabled: cfg.get_bool("backup.enabled").unwrap_or(defaults.backup.enabled),
            path: cfg.get::<PathBuf>("backup.path").ok(),
            retention_days: cfg
                .get::<u32>("backup.retention_days")
                .unwrap_or(defaults.backup.retention_days),
        },
        aliases: AliasConfig {
            enabled: cfg.get_bool("aliases.enabled").unwrap_or(defaults.aliases.enabled),
            force_all: cfg
                .get_bool("aliases.force_all")
                .unwrap_or(defaults.aliases.force_all),
            relative_targets: cfg
                .get_bool("aliases.relative_targets")
                .unwrap_or(defaults.aliases.relative_targets),
        },
        validation: ValidationConfig {
            check_all_hashes: cfg
                .get_bool("validation.check_all_hashes")
                .unwrap_or(defaults.validation.check_all_hashes),
        },
        dry_run: cfg.get_bool("dry_run").unwrap_or(defaults.dry_run),
        assume_yes: cfg.get_bool("assume_yes").unwrap_or(defaults.assume_yes),
        preserve_timestamps: cfg
            .get_bool("preserve_timestamps")
            .unwrap_or(defaults.preserve_timestamps),
        log_level: cfg.get_string("log_level").unwrap_or(defaults.log_level),
        report_path: cfg
            .get::<PathBuf>("report_path")
            .unwrap_or(defaults.report_path),
    };

    Ok(parsed)
}

/// Write a default `treeshift.toml` into the target directory.
pub fn init(args: InitArgs, ctx: &AppContext) -> Result<()> {
    let config_path = args.path.join("treeshift.toml");

    if config_path.exists() && !args.force {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let config = Config::default();
    let toml_string =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_round_trips_through_toml() -> Result<()> {
        let config = Config::default();
        let text = toml::to_string_pretty(&config)?;
        let parsed: Config = toml::from_str(&text)?;
        assert_eq!(parsed.backup.retention_days, config.backup.retention_days);
        assert_eq!(parsed.exclude_patterns, config.exclude_patterns);
        assert_eq!(parsed.aliases.relative_targets, config.aliases.relative_targets);
        Ok(())
    }

    #[test]
    fn validate_rejects_missing_root() {
        let mut config = Config::default();
        config.project_root = PathBuf::from("/definitely/not/here");
        assert!(matches!(config.validate(), Err(ReorgError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_bad_log_level() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.project_root = tmp.path().to_path_buf();
        config.log_level = "loud".into();
        assert!(matches!(config.validate(), Err(ReorgError::InvalidConfig(_))));
    }

    #[test]
    fn explicit_config_file_overrides_defaults() -> Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("custom.toml");
        std::fs::write(&path, "dry_run = true\n[backup]\nretention_days = 3\n")?;

        let config = load_config(Some(&path))?;
        assert!(config.dry_run);
        assert_eq!(config.backup.retention_days, 3);
        // Untouched fields keep their defaults.
        assert!(config.backup.enabled);
        Ok(())
    }
}
