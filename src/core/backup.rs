//! Whole-tree snapshots with hash-verified, all-or-nothing semantics.
//!
//! A snapshot copies the entire project to a timestamped directory beside
//! the project root and verifies every copy against the original's digest.
//! Any single failure removes the partial snapshot and aborts the pipeline
//! before the first mutation. Restore is the rollback service's last-resort
//! path, independent of the transaction log.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::error::ReorgError;
use crate::infra::hash::stream_blake3;
use crate::infra::walk::TreeWalker;

/// One backed-up file, recorded in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    pub rel_path: PathBuf,
    pub size: u64,
    pub hash: String,
}

/// Mapping from original tree to snapshot, with the retention deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub backup_root: PathBuf,
    pub project_root: PathBuf,
    pub created: DateTime<Utc>,
    pub retention_until: DateTime<Utc>,
    pub files: Vec<BackupEntry>,
}

const MANIFEST_NAME: &str = "manifest.json";

impl BackupManifest {
    pub fn manifest_path(backup_root: &Path) -> PathBuf {
        backup_root.join(MANIFEST_NAME)
    }

    pub fn load(backup_root: &Path) -> Result<Self> {
        let path = Self::manifest_path(backup_root);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("read backup manifest: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parse backup manifest: {}", path.display()))
    }

    fn save(&self) -> Result<()> {
        let path = Self::manifest_path(&self.backup_root);
        let text = serde_json::to_string_pretty(self).context("serialize backup manifest")?;
        fs::write(&path, text)
            .with_context(|| format!("write backup manifest: {}", path.display()))?;
        fs::File::open(&path)?.sync_all().ok();
        Ok(())
    }
}

/// Creates, verifies, restores, and prunes snapshots.
pub struct BackupService {
    project_root: PathBuf,
    exclude_patterns: Vec<String>,
}

impl BackupService {
    pub fn new(project_root: &Path, exclude_patterns: &[String]) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            exclude_patterns: exclude_patterns.to_vec(),
        }
    }

    /// Default snapshot location: a timestamped sibling of the project root.
    pub fn default_backup_root(&self) -> PathBuf {
        let name = self
            .project_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string());
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let parent = self
            .project_root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        parent.join(format!("{name}_backup_{stamp}"))
    }

    /// Copy the whole tree to `backup_root`, verifying every file by digest.
    /// All-or-nothing: the first failed copy or mismatch removes the partial
    /// snapshot and returns `BackupIncomplete`.
    pub fn snapshot(
        &self,
        backup_root: Option<&Path>,
        retention_days: u32,
    ) -> Result<BackupManifest> {
        let backup_root = backup_root
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.default_backup_root());

        if backup_root.exists() {
            bail!(ReorgError::BackupIncomplete {
                reason: format!("backup path already exists: {}", backup_root.display()),
            });
        }
        if backup_root.starts_with(&self.project_root) {
            bail!(ReorgError::BackupIncomplete {
                reason: "backup path must be outside the project root".into(),
            });
        }

        let walker = TreeWalker::new(&self.exclude_patterns)?;
        let walked = walker.walk(&self.project_root);

        info!(
            files = walked.files.len(),
            dest = %backup_root.display(),
            "creating backup snapshot"
        );

        let copy_one = |abs: &PathBuf| -> Result<BackupEntry> {
            let rel = abs
                .strip_prefix(&self.project_root)
                .with_context(|| format!("path outside root: {}", abs.display()))?;
            let dest = backup_root.join(rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create backup dir: {}", parent.display()))?;
            }
            let source_hash = stream_blake3(abs)?;
            fs::copy(abs, &dest).with_context(|| format!("copy to backup: {}", dest.display()))?;
            let copy_hash = stream_blake3(&dest)?;
            if source_hash != copy_hash {
                bail!("backup copy verification failed for {}", rel.display());
            }
            Ok(BackupEntry {
                rel_path: rel.to_path_buf(),
                size: fs::metadata(&dest)?.len(),
                hash: copy_hash,
            })
        };

        let results: Vec<Result<BackupEntry>> = walked.files.par_iter().map(copy_one).collect();

        let mut files = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(entry) => files.push(entry),
                Err(e) => {
                    // One bad copy poisons the snapshot; remove it entirely.
                    let _ = fs::remove_dir_all(&backup_root);
                    return Err(ReorgError::BackupIncomplete {
                        reason: e.to_string(),
                    }
                    .into());
                }
            }
        }

        let created = Utc::now();
        let manifest = BackupManifest {
            backup_root: backup_root.clone(),
            project_root: self.project_root.clone(),
            created,
            retention_until: created + Duration::days(i64::from(retention_days)),
            files,
        };
        manifest.save()?;
        info!(files = manifest.files.len(), "backup snapshot complete");
        Ok(manifest)
    }

    /// Confirm every manifest entry still exists in the snapshot with the
    /// recorded digest.
    pub fn verify(manifest: &BackupManifest) -> Result<()> {
        let failures: Vec<String> = manifest
            .files
            .par_iter()
            .filter_map(|entry| {
                let path = manifest.backup_root.join(&entry.rel_path);
                match stream_blake3(&path) {
                    Ok(h) if h == entry.hash => None,
                    Ok(_) => Some(format!("digest mismatch: {}", entry.rel_path.display())),
                    Err(e) => Some(format!("{}: {e}", entry.rel_path.display())),
                }
            })
            .collect();

        if !failures.is_empty() {
            return Err(ReorgError::BackupIncomplete {
                reason: format!("{} snapshot entries failed verification", failures.len()),
            }
            .into());
        }
        Ok(())
    }

    /// Copy every backed-up file to its recorded original path, overwriting
    /// whatever is there now. Aliases in the way are removed, not followed.
    pub fn restore(manifest: &BackupManifest, project_root: &Path) -> Result<usize> {
        let mut restored = 0usize;
        for entry in &manifest.files {
            let source = manifest.backup_root.join(&entry.rel_path);
            let dest = project_root.join(&entry.rel_path);

            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create restore dir: {}", parent.display()))?;
            }
            // A symlink at the destination must not redirect the write.
            if fs::symlink_metadata(&dest).is_ok() {
                fs::remove_file(&dest)
                    .with_context(|| format!("clear restore target: {}", dest.display()))?;
            }
            fs::copy(&source, &dest)
                .with_context(|| format!("restore file: {}", dest.display()))?;
            let restored_hash = stream_blake3(&dest)?;
            if restored_hash != entry.hash {
                bail!("restored content mismatch for {}", entry.rel_path.display());
            }
            restored += 1;
        }
        info!(files = restored, "restore from backup complete");
        Ok(restored)
    }

    /// Remove snapshots of this project whose retention deadline has passed.
    /// Returns the removed backup roots.
    pub fn prune(&self, now: DateTime<Utc>) -> Result<Vec<PathBuf>> {
        let parent = match self.project_root.parent() {
            Some(p) => p,
            None => return Ok(Vec::new()),
        };
        let name = self
            .project_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let prefix = format!("{name}_backup_");

        let mut removed = Vec::new();
        let entries = match fs::read_dir(parent) {
            Ok(e) => e,
            Err(_) => return Ok(Vec::new()),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !file_name.starts_with(&prefix) {
                continue;
            }
            let expired = match BackupManifest::load(&path) {
                Ok(m) => m.retention_until < now,
                Err(e) => {
                    warn!("unreadable manifest in {}: {e}", path.display());
                    continue;
                }
            };
            if expired {
                fs::remove_dir_all(&path)
                    .with_context(|| format!("prune backup: {}", path.display()))?;
                removed.push(path);
            }
        }
        Ok(removed)
    }
}
