//! Compatibility aliases: symbolic links left at each moved file's original
//! path so existing references keep resolving.
//!
//! Targets are encoded relative to the link's parent directory by default,
//! so the whole tree stays relocatable. Every created link is immediately
//! re-resolved; a link that does not point at an existing file is removed
//! again rather than left dangling.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::core::error::ReorgError;
use crate::core::model::LinkRecord;
use crate::core::txlog::{OpKind, PreState, TransactionLog};

/// How link targets are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStyle {
    /// Relative to the link's parent directory (portable tree).
    Relative,
    /// Absolute path under the current root.
    Absolute,
}

/// Creates and verifies aliases under one project root.
pub struct Linker {
    root: PathBuf,
    style: LinkStyle,
}

impl Linker {
    pub fn new(root: &Path, style: LinkStyle) -> Self {
        Self {
            root: root.to_path_buf(),
            style,
        }
    }

    /// Create an alias at `original_rel` pointing at `target_rel`, verify it
    /// resolves, and log it. `LinkUnsupported` is returned where the platform
    /// or filesystem refuses symlinks; the caller decides whether that is
    /// fatal (the target was referenced) or a warning.
    pub fn create_link(
        &self,
        log: &mut TransactionLog,
        original_rel: &Path,
        target_rel: &Path,
    ) -> Result<LinkRecord> {
        let original_abs = self.root.join(original_rel);
        let target_abs = self.root.join(target_rel);

        if !target_abs.exists() {
            let seq = log.begin(OpKind::Link, original_rel, Some(target_rel), PreState::default())?;
            log.abort(seq, "link target does not exist")?;
            bail!("link target does not exist: {}", target_rel.display());
        }
        if fs::symlink_metadata(&original_abs).is_ok() {
            let seq = log.begin(OpKind::Link, original_rel, Some(target_rel), PreState::default())?;
            log.abort(seq, "link path already occupied")?;
            bail!("link path already occupied: {}", original_rel.display());
        }

        let encoded = match self.style {
            LinkStyle::Relative => {
                let parent = original_rel.parent().unwrap_or(Path::new(""));
                relative_between(parent, target_rel)
            }
            LinkStyle::Absolute => target_abs.clone(),
        };

        if let Some(parent) = original_abs.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create link parent: {}", parent.display()))?;
        }

        let seq = log.begin(OpKind::Link, original_rel, Some(target_rel), PreState::default())?;

        if let Err(e) = make_symlink(&encoded, &original_abs) {
            log.abort(seq, &e.to_string())?;
            return Err(ReorgError::LinkUnsupported {
                path: original_rel.to_path_buf(),
                reason: e.to_string(),
            }
            .into());
        }

        // Re-resolve immediately; a dangling alias is worse than none.
        if !fs::metadata(&original_abs).map(|m| m.is_file()).unwrap_or(false) {
            let _ = fs::remove_file(&original_abs);
            log.abort(seq, "link did not resolve after creation")?;
            bail!(
                "link verification failed after creation: {}",
                original_rel.display()
            );
        }

        log.commit(seq)?;
        info!(
            at = %original_rel.display(),
            target = %target_rel.display(),
            "alias created"
        );
        Ok(LinkRecord {
            original: original_rel.to_path_buf(),
            target: target_rel.to_path_buf(),
            encoded_target: encoded.to_string_lossy().into_owned(),
            resolved: true,
        })
    }

    /// Re-check that an alias still resolves to an existing file.
    pub fn verify_link(root: &Path, original_rel: &Path) -> bool {
        let abs = root.join(original_rel);
        let is_link = fs::symlink_metadata(&abs)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link {
            return false;
        }
        fs::metadata(&abs).map(|m| m.is_file()).unwrap_or(false)
    }
}

/// Relative path from `from_dir` to `to`, both root-relative.
fn relative_between(from_dir: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component> = from_dir.components().collect();
    let to_comps: Vec<Component> = to.components().collect();
    let common = from
        .iter()
        .zip(to_comps.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for c in &to_comps[common..] {
        out.push(c.as_os_str());
    }
    debug!(
        from = %from_dir.display(),
        to = %to.display(),
        rel = %out.display(),
        "relative link target"
    );
    out
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(not(any(unix, windows)))]
fn make_symlink(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "platform has no symbolic links",
    ))
}
