//! Hash-verified file relocation.
//!
//! A move is copy + verify + delete: the destination digest must equal the
//! source digest before the source is removed, so a torn copy can never eat
//! content. Permission bits and timestamps ride along where the platform
//! supports it. Every operation writes its transaction-log intent before
//! touching the filesystem and exactly one outcome after.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::core::error::ReorgError;
use crate::core::model::ExecutedMove;
use crate::core::txlog::{OpKind, PreState, TransactionLog};
use crate::infra::hash::stream_blake3;

/// Relocates files under one project root.
pub struct Mover {
    root: PathBuf,
    preserve_timestamps: bool,
}

impl Mover {
    pub fn new(root: &Path, preserve_timestamps: bool) -> Self {
        Self {
            root: root.to_path_buf(),
            preserve_timestamps,
        }
    }

    /// Create `rel_dir` (and any missing parents), logging one Mkdir entry
    /// per directory that did not already exist. Returns how many were made.
    pub fn create_directory(&self, log: &mut TransactionLog, rel_dir: &Path) -> Result<usize> {
        let mut created = 0usize;
        let mut partial = PathBuf::new();
        for component in rel_dir.components() {
            match component {
                Component::Normal(seg) => partial.push(seg),
                Component::CurDir => continue,
                _ => bail!("directory path must be root-relative: {}", rel_dir.display()),
            }
            let abs = self.root.join(&partial);
            if abs.is_dir() {
                continue;
            }
            if abs.exists() {
                bail!(
                    "directory path occupied by a file: {}",
                    partial.display()
                );
            }
            let seq = log.begin(OpKind::Mkdir, &partial, None, PreState::default())?;
            match fs::create_dir(&abs) {
                Ok(()) => {
                    log.commit(seq)?;
                    created += 1;
                    debug!(dir = %partial.display(), "created directory");
                }
                Err(e) => {
                    log.abort(seq, &e.to_string())?;
                    return Err(e)
                        .with_context(|| format!("create directory: {}", abs.display()));
                }
            }
        }
        Ok(created)
    }

    /// Move one file, verifying content integrity across the copy. On a
    /// digest mismatch the half-written destination is removed, the log
    /// entry is aborted, and `IntegrityMismatch` is returned; the source is
    /// untouched.
    pub fn move_file(
        &self,
        log: &mut TransactionLog,
        source_rel: &Path,
        dest_rel: &Path,
        requires_alias: bool,
    ) -> Result<ExecutedMove> {
        let source_abs = self.root.join(source_rel);
        let dest_abs = self.root.join(dest_rel);

        if !source_abs.is_file() {
            let seq = log.begin(OpKind::Move, source_rel, Some(dest_rel), PreState::default())?;
            log.abort(seq, "source does not exist")?;
            bail!("move source does not exist: {}", source_rel.display());
        }
        if fs::symlink_metadata(&dest_abs).is_ok() {
            let seq = log.begin(
                OpKind::Move,
                source_rel,
                Some(dest_rel),
                PreState {
                    source_existed: true,
                    source_hash: None,
                },
            )?;
            log.abort(seq, "destination already exists")?;
            bail!("move destination already exists: {}", dest_rel.display());
        }

        let source_meta = fs::metadata(&source_abs)
            .with_context(|| format!("stat move source: {}", source_abs.display()))?;
        let source_hash = stream_blake3(&source_abs)?;

        let seq = log.begin(
            OpKind::Move,
            source_rel,
            Some(dest_rel),
            PreState {
                source_existed: true,
                source_hash: Some(source_hash.clone()),
            },
        )?;

        if let Some(parent) = dest_abs.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create move target dir: {}", parent.display()))?;
        }

        fs::copy(&source_abs, &dest_abs)
            .with_context(|| format!("copy {} to {}", source_rel.display(), dest_rel.display()))?;
        fs::set_permissions(&dest_abs, source_meta.permissions())
            .with_context(|| format!("copy permissions: {}", dest_abs.display()))?;
        if self.preserve_timestamps {
            copy_times(&source_meta, &dest_abs)
                .with_context(|| format!("copy timestamps: {}", dest_abs.display()))?;
        }

        let dest_hash = stream_blake3(&dest_abs)?;
        if dest_hash != source_hash {
            let _ = fs::remove_file(&dest_abs);
            log.abort(seq, "content hash mismatch after copy")?;
            return Err(ReorgError::IntegrityMismatch {
                source_path: source_rel.to_path_buf(),
                dest_path: dest_rel.to_path_buf(),
            }
            .into());
        }

        fs::remove_file(&source_abs)
            .with_context(|| format!("remove move source: {}", source_abs.display()))?;
        log.commit(seq)?;

        info!(
            from = %source_rel.display(),
            to = %dest_rel.display(),
            "moved"
        );
        Ok(ExecutedMove {
            source: source_rel.to_path_buf(),
            dest: dest_rel.to_path_buf(),
            hash: dest_hash,
            requires_alias,
        })
    }
}

/// Carry atime/mtime from the source metadata onto the destination.
#[cfg(unix)]
fn copy_times(src_meta: &fs::Metadata, dest: &Path) -> std::io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::MetadataExt;

    let times = [
        libc::timespec {
            tv_sec: src_meta.atime(),
            tv_nsec: src_meta.atime_nsec(),
        },
        libc::timespec {
            tv_sec: src_meta.mtime(),
            tv_nsec: src_meta.mtime_nsec(),
        },
    ];
    let c_path = CString::new(dest.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "NUL in path"))?;
    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn copy_times(_src_meta: &fs::Metadata, _dest: &Path) -> std::io::Result<()> {
    Ok(())
}
