//! File discovery: walks the project tree and builds the inventory of
//! `FileRecord`s every later phase works from.
//!
//! Purely observational; nothing on disk is touched. Unreadable entries and
//! oversized files become warnings, never failures; a scan only aborts if
//! the root itself is inaccessible.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::core::error::ReorgError;
use crate::core::model::{Encoding, FileKind, FileRecord, HashState};
use crate::infra::hash::hash_capped;
use crate::infra::walk::TreeWalker;

/// Bytes sampled from the head of each file for encoding detection.
const ENCODING_SAMPLE_BYTES: usize = 10 * 1024;

/// Extensions treated as program source, eligible for reference analysis.
const SOURCE_EXTENSIONS: [&str; 12] = [
    "py", "rs", "js", "ts", "go", "c", "cc", "cpp", "h", "hpp", "java", "sh",
];

/// Result of scanning one tree.
#[derive(Debug)]
pub struct ScanOutcome {
    pub records: Vec<FileRecord>,
    pub warnings: Vec<String>,
    pub total_bytes: u64,
}

/// Walks a directory tree and produces `FileRecord`s.
pub struct Scanner {
    root: PathBuf,
    walker: TreeWalker,
    max_hash_bytes: u64,
}

impl Scanner {
    pub fn new(root: &Path, exclude_patterns: &[String], max_hash_bytes: u64) -> Result<Self> {
        if !root.is_dir() {
            return Err(ReorgError::InaccessibleEntry {
                path: root.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "project root is not a directory",
                ),
            }
            .into());
        }
        Ok(Self {
            root: root.to_path_buf(),
            walker: TreeWalker::new(exclude_patterns)?,
            max_hash_bytes,
        })
    }

    /// Scan the whole tree. Records come back in sorted path order so two
    /// scans of an unmodified tree are identical.
    pub fn scan(&self) -> Result<ScanOutcome> {
        let walked = self.walker.walk(&self.root);
        let mut warnings = walked.warnings;

        let max_hash_bytes = self.max_hash_bytes;
        let root = self.root.clone();
        let results: Vec<Result<FileRecord, String>> = walked
            .files
            .par_iter()
            .map(|abs| inspect_file(&root, abs, max_hash_bytes))
            .collect();

        let mut records = Vec::with_capacity(results.len());
        let mut total_bytes = 0u64;
        for result in results {
            match result {
                Ok(record) => {
                    if record.hash == HashState::Skipped {
                        warnings.push(format!(
                            "hash skipped (over {} bytes): {}",
                            max_hash_bytes,
                            record.rel_path.display()
                        ));
                    }
                    total_bytes += record.size;
                    records.push(record);
                }
                Err(warning) => {
                    warn!("{warning}");
                    warnings.push(warning);
                }
            }
        }

        debug!(
            files = records.len(),
            bytes = total_bytes,
            "scan complete"
        );
        Ok(ScanOutcome {
            records,
            warnings,
            total_bytes,
        })
    }
}

/// Build one record; any IO failure is reported as a warning string.
fn inspect_file(root: &Path, abs: &Path, max_hash_bytes: u64) -> Result<FileRecord, String> {
    let rel_path = abs
        .strip_prefix(root)
        .map_err(|_| format!("file outside project root: {}", abs.display()))?
        .to_path_buf();

    let meta = fs::metadata(abs)
        .map_err(|e| format!("cannot access {}: {e}", rel_path.display()))?;
    let size = meta.len();
    let modified: DateTime<Utc> = meta
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .into();

    let encoding = detect_encoding(abs)
        .map_err(|e| format!("cannot sample {}: {e}", rel_path.display()))?;
    let kind = detect_kind(&rel_path, encoding);

    let hash = hash_capped(abs, size, max_hash_bytes)
        .map_err(|e| format!("cannot hash {}: {e}", rel_path.display()))?;

    let non_ascii_name = abs
        .file_name()
        .map(|n| n.to_string_lossy().chars().any(|c| !c.is_ascii()))
        .unwrap_or(false);

    Ok(FileRecord {
        rel_path,
        size,
        modified,
        hash,
        encoding,
        kind,
        executable: is_executable(&meta),
        non_ascii_name,
    })
}

/// Inspect a content sample: NUL bytes mean binary, otherwise plain ASCII or
/// UTF-8. A multibyte sequence split at the sample boundary still counts as
/// UTF-8.
fn detect_encoding(path: &Path) -> std::io::Result<Encoding> {
    use std::io::Read;

    let mut buf = vec![0u8; ENCODING_SAMPLE_BYTES];
    let mut f = fs::File::open(path)?;
    let n = f.read(&mut buf)?;
    buf.truncate(n);

    if buf.is_empty() {
        return Ok(Encoding::Utf8);
    }
    if buf.contains(&0) {
        return Ok(Encoding::Binary);
    }
    if buf.is_ascii() {
        return Ok(Encoding::Ascii);
    }
    match std::str::from_utf8(&buf) {
        Ok(_) => Ok(Encoding::Utf8),
        Err(e) if e.error_len().is_none() && buf.len() == ENCODING_SAMPLE_BYTES => {
            // Incomplete trailing sequence cut off by the sample window.
            Ok(Encoding::Utf8)
        }
        Err(_) => Ok(Encoding::Binary),
    }
}

fn detect_kind(rel_path: &Path, encoding: Encoding) -> FileKind {
    let ext = rel_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext {
        Some(ext) if SOURCE_EXTENSIONS.contains(&ext.as_str()) => FileKind::Source,
        _ if encoding != Encoding::Binary => FileKind::Text,
        _ => FileKind::Binary,
    }
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    false
}
