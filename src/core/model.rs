//! Core data model shared by every pipeline phase.
//!
//! Everything here is plain data: produced by one phase, consumed read-only
//! by later ones. The `ReorganizationPlan` is the single source of truth for
//! "what should move where" and is treated as immutable once assembled.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Broad content kind inferred at scan time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    /// Program source (by extension); eligible for reference analysis.
    Source,
    /// Readable text that is not program source.
    Text,
    /// Anything with non-text content.
    Binary,
}

/// Text encoding detected from a content sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    Ascii,
    Utf8,
    Binary,
}

/// Content hash, or the reason it was not computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashState {
    /// `blake3:<hex>` digest of the full content.
    Hashed(String),
    /// File exceeded the configured hashing cap.
    Skipped,
}

impl HashState {
    pub fn digest(&self) -> Option<&str> {
        match self {
            HashState::Hashed(d) => Some(d.as_str()),
            HashState::Skipped => None,
        }
    }
}

/// One scanned file. Identity is the root-relative original path; records
/// are never mutated after the scan phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the project root.
    pub rel_path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub hash: HashState,
    pub encoding: Encoding,
    pub kind: FileKind,
    pub executable: bool,
    pub non_ascii_name: bool,
}

impl FileRecord {
    pub fn abs_path(&self, root: &Path) -> PathBuf {
        root.join(&self.rel_path)
    }
}

/// Top-level destination category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Core,
    Documentation,
    Development,
    Other,
}

impl Category {
    pub fn label(&self) -> &'static str {
        match self {
            Category::Core => "core",
            Category::Documentation => "documentation",
            Category::Development => "development",
            Category::Other => "other",
        }
    }
}

/// Outcome of classifying one `FileRecord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub rel_path: PathBuf,
    pub category: Category,
    /// Identifier of the rule that matched (or "fallback").
    pub rule_id: String,
    /// Root-relative directory the file should land in.
    pub target_dir: PathBuf,
    /// Set when another record with identical content hash precedes this one.
    pub duplicate_of: Option<PathBuf>,
}

/// A detected static reference from one scanned file to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceEdge {
    /// Root-relative path of the referencing file.
    pub from: PathBuf,
    /// Root-relative path of the referenced file.
    pub to: PathBuf,
    /// 1-based line the statement was found on.
    pub line: usize,
    /// Raw statement text, trimmed.
    pub statement: String,
}

/// One planned relocation, derived from a classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedMove {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub category: Category,
    /// True when at least one other file references `source`, so an alias at
    /// the old path is mandatory after the move.
    pub requires_alias: bool,
    /// Duplicates ride along but never get their own alias.
    pub duplicate: bool,
}

/// Aggregate output of the scan/classify/analyze phases. Built once per run;
/// dry-run mode stops here and hands it straight to the reporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorganizationPlan {
    pub root: PathBuf,
    pub files: Vec<FileRecord>,
    pub classifications: IndexMap<PathBuf, Classification>,
    pub edges: Vec<ReferenceEdge>,
    pub moves: Vec<PlannedMove>,
    pub scanned_at: DateTime<Utc>,
}

impl ReorganizationPlan {
    /// Assemble the plan from phase outputs. A file is planned for a move
    /// when its classified target differs from where it already sits; files
    /// in `Other` stay put. Alias necessity follows incoming references,
    /// except duplicates, whose canonical copy's alias suffices. Two files
    /// that would land on the same destination name cannot both move; the
    /// later one stays put with a warning.
    pub fn assemble(
        root: &Path,
        files: Vec<FileRecord>,
        classifications: IndexMap<PathBuf, Classification>,
        edges: Vec<ReferenceEdge>,
        force_alias: bool,
    ) -> (Self, Vec<String>) {
        let mut referenced: Vec<&Path> = edges.iter().map(|e| e.to.as_path()).collect();
        referenced.sort();
        referenced.dedup();

        let existing: std::collections::HashSet<&Path> =
            files.iter().map(|f| f.rel_path.as_path()).collect();

        let mut warnings = Vec::new();
        let mut moves = Vec::new();
        let mut taken: std::collections::HashSet<PathBuf> = std::collections::HashSet::new();
        for cls in classifications.values() {
            if cls.category == Category::Other {
                continue;
            }
            let file_name = match cls.rel_path.file_name() {
                Some(n) => n,
                None => continue,
            };
            let dest = cls.target_dir.join(file_name);
            if dest == cls.rel_path {
                continue;
            }
            if taken.contains(&dest) || existing.contains(dest.as_path()) {
                warnings.push(format!(
                    "destination collision, leaving in place: {} (wanted {})",
                    cls.rel_path.display(),
                    dest.display()
                ));
                continue;
            }
            taken.insert(dest.clone());
            let duplicate = cls.duplicate_of.is_some();
            let is_referenced = referenced.binary_search(&cls.rel_path.as_path()).is_ok();
            let requires_alias = !duplicate && (is_referenced || force_alias);
            moves.push(PlannedMove {
                source: cls.rel_path.clone(),
                dest,
                category: cls.category,
                requires_alias,
                duplicate,
            });
        }

        let plan = Self {
            root: root.to_path_buf(),
            files,
            classifications,
            edges,
            moves,
            scanned_at: Utc::now(),
        };
        (plan, warnings)
    }

    /// Moves scheduled for one category, in plan order.
    pub fn moves_for(&self, category: Category) -> impl Iterator<Item = &PlannedMove> {
        self.moves.iter().filter(move |m| m.category == category)
    }

    /// Every directory some move targets, deduplicated, in plan order.
    pub fn target_dirs(&self) -> Vec<PathBuf> {
        let mut seen = IndexMap::new();
        for m in &self.moves {
            if let Some(parent) = m.dest.parent() {
                seen.entry(parent.to_path_buf()).or_insert(());
            }
        }
        seen.into_keys().collect()
    }

    /// Count of files per category.
    pub fn category_counts(&self) -> IndexMap<Category, usize> {
        let mut counts = IndexMap::new();
        for cls in self.classifications.values() {
            *counts.entry(cls.category).or_insert(0) += 1;
        }
        counts
    }
}

/// One alias created by the linker, re-verified by the validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Root-relative path the alias sits at (the file's original location).
    pub original: PathBuf,
    /// Root-relative path the alias points to.
    pub target: PathBuf,
    /// The literal target string written into the link.
    pub encoded_target: String,
    /// Whether the alias resolved to an existing file when created.
    pub resolved: bool,
}

/// One completed relocation, as executed (not merely planned).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedMove {
    pub source: PathBuf,
    pub dest: PathBuf,
    /// Digest of the content at move time, used for later verification.
    pub hash: String,
    pub requires_alias: bool,
}
