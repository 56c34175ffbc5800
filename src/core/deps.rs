//! Static reference analysis.
//!
//! Builds a directed graph of which scanned files reference which others, so
//! the mover and linker know where a compatibility alias is mandatory.
//! Extraction is best-effort by design: each source-file kind gets its own
//! `ReferenceExtractor`, unresolved candidates are dropped, and a file that
//! cannot be read yields zero edges plus a warning, never an aborted run.

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::Result;
use indexmap::{IndexMap, IndexSet};
use petgraph::graphmap::DiGraphMap;
use regex::Regex;
use tracing::{debug, warn};

use crate::core::model::{FileKind, FileRecord, ReferenceEdge};

/// One import-like statement found in a source file, with every path it
/// might plausibly resolve to inside the scanned tree.
#[derive(Debug)]
pub struct RawReference {
    pub line: usize,
    pub statement: String,
    pub candidates: Vec<PathBuf>,
}

/// Narrow seam for per-language extraction strategies. The graph logic never
/// looks inside a file; swapping a parser touches nothing else.
pub trait ReferenceExtractor {
    fn name(&self) -> &'static str;
    /// Whether this extractor wants to look at the given record.
    fn handles(&self, record: &FileRecord) -> bool;
    /// Extract references with root-relative candidate paths.
    fn extract(&self, content: &str, source_rel: &Path) -> Vec<RawReference>;
}

/// Result of analyzing the full tree.
#[derive(Debug)]
pub struct AnalyzerOutcome {
    pub edges: Vec<ReferenceEdge>,
    /// Files with at least one incoming reference; these need an alias at
    /// their original path if they move.
    pub referenced: IndexSet<PathBuf>,
    pub warnings: Vec<String>,
}

/// Walks source records through the registered extractors and assembles the
/// reference graph.
pub struct DependencyAnalyzer {
    root: PathBuf,
    extractors: Vec<Box<dyn ReferenceExtractor>>,
}

impl DependencyAnalyzer {
    /// Analyzer with the stock extractors: Python imports plus quoted path
    /// literals in any source file.
    pub fn new(root: &Path) -> Result<Self> {
        Ok(Self {
            root: root.to_path_buf(),
            extractors: vec![
                Box::new(PythonImportExtractor::new()?),
                Box::new(PathLiteralExtractor::new()?),
            ],
        })
    }

    /// Analyzer with a caller-supplied extractor set (used by tests).
    pub fn with_extractors(root: &Path, extractors: Vec<Box<dyn ReferenceExtractor>>) -> Self {
        Self {
            root: root.to_path_buf(),
            extractors,
        }
    }

    pub fn analyze(&self, records: &[FileRecord]) -> AnalyzerOutcome {
        let file_set: HashSet<&Path> = records.iter().map(|r| r.rel_path.as_path()).collect();

        // Stable indices for the graph.
        let index_of: IndexMap<&Path, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.rel_path.as_path(), i))
            .collect();

        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
        for i in 0..records.len() {
            graph.add_node(i);
        }
        let mut edges = Vec::new();
        let mut seen_edges: HashSet<(PathBuf, PathBuf, usize)> = HashSet::new();
        let mut warnings = Vec::new();

        for record in records.iter().filter(|r| r.kind == FileKind::Source) {
            let abs = record.abs_path(&self.root);
            let content = match fs::read_to_string(&abs) {
                Ok(c) => c,
                Err(e) => {
                    let msg = format!(
                        "reference analysis skipped {}: {e}",
                        record.rel_path.display()
                    );
                    warn!("{msg}");
                    warnings.push(msg);
                    continue;
                }
            };

            for extractor in &self.extractors {
                if !extractor.handles(record) {
                    continue;
                }
                for raw in extractor.extract(&content, &record.rel_path) {
                    // First candidate present in the scanned tree wins;
                    // everything else is outside our jurisdiction.
                    let Some(target) = raw
                        .candidates
                        .iter()
                        .find(|c| file_set.contains(c.as_path()))
                    else {
                        continue;
                    };
                    if *target == record.rel_path {
                        continue;
                    }
                    let key = (record.rel_path.clone(), target.clone(), raw.line);
                    if !seen_edges.insert(key) {
                        continue;
                    }
                    debug!(
                        from = %record.rel_path.display(),
                        to = %target.display(),
                        via = extractor.name(),
                        "reference edge"
                    );
                    let (Some(&from_idx), Some(&to_idx)) = (
                        index_of.get(record.rel_path.as_path()),
                        index_of.get(target.as_path()),
                    ) else {
                        continue;
                    };
                    graph.add_edge(from_idx, to_idx, ());
                    edges.push(ReferenceEdge {
                        from: record.rel_path.clone(),
                        to: target.clone(),
                        line: raw.line,
                        statement: raw.statement.clone(),
                    });
                }
            }
        }

        let referenced: IndexSet<PathBuf> = records
            .iter()
            .enumerate()
            .filter(|(i, _)| {
                graph
                    .neighbors_directed(*i, petgraph::Direction::Incoming)
                    .next()
                    .is_some()
            })
            .map(|(_, r)| r.rel_path.clone())
            .collect();

        AnalyzerOutcome {
            edges,
            referenced,
            warnings,
        }
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
/// Escaping above the root yields `None`.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(seg) => out.push(seg),
            Component::Prefix(_) | Component::RootDir => return None,
        }
    }
    Some(out)
}

/// Extracts `import x` / `from x import y` statements and maps dotted module
/// paths to candidate files in the tree.
pub struct PythonImportExtractor {
    import_re: Regex,
    from_re: Regex,
}

impl PythonImportExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            import_re: Regex::new(r"^\s*import\s+([\w\.]+(?:\s*,\s*[\w\.]+)*)")?,
            from_re: Regex::new(r"^\s*from\s+(\.*)([\w\.]*)\s+import\s+([\w\*]+)")?,
        })
    }

    fn module_candidates(module: &str) -> Vec<PathBuf> {
        let base: PathBuf = module.split('.').collect();
        vec![base.with_extension("py"), base.join("__init__.py")]
    }
}

impl ReferenceExtractor for PythonImportExtractor {
    fn name(&self) -> &'static str {
        "python-import"
    }

    fn handles(&self, record: &FileRecord) -> bool {
        record.rel_path.extension().and_then(|e| e.to_str()) == Some("py")
    }

    fn extract(&self, content: &str, source_rel: &Path) -> Vec<RawReference> {
        let source_dir = source_rel.parent().unwrap_or(Path::new(""));
        let mut out = Vec::new();

        for (idx, line) in content.lines().enumerate() {
            let line_no = idx + 1;

            if let Some(caps) = self.import_re.captures(line) {
                for module in caps[1].split(',').map(str::trim) {
                    if module.is_empty() {
                        continue;
                    }
                    out.push(RawReference {
                        line: line_no,
                        statement: line.trim().to_string(),
                        candidates: Self::module_candidates(module),
                    });
                }
            }

            if let Some(caps) = self.from_re.captures(line) {
                let dots = caps[1].len();
                let module = &caps[2];
                let imported = &caps[3];

                let candidates = if dots == 0 {
                    if module.is_empty() {
                        continue;
                    }
                    Self::module_candidates(module)
                } else {
                    // Relative import: one dot anchors at the source file's
                    // package, each further dot climbs one level.
                    let mut base = source_dir.to_path_buf();
                    for _ in 1..dots {
                        if !base.pop() {
                            break;
                        }
                    }
                    let mut candidates = Vec::new();
                    if module.is_empty() {
                        // `from . import name` names a sibling module.
                        let target: PathBuf = base.join(format!("{imported}.py"));
                        candidates.push(target);
                    } else {
                        let rel: PathBuf = module.split('.').collect();
                        candidates.push(base.join(&rel).with_extension("py"));
                        candidates.push(base.join(&rel).join("__init__.py"));
                    }
                    candidates
                };

                let candidates: Vec<PathBuf> =
                    candidates.iter().filter_map(|c| normalize(c)).collect();
                if !candidates.is_empty() {
                    out.push(RawReference {
                        line: line_no,
                        statement: line.trim().to_string(),
                        candidates,
                    });
                }
            }
        }
        out
    }
}

/// Extracts quoted strings that look like file paths from any source file.
pub struct PathLiteralExtractor {
    literal_re: Regex,
    constant_re: Regex,
}

impl PathLiteralExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            literal_re: Regex::new(r#"["']([^"'\s]{3,})["']"#)?,
            constant_re: Regex::new(r"^[A-Z_]+$|^\d+$|^[a-z]+$")?,
        })
    }

    fn is_likely_path(&self, text: &str) -> bool {
        if text.starts_with("http://") || text.starts_with("https://") || text.starts_with("ftp://")
        {
            return false;
        }
        if self.constant_re.is_match(text) {
            return false;
        }
        let has_extension = text.contains('.') && !text.ends_with('.');
        let has_separator = text.contains('/');
        has_extension || has_separator
    }
}

impl ReferenceExtractor for PathLiteralExtractor {
    fn name(&self) -> &'static str {
        "path-literal"
    }

    fn handles(&self, record: &FileRecord) -> bool {
        record.kind == FileKind::Source
    }

    fn extract(&self, content: &str, source_rel: &Path) -> Vec<RawReference> {
        let source_dir = source_rel.parent().unwrap_or(Path::new(""));
        let mut out = Vec::new();

        for (idx, line) in content.lines().enumerate() {
            for caps in self.literal_re.captures_iter(line) {
                let text = &caps[1];
                if !self.is_likely_path(text) {
                    continue;
                }
                // Try the literal both root-relative and source-relative.
                let mut candidates = Vec::new();
                if let Some(c) = normalize(Path::new(text)) {
                    candidates.push(c);
                }
                if let Some(c) = normalize(&source_dir.join(text)) {
                    candidates.push(c);
                }
                candidates.dedup();
                if !candidates.is_empty() {
                    out.push(RawReference {
                        line: idx + 1,
                        statement: line.trim().to_string(),
                        candidates,
                    });
                }
            }
        }
        out
    }
}
