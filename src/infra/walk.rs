//! Exclusion-aware directory walker.
//!
//! Unlike a gitignore-driven walk, reorganization must see everything the
//! operator's tree actually contains, so ignore files are NOT consulted;
//! only the configured exclusion globs (version-control metadata, caches,
//! virtualenvs) prune the traversal. Unreadable entries are collected as
//! warnings instead of aborting or being silently dropped.
//!
//! Backed by ripgrep's `ignore` crate and `globset`. Extra globs are applied
//! in two places:
//!   1) Early: prune directories during traversal (filter_entry).
//!   2) Late: filter out files that still slipped through.

use std::path::{Path, PathBuf};

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::{DirEntry, WalkBuilder};

/// Result of one traversal: sorted file paths plus non-fatal warnings.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub files: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

/// Walker over a project tree with configured exclusion globs.
pub struct TreeWalker {
    exclusions: GlobSet,
    follow_symlinks: bool,
}

impl TreeWalker {
    /// Build a walker from exclusion patterns such as `.git`, `__pycache__`,
    /// `*.pyc`, `node_modules`. Bare names match at any depth.
    pub fn new(exclusions: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclusions {
            // A bare pattern like ".git" or "*.pyc" should match anywhere in
            // the tree, matching how operators write exclusion lists.
            if !pattern.contains('/') {
                builder.add(Glob::new(&format!("**/{pattern}"))?);
            }
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            exclusions: builder.build()?,
            follow_symlinks: false,
        })
    }

    /// Follow symlinked directories during traversal (default off, so a
    /// previously-created alias tree is never scanned twice).
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Traverse regular files under `root`. Output is sorted for stable
    /// classification and reporting; IO failures become warnings.
    pub fn walk(&self, root: &Path) -> WalkOutcome {
        let mut b = WalkBuilder::new(root);

        // See the whole tree: no ignore files, include dotfiles.
        b.hidden(false);
        b.git_ignore(false);
        b.git_global(false);
        b.git_exclude(false);
        b.ignore(false);
        b.parents(false);
        b.follow_links(self.follow_symlinks);

        let exclusions = self.exclusions.clone();
        let root_for_filter = root.to_path_buf();
        b.filter_entry(move |ent: &DirEntry| {
            let rel = ent.path().strip_prefix(&root_for_filter).unwrap_or(ent.path());
            !exclusions.is_match(rel)
        });

        let mut out = WalkOutcome::default();
        for res in b.build() {
            match res {
                Ok(entry) => {
                    let is_file = entry.file_type().is_some_and(|ft| ft.is_file());
                    if !is_file {
                        continue;
                    }
                    let abs = entry.into_path();
                    let rel = abs.strip_prefix(root).unwrap_or(&abs).to_path_buf();
                    if self.exclusions.is_match(&rel) {
                        continue;
                    }
                    out.files.push(abs);
                }
                Err(err) => {
                    out.warnings.push(format!("skipped unreadable entry: {err}"));
                }
            }
        }

        out.files.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write_file(root: &Path, rel: &str, contents: &str) -> Result<()> {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    #[test]
    fn walks_everything_including_hidden() -> Result<()> {
        let tmp = TempDir::new()?;
        let root = tmp.path();
        write_file(root, "a.py", "pass")?;
        write_file(root, ".hidden.cfg", "x")?;
        write_file(root, "sub/b.md", "# b")?;

        let outcome = TreeWalker::new(&[])?.walk(root);
        let rels: Vec<_> = outcome
            .files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();
        assert!(rels.contains(&PathBuf::from(".hidden.cfg")));
        assert!(rels.contains(&PathBuf::from("a.py")));
        assert!(rels.contains(&PathBuf::from("sub/b.md")));
        assert!(outcome.warnings.is_empty());
        Ok(())
    }

    #[test]
    fn bare_name_exclusions_prune_at_any_depth() -> Result<()> {
        let tmp = TempDir::new()?;
        let root = tmp.path();
        write_file(root, "keep.py", "pass")?;
        write_file(root, "__pycache__/junk.pyc", "junk")?;
        write_file(root, "nested/__pycache__/more.pyc", "junk")?;
        write_file(root, ".git/config", "[core]")?;

        let exclusions = vec!["__pycache__".to_string(), ".git".to_string()];
        let outcome = TreeWalker::new(&exclusions)?.walk(root);

        assert_eq!(outcome.files.len(), 1);
        assert!(outcome.files[0].ends_with("keep.py"));
        Ok(())
    }

    #[test]
    fn wildcard_exclusions_filter_files() -> Result<()> {
        let tmp = TempDir::new()?;
        let root = tmp.path();
        write_file(root, "main.py", "pass")?;
        write_file(root, "main.pyc", "bin")?;

        let outcome = TreeWalker::new(&["*.pyc".to_string()])?.walk(root);
        assert_eq!(outcome.files.len(), 1);
        assert!(outcome.files[0].ends_with("main.py"));
        Ok(())
    }

    #[test]
    fn output_is_sorted() -> Result<()> {
        let tmp = TempDir::new()?;
        let root = tmp.path();
        write_file(root, "z.txt", "z")?;
        write_file(root, "a.txt", "a")?;
        write_file(root, "m/mid.txt", "m")?;

        let outcome = TreeWalker::new(&[])?.walk(root);
        let mut sorted = outcome.files.clone();
        sorted.sort();
        assert_eq!(outcome.files, sorted);
        Ok(())
    }
}
