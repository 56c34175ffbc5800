//! Rule-driven file classification.
//!
//! The rule list is an ordered, declarative table of (matcher, category,
//! target) entries evaluated first-match-wins, so adding a category is a
//! data change, not new branching code. Classification is deterministic and
//! pure: it reads only what the scanner already captured.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

use crate::core::model::{Category, Classification, FileRecord};

/// How one rule decides whether it applies.
#[derive(Debug, Clone, Copy)]
enum MatcherSpec {
    /// File name equals this string.
    NameExact(&'static str),
    /// File name matches this anchored regex.
    NameRegex(&'static str),
    /// Root-relative path matches this anchored regex.
    PathRegex(&'static str),
    /// Lowercased extension (without dot) equals this string.
    Extension(&'static str),
}

#[derive(Debug, Clone, Copy)]
struct RuleSpec {
    id: &'static str,
    matcher: MatcherSpec,
    category: Category,
    target: &'static str,
}

/// The ordered rule table. Test rules come first so `tests/app.py` lands in
/// development rather than core; the source-extension catch-all comes last
/// among the matchers so every more specific rule wins over it.
const RULES: &[RuleSpec] = &[
    // Development: tests
    RuleSpec { id: "dev-test-name", matcher: MatcherSpec::NameRegex(r"^test_.*"), category: Category::Development, target: "dev/tests" },
    RuleSpec { id: "dev-test-dir", matcher: MatcherSpec::PathRegex(r"^tests?/"), category: Category::Development, target: "dev/tests" },
    // Development: temporaries and backups
    RuleSpec { id: "dev-temp-prefix", matcher: MatcherSpec::NameRegex(r"^(temp_|fix_).*"), category: Category::Development, target: "dev/temp" },
    RuleSpec { id: "dev-temp-suffix", matcher: MatcherSpec::NameRegex(r".*_temp\..*"), category: Category::Development, target: "dev/temp" },
    RuleSpec { id: "dev-temp-ext", matcher: MatcherSpec::Extension("tmp"), category: Category::Development, target: "dev/temp" },
    RuleSpec { id: "dev-bak-ext", matcher: MatcherSpec::Extension("bak"), category: Category::Development, target: "dev/temp" },
    // Development: operator scripts
    RuleSpec { id: "dev-script-name", matcher: MatcherSpec::NameRegex(r"^(evaluate|visualize|check|verify|generate|run|optimize|build|deploy)_.*"), category: Category::Development, target: "dev/scripts" },
    RuleSpec { id: "dev-script-ext", matcher: MatcherSpec::Extension("sh"), category: Category::Development, target: "dev/scripts" },
    // Development: utilities
    RuleSpec { id: "dev-util-dir", matcher: MatcherSpec::PathRegex(r"^utils?/"), category: Category::Development, target: "dev/utils" },
    // Documentation: user-facing
    RuleSpec { id: "doc-readme", matcher: MatcherSpec::NameRegex(r"^README(\..*)?$"), category: Category::Documentation, target: "docs/user" },
    RuleSpec { id: "doc-manual", matcher: MatcherSpec::NameExact("USER_MANUAL.md"), category: Category::Documentation, target: "docs/user" },
    RuleSpec { id: "doc-api", matcher: MatcherSpec::NameRegex(r"^API_.*\.md$"), category: Category::Documentation, target: "docs/user" },
    // Documentation: deployment
    RuleSpec { id: "doc-deploy", matcher: MatcherSpec::NameRegex(r"^DEPLOYMENT.*\.md$"), category: Category::Documentation, target: "docs/deployment" },
    RuleSpec { id: "doc-checklist", matcher: MatcherSpec::NameRegex(r".*CHECKLIST\.md$"), category: Category::Documentation, target: "docs/deployment" },
    // Documentation: technical and project
    RuleSpec { id: "doc-docs-dir", matcher: MatcherSpec::PathRegex(r"^docs?/"), category: Category::Documentation, target: "docs/technical" },
    RuleSpec { id: "doc-project", matcher: MatcherSpec::NameRegex(r"^(PROJECT|CHANGELOG|CONTRIBUTING).*\.md$"), category: Category::Documentation, target: "docs/project" },
    RuleSpec { id: "doc-markdown", matcher: MatcherSpec::Extension("md"), category: Category::Documentation, target: "docs/project" },
    RuleSpec { id: "doc-rst", matcher: MatcherSpec::Extension("rst"), category: Category::Documentation, target: "docs/project" },
    // Core: configuration
    RuleSpec { id: "core-requirements", matcher: MatcherSpec::NameExact("requirements.txt"), category: Category::Core, target: "core/config" },
    RuleSpec { id: "core-dockerfile", matcher: MatcherSpec::NameExact("Dockerfile"), category: Category::Core, target: "core/config" },
    RuleSpec { id: "core-compose", matcher: MatcherSpec::NameExact("docker-compose.yml"), category: Category::Core, target: "core/config" },
    RuleSpec { id: "core-yml", matcher: MatcherSpec::Extension("yml"), category: Category::Core, target: "core/config" },
    RuleSpec { id: "core-yaml", matcher: MatcherSpec::Extension("yaml"), category: Category::Core, target: "core/config" },
    RuleSpec { id: "core-toml", matcher: MatcherSpec::Extension("toml"), category: Category::Core, target: "core/config" },
    // Core: conventional source layouts
    RuleSpec { id: "core-api-dir", matcher: MatcherSpec::PathRegex(r"^api/"), category: Category::Core, target: "core/api" },
    RuleSpec { id: "core-models-dir", matcher: MatcherSpec::PathRegex(r"^models?/"), category: Category::Core, target: "core/models" },
    RuleSpec { id: "core-data-dir", matcher: MatcherSpec::PathRegex(r"^data/"), category: Category::Core, target: "core/data" },
    // Core: any remaining program source
    RuleSpec { id: "core-src-py", matcher: MatcherSpec::Extension("py"), category: Category::Core, target: "core/src" },
    RuleSpec { id: "core-src-rs", matcher: MatcherSpec::Extension("rs"), category: Category::Core, target: "core/src" },
    RuleSpec { id: "core-src-js", matcher: MatcherSpec::Extension("js"), category: Category::Core, target: "core/src" },
    RuleSpec { id: "core-src-ts", matcher: MatcherSpec::Extension("ts"), category: Category::Core, target: "core/src" },
    RuleSpec { id: "core-src-go", matcher: MatcherSpec::Extension("go"), category: Category::Core, target: "core/src" },
];

/// Rule id and target recorded for records no rule matched.
const FALLBACK_RULE: &str = "fallback";
const FALLBACK_TARGET: &str = "misc";

enum CompiledMatcher {
    NameExact(&'static str),
    NameRegex(Regex),
    PathRegex(Regex),
    Extension(&'static str),
}

struct CompiledRule {
    id: &'static str,
    matcher: CompiledMatcher,
    category: Category,
    target: &'static str,
}

/// Classifies scanned records against the rule table and flags duplicate
/// content by hash.
pub struct Classifier {
    rules: Vec<CompiledRule>,
}

impl Classifier {
    pub fn new() -> Result<Self> {
        let mut rules = Vec::with_capacity(RULES.len());
        for spec in RULES {
            let matcher = match spec.matcher {
                MatcherSpec::NameExact(name) => CompiledMatcher::NameExact(name),
                MatcherSpec::NameRegex(pattern) => CompiledMatcher::NameRegex(
                    Regex::new(pattern)
                        .with_context(|| format!("compile rule {}: {pattern}", spec.id))?,
                ),
                MatcherSpec::PathRegex(pattern) => CompiledMatcher::PathRegex(
                    Regex::new(pattern)
                        .with_context(|| format!("compile rule {}: {pattern}", spec.id))?,
                ),
                MatcherSpec::Extension(ext) => CompiledMatcher::Extension(ext),
            };
            rules.push(CompiledRule {
                id: spec.id,
                matcher,
                category: spec.category,
                target: spec.target,
            });
        }
        Ok(Self { rules })
    }

    /// Classify every record, in scan order. Each record appears in exactly
    /// one classification; unmatched files fall into `Other` and stay put.
    pub fn classify(&self, records: &[FileRecord]) -> IndexMap<PathBuf, Classification> {
        let mut out = IndexMap::with_capacity(records.len());
        // First content hash seen wins; later identical files are duplicates.
        let mut seen_hashes: HashMap<&str, &Path> = HashMap::new();

        for record in records {
            let (rule_id, category, target) = self.match_record(record);

            let duplicate_of = record.hash.digest().and_then(|digest| {
                match seen_hashes.get(digest) {
                    Some(canonical) => Some(canonical.to_path_buf()),
                    None => {
                        seen_hashes.insert(digest, record.rel_path.as_path());
                        None
                    }
                }
            });

            debug!(
                path = %record.rel_path.display(),
                rule = rule_id,
                category = category.label(),
                "classified"
            );
            out.insert(
                record.rel_path.clone(),
                Classification {
                    rel_path: record.rel_path.clone(),
                    category,
                    rule_id: rule_id.to_string(),
                    target_dir: PathBuf::from(target),
                    duplicate_of,
                },
            );
        }
        out
    }

    fn match_record(&self, record: &FileRecord) -> (&'static str, Category, &'static str) {
        let name = record
            .rel_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = record.rel_path.to_string_lossy().replace('\\', "/");
        let ext = record
            .rel_path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        for rule in &self.rules {
            let hit = match &rule.matcher {
                CompiledMatcher::NameExact(exact) => name == *exact,
                CompiledMatcher::NameRegex(re) => re.is_match(&name),
                CompiledMatcher::PathRegex(re) => re.is_match(&path),
                CompiledMatcher::Extension(e) => ext == *e,
            };
            if hit {
                return (rule.id, rule.category, rule.target);
            }
        }
        (FALLBACK_RULE, Category::Other, FALLBACK_TARGET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Encoding, FileKind, HashState};
    use chrono::Utc;

    fn record(rel: &str, digest: &str) -> FileRecord {
        FileRecord {
            rel_path: PathBuf::from(rel),
            size: 10,
            modified: Utc::now(),
            hash: HashState::Hashed(format!("blake3:{digest}")),
            encoding: Encoding::Utf8,
            kind: FileKind::Source,
            executable: false,
            non_ascii_name: false,
        }
    }

    #[test]
    fn first_matching_rule_wins() -> Result<()> {
        let classifier = Classifier::new()?;
        // A test file is also a .py file; the test rule is earlier.
        let records = vec![record("test_app.py", "1")];
        let out = classifier.classify(&records);
        let cls = &out[Path::new("test_app.py")];
        assert_eq!(cls.category, Category::Development);
        assert_eq!(cls.rule_id, "dev-test-name");
        assert_eq!(cls.target_dir, Path::new("dev/tests"));
        Ok(())
    }

    #[test]
    fn every_record_is_classified_exactly_once() -> Result<()> {
        let classifier = Classifier::new()?;
        let records = vec![
            record("app.py", "1"),
            record("README.md", "2"),
            record("deploy_all.sh", "3"),
            record("mystery.xyz", "4"),
        ];
        let out = classifier.classify(&records);
        assert_eq!(out.len(), records.len());
        for r in &records {
            assert!(out.contains_key(&r.rel_path));
        }
        Ok(())
    }

    #[test]
    fn unmatched_files_fall_into_other() -> Result<()> {
        let classifier = Classifier::new()?;
        let out = classifier.classify(&[record("strange.xyz", "1")]);
        let cls = &out[Path::new("strange.xyz")];
        assert_eq!(cls.category, Category::Other);
        assert_eq!(cls.rule_id, FALLBACK_RULE);
        Ok(())
    }

    #[test]
    fn duplicates_are_flagged_against_first_seen() -> Result<()> {
        let classifier = Classifier::new()?;
        let records = vec![
            record("original.py", "same"),
            record("copy.py", "same"),
            record("unrelated.py", "different"),
        ];
        let out = classifier.classify(&records);
        assert!(out[Path::new("original.py")].duplicate_of.is_none());
        assert_eq!(
            out[Path::new("copy.py")].duplicate_of,
            Some(PathBuf::from("original.py"))
        );
        assert!(out[Path::new("unrelated.py")].duplicate_of.is_none());
        Ok(())
    }

    #[test]
    fn hash_skipped_files_never_count_as_duplicates() -> Result<()> {
        let classifier = Classifier::new()?;
        let mut a = record("huge_a.bin", "x");
        let mut b = record("huge_b.bin", "x");
        a.hash = HashState::Skipped;
        b.hash = HashState::Skipped;
        let out = classifier.classify(&[a, b]);
        assert!(out.values().all(|c| c.duplicate_of.is_none()));
        Ok(())
    }

    #[test]
    fn routing_samples() -> Result<()> {
        let classifier = Classifier::new()?;
        let cases = [
            ("README.md", Category::Documentation, "docs/user"),
            ("DEPLOYMENT_GUIDE.md", Category::Documentation, "docs/deployment"),
            ("docs/design.md", Category::Documentation, "docs/technical"),
            ("CHANGELOG.md", Category::Documentation, "docs/project"),
            ("run_server.sh", Category::Development, "dev/scripts"),
            ("tests/test_core.py", Category::Development, "dev/tests"),
            ("utils/helpers.py", Category::Development, "dev/utils"),
            ("settings.yaml", Category::Core, "core/config"),
            ("api/routes.py", Category::Core, "core/api"),
            ("predictor.py", Category::Core, "core/src"),
        ];
        for (i, (path, category, target)) in cases.iter().enumerate() {
            let out = classifier.classify(&[record(path, &i.to_string())]);
            let cls = &out[Path::new(path)];
            assert_eq!(cls.category, *category, "category for {path}");
            assert_eq!(cls.target_dir, Path::new(target), "target for {path}");
        }
        Ok(())
    }
}
