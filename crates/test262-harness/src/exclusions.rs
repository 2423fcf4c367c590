//! Exclusion rules: which test cases an engine does not expect to pass.
//!
//! Rules come from four tables (files, features, flags, directories) plus
//! glob patterns for file entries. Matching is case-insensitive and names
//! are compared relative to the corpus `test/` folder.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};
use crate::fs::normalize_path;
use crate::metadata::TestCase;

const DEFAULT_SUFFIX: &str = "(default)";
const STRICT_SUFFIX: &str = "(strict mode)";

/// Exclusion settings, usually the `[exclusions]` table of the config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExclusionConfig {
    /// File names or glob patterns, optionally suffixed with `(default)` or
    /// `(strict mode)` to exclude one variant only
    pub excluded_files: Vec<String>,
    pub excluded_features: Vec<String>,
    pub excluded_flags: Vec<String>,
    /// Folders relative to `test/`
    pub excluded_directories: Vec<String>,
    /// Additional line-based list of excluded files
    pub excluded_files_source: Option<PathBuf>,
}

/// Which rule table produced an exclusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExclusionKind {
    Directory,
    File,
    Feature,
    Flag,
    Pattern,
}

impl fmt::Display for ExclusionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExclusionKind::Directory => "directory",
            ExclusionKind::File => "file",
            ExclusionKind::Feature => "feature",
            ExclusionKind::Flag => "flag",
            ExclusionKind::Pattern => "pattern",
        };
        f.write_str(name)
    }
}

/// Why a case is excluded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExclusionReason {
    pub kind: ExclusionKind,
    pub message: String,
}

impl ExclusionReason {
    fn new(kind: ExclusionKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone)]
struct ExactEntry {
    original: String,
    name: String,
}

#[derive(Debug, Clone)]
struct PatternEntry {
    original: String,
    matcher: GlobMatcher,
    strict: Option<bool>,
}

#[derive(Debug, Clone)]
struct DirectoryEntry {
    original: String,
    prefix: String,
}

/// Compiled exclusion tables
#[derive(Debug, Clone, Default)]
pub struct ExclusionEngine {
    exact: HashSet<(String, bool)>,
    exact_entries: Vec<ExactEntry>,
    patterns: Vec<PatternEntry>,
    features: HashSet<String>,
    flags: HashSet<String>,
    directories: Vec<DirectoryEntry>,
}

impl ExclusionEngine {
    /// Build the engine from config, reading `excluded_files_source` if set
    pub fn new(config: &ExclusionConfig) -> Result<Self> {
        let mut files = config.excluded_files.clone();
        if let Some(source) = &config.excluded_files_source {
            let listed = load_exclusion_list(source)?;
            tracing::debug!(entries = listed.len(), "Loaded exclusion list {:?}", source);
            files.extend(listed);
        }
        Self::from_parts(
            &files,
            &config.excluded_features,
            &config.excluded_flags,
            &config.excluded_directories,
        )
    }

    pub fn from_parts(
        files: &[String],
        features: &[String],
        flags: &[String],
        directories: &[String],
    ) -> Result<Self> {
        let mut engine = Self::default();

        for entry in files {
            let (name, strict) = split_scope(entry);
            if name.is_empty() {
                continue;
            }
            if is_pattern(&name) {
                let matcher = Glob::new(&name)
                    .map_err(|e| {
                        HarnessError::InvalidArgument(format!(
                            "invalid exclusion pattern `{}`: {}",
                            entry, e
                        ))
                    })?
                    .compile_matcher();
                engine.patterns.push(PatternEntry {
                    original: entry.trim().to_string(),
                    matcher,
                    strict,
                });
                continue;
            }

            match strict {
                Some(strict) => {
                    engine.exact.insert((name.clone(), strict));
                }
                None => {
                    engine.exact.insert((name.clone(), false));
                    engine.exact.insert((name.clone(), true));
                }
            }
            engine.exact_entries.push(ExactEntry {
                original: entry.trim().to_string(),
                name,
            });
        }

        engine.features = lowercase_set(features);
        engine.flags = lowercase_set(flags);
        engine.directories = directories
            .iter()
            .map(|dir| DirectoryEntry {
                original: dir.trim().to_string(),
                prefix: test_relative(dir).to_lowercase(),
            })
            .filter(|dir| !dir.prefix.is_empty())
            .collect();

        Ok(engine)
    }

    /// Nothing is excluded
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
            && self.patterns.is_empty()
            && self.features.is_empty()
            && self.flags.is_empty()
            && self.directories.is_empty()
    }

    /// First matching rule, checked as directory, file, feature, flag, then
    /// pattern
    pub fn resolve(&self, case: &TestCase) -> Option<ExclusionReason> {
        let name = case.test_name().to_lowercase();

        if let Some(dir) = self
            .directories
            .iter()
            .find(|dir| is_under(&name, &dir.prefix))
        {
            return Some(ExclusionReason::new(
                ExclusionKind::Directory,
                format!("Directory {} was excluded", dir.original),
            ));
        }

        if self.exact.contains(&(name.clone(), case.strict())) {
            return Some(ExclusionReason::new(
                ExclusionKind::File,
                format!("File {} excluded", case),
            ));
        }

        if let Some(feature) = case
            .features()
            .iter()
            .find(|f| self.features.contains(&f.to_lowercase()))
        {
            return Some(ExclusionReason::new(
                ExclusionKind::Feature,
                format!("Feature {} excluded", feature),
            ));
        }

        if let Some(flag) = case
            .flags()
            .iter()
            .find(|f| self.flags.contains(&f.to_lowercase()))
        {
            return Some(ExclusionReason::new(
                ExclusionKind::Flag,
                format!("Flag {} excluded", flag),
            ));
        }

        self.patterns
            .iter()
            .filter(|p| p.strict.is_none_or(|strict| strict == case.strict()))
            .find(|p| p.matcher.is_match(&name))
            .map(|p| {
                ExclusionReason::new(
                    ExclusionKind::Pattern,
                    format!("File {} excluded by pattern {}", case, p.original),
                )
            })
    }

    pub fn is_excluded(&self, case: &TestCase) -> bool {
        self.resolve(case).is_some()
    }

    /// Exact file entries that match none of `cases`, sorted and
    /// deduplicated. Patterns are not reported.
    pub fn unrecognized<'a>(&self, cases: impl IntoIterator<Item = &'a TestCase>) -> Vec<String> {
        let observed: HashSet<String> = cases
            .into_iter()
            .map(|case| case.test_name().to_lowercase())
            .collect();

        let mut missing: Vec<String> = self
            .exact_entries
            .iter()
            .filter(|entry| !observed.contains(&entry.name))
            .map(|entry| entry.original.clone())
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }
}

/// Parse the line-based exclusion list format.
///
/// One entry per line; blank lines and lines starting with `#` are skipped
/// and a leading `test/` is removed.
pub fn parse_exclusion_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.strip_prefix("test/").unwrap_or(line).to_string())
        .collect()
}

pub fn load_exclusion_list(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => HarnessError::NotFound(path.display().to_string()),
        _ => HarnessError::Io(e),
    })?;
    Ok(parse_exclusion_list(&text))
}

fn split_scope(entry: &str) -> (String, Option<bool>) {
    let entry = entry.trim();
    let (name, strict) = if let Some(name) = entry.strip_suffix(STRICT_SUFFIX) {
        (name, Some(true))
    } else if let Some(name) = entry.strip_suffix(DEFAULT_SUFFIX) {
        (name, Some(false))
    } else {
        (entry, None)
    };
    (test_relative(name).to_lowercase(), strict)
}

fn test_relative(path: &str) -> String {
    let path = normalize_path(path.trim());
    match path.strip_prefix("test/") {
        Some(rest) => rest.to_string(),
        None => path,
    }
}

fn is_pattern(name: &str) -> bool {
    name.contains(['*', '?', '[', '{'])
}

fn is_under(name: &str, dir: &str) -> bool {
    name.strip_prefix(dir)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

fn lowercase_set(values: &[String]) -> HashSet<String> {
    values
        .iter()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn cases(file_name: &str, metadata: &str) -> Vec<TestCase> {
        let contents = format!("/*---\n{}\n---*/\n", metadata);
        TestCase::parse(&contents, file_name, true).unwrap()
    }

    fn engine(files: &[&str], features: &[&str], flags: &[&str], dirs: &[&str]) -> ExclusionEngine {
        ExclusionEngine::from_parts(
            &strings(files),
            &strings(features),
            &strings(flags),
            &strings(dirs),
        )
        .unwrap()
    }

    #[test]
    fn exact_entries_cover_both_variants_unless_scoped() {
        let both = cases("test/built-ins/Array/a.js", "description: a");
        let engine = engine(&["built-ins/array/A.js"], &[], &[], &[]);
        assert!(engine.is_excluded(&both[0]));
        assert!(engine.is_excluded(&both[1]));

        let engine = engine_scoped("test/built-ins/Array/a.js(strict mode)");
        assert!(!engine.is_excluded(&both[0]));
        let reason = engine.resolve(&both[1]).unwrap();
        assert_eq!(reason.kind, ExclusionKind::File);
        assert_eq!(
            reason.message,
            "File test/built-ins/Array/a.js(strict mode) excluded"
        );

        let engine = engine_scoped("built-ins/Array/a.js(default)");
        assert!(engine.is_excluded(&both[0]));
        assert!(!engine.is_excluded(&both[1]));
    }

    fn engine_scoped(entry: &str) -> ExclusionEngine {
        engine(&[entry], &[], &[], &[])
    }

    #[test]
    fn features_and_flags_are_case_insensitive() {
        let case = &cases("test/language/x.js", "features: [Symbol, BigInt]\nflags: [async]")[0];

        let reason = engine(&[], &["bigint"], &[], &[]).resolve(case).unwrap();
        assert_eq!(reason.kind, ExclusionKind::Feature);
        assert_eq!(reason.message, "Feature BigInt excluded");

        let reason = engine(&[], &[], &["ASYNC"], &[]).resolve(case).unwrap();
        assert_eq!(reason.to_string(), "Flag async excluded");
    }

    #[test]
    fn directories_match_whole_segments() {
        let inside = &cases("test/intl402/Date/x.js", "description: x")[0];
        let sibling = &cases("test/intl402-extra/x.js", "description: x")[0];
        let engine = engine(&[], &[], &[], &["test/intl402"]);

        let reason = engine.resolve(inside).unwrap();
        assert_eq!(reason.kind, ExclusionKind::Directory);
        assert_eq!(reason.message, "Directory test/intl402 was excluded");
        assert!(engine.resolve(sibling).is_none());
    }

    #[test]
    fn rules_apply_in_priority_order() {
        let case = &cases("test/annexB/a.js", "features: [BigInt]\nflags: [raw]")[0];
        let all = engine(&["annexB/a.js", "annexB/*"], &["BigInt"], &["raw"], &["annexB"]);
        assert_eq!(all.resolve(case).unwrap().kind, ExclusionKind::Directory);

        let no_dir = engine(&["annexB/a.js", "annexB/*"], &["BigInt"], &["raw"], &[]);
        assert_eq!(no_dir.resolve(case).unwrap().kind, ExclusionKind::File);

        let no_file = engine(&["annexB/*"], &["BigInt"], &["raw"], &[]);
        assert_eq!(no_file.resolve(case).unwrap().kind, ExclusionKind::Feature);

        let flag_only = engine(&["annexB/*"], &[], &["raw"], &[]);
        assert_eq!(flag_only.resolve(case).unwrap().kind, ExclusionKind::Flag);

        let pattern_only = engine(&["annexB/*"], &[], &[], &[]);
        assert_eq!(pattern_only.resolve(case).unwrap().kind, ExclusionKind::Pattern);

        assert!(engine(&[], &[], &[], &[]).resolve(case).is_none());
    }

    #[test]
    fn patterns_respect_strict_scope() {
        let both = cases("test/language/statements/class/a.js", "description: a");
        let engine = engine(&["language/statements/**/*.js(strict mode)"], &[], &[], &[]);
        assert!(!engine.is_excluded(&both[0]));
        assert!(engine.is_excluded(&both[1]));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = ExclusionEngine::from_parts(&strings(&["language/[a"]), &[], &[], &[]).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidArgument(_)));
    }

    #[test]
    fn unrecognized_reports_exact_entries_without_files() {
        let observed = cases("test/language/a.js", "description: a");
        let engine = engine(
            &["language/a.js", "language/gone.js", "language/gone.js(strict mode)", "language/*.mjs"],
            &[],
            &[],
            &[],
        );
        assert_eq!(
            engine.unrecognized(&observed),
            vec!["language/gone.js", "language/gone.js(strict mode)"]
        );
    }

    #[test]
    fn legacy_list_skips_comments_and_strips_prefix() {
        let text = "# known failures\n\ntest/language/a.js\n  built-ins/b.js  \n#test/c.js\n";
        assert_eq!(
            parse_exclusion_list(text),
            vec!["language/a.js", "built-ins/b.js"]
        );
    }

    #[test]
    fn config_loads_list_file() {
        let temp = tempfile::tempdir().unwrap();
        let list = temp.path().join("excluded.txt");
        std::fs::write(&list, "test/language/a.js\n").unwrap();

        let config = ExclusionConfig {
            excluded_files_source: Some(list),
            ..Default::default()
        };
        let engine = ExclusionEngine::new(&config).unwrap();
        assert!(engine.is_excluded(&cases("test/language/a.js", "description: a")[0]));

        let missing = ExclusionConfig {
            excluded_files_source: Some(temp.path().join("nope.txt")),
            ..Default::default()
        };
        assert!(matches!(
            ExclusionEngine::new(&missing),
            Err(HarnessError::NotFound(_))
        ));
    }
}
