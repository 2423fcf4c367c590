//! Lazy enumeration of test cases from a corpus file system

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::error::{HarnessError, Result};
use crate::fs::{CorpusFileSystem, FileEntry, normalize_path};
use crate::metadata::TestCase;

/// Default test sub-directories, relative to `test/`
pub const DEFAULT_SUB_DIRECTORIES: &[&str] = &["annexB", "built-ins", "intl402", "language"];

/// Predicate deciding which parsed cases are yielded
pub type CaseFilter = Arc<dyn Fn(&TestCase) -> bool + Send + Sync>;

/// Options for [`CorpusStream`]
#[derive(Clone)]
pub struct StreamOptions {
    /// Folders under `test/` to walk, in order
    pub sub_directories: Vec<String>,
    pub filter: CaseFilter,
    /// Produce strict-mode variants next to the non-strict ones
    pub expand_strict: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            sub_directories: DEFAULT_SUB_DIRECTORIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            filter: Arc::new(|_: &TestCase| true),
            expand_strict: true,
        }
    }
}

impl fmt::Debug for StreamOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOptions")
            .field("sub_directories", &self.sub_directories)
            .field("expand_strict", &self.expand_strict)
            .finish_non_exhaustive()
    }
}

impl StreamOptions {
    pub fn with_sub_directories<I, S>(mut self, sub_directories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sub_directories = sub_directories.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter(mut self, filter: impl Fn(&TestCase) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Arc::new(filter);
        self
    }

    pub fn with_expand_strict(mut self, expand_strict: bool) -> Self {
        self.expand_strict = expand_strict;
        self
    }
}

/// Source of test cases over one corpus file system
pub struct CorpusStream {
    fs: Arc<dyn CorpusFileSystem>,
    options: StreamOptions,
}

impl CorpusStream {
    pub fn new(fs: Arc<dyn CorpusFileSystem>, options: StreamOptions) -> Result<Self> {
        if options.sub_directories.is_empty() {
            return Err(HarnessError::InvalidArgument(
                "at least one test sub-directory is required".to_string(),
            ));
        }
        Ok(Self { fs, options })
    }

    pub fn file_system(&self) -> &Arc<dyn CorpusFileSystem> {
        &self.fs
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// Walk all configured sub-directories.
    ///
    /// Files are read only as the iterator advances. Every call starts a
    /// fresh walk of the backend.
    pub fn enumerate(&self) -> CorpusIter {
        tracing::info!(
            sub_directories = ?self.options.sub_directories,
            "Enumerating test262 cases from {}",
            self.fs.describe()
        );
        CorpusIter {
            fs: Arc::clone(&self.fs),
            filter: Arc::clone(&self.options.filter),
            expand_strict: self.options.expand_strict,
            directories: self.options.sub_directories.iter().cloned().collect(),
            files: VecDeque::new(),
            ready: VecDeque::new(),
        }
    }

    /// Successfully parsed cases only; failures are logged
    pub fn test_cases(&self) -> impl Iterator<Item = TestCase> {
        self.enumerate().filter_map(|item| match item {
            Ok(case) => Some(case),
            Err(e) => {
                tracing::warn!("Skipping test file: {}", e);
                None
            }
        })
    }

    /// Load a single file without strict expansion.
    ///
    /// `path` is taken relative to `test/` unless it already starts with
    /// `test/` or `harness/`.
    pub fn get_single(&self, path: &str) -> Result<TestCase> {
        let path = normalize_path(path);
        let path = if path.starts_with("test/") || path.starts_with("harness/") {
            path
        } else {
            format!("test/{}", path)
        };
        let reader = self.fs.open(&path)?;
        TestCase::from_reader(reader, &path, false)?
            .into_iter()
            .next()
            .ok_or_else(|| HarnessError::format(path, "no test case produced"))
    }

    /// Helper scripts directly under `harness/`
    pub fn harness_files(&self) -> Result<Vec<TestCase>> {
        let entries = self.fs.enumerate("harness", false, &|path| path.ends_with(".js"))?;
        let mut cases = Vec::with_capacity(entries.len());
        for entry in entries {
            let parsed = self
                .fs
                .open(&entry.path)
                .and_then(|reader| TestCase::from_reader(reader, &entry.path, false));
            match parsed {
                Ok(mut parsed) => cases.append(&mut parsed),
                Err(e) => tracing::warn!("Skipping harness file {}: {}", entry.name(), e),
            }
        }
        Ok(cases)
    }
}

fn is_test_file(path: &str) -> bool {
    path.ends_with(".js") && !path.to_ascii_lowercase().contains("_fixture")
}

/// Iterator returned by [`CorpusStream::enumerate`]
pub struct CorpusIter {
    fs: Arc<dyn CorpusFileSystem>,
    filter: CaseFilter,
    expand_strict: bool,
    directories: VecDeque<String>,
    files: VecDeque<FileEntry>,
    ready: VecDeque<TestCase>,
}

impl CorpusIter {
    fn load(&self, entry: &FileEntry) -> Result<Vec<TestCase>> {
        let reader = self.fs.open(&entry.path)?;
        TestCase::from_reader(reader, &entry.path, self.expand_strict)
    }
}

impl Iterator for CorpusIter {
    type Item = Result<TestCase>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(case) = self.ready.pop_front() {
                return Some(Ok(case));
            }

            if let Some(entry) = self.files.pop_front() {
                match self.load(&entry) {
                    Ok(cases) => {
                        let filter = &self.filter;
                        self.ready.extend(cases.into_iter().filter(|case| filter(case)));
                    }
                    Err(e) => return Some(Err(e)),
                }
                continue;
            }

            let sub = self.directories.pop_front()?;
            let root = format!("test/{}", normalize_path(&sub));
            match self.fs.enumerate(&root, true, &is_test_file) {
                Ok(entries) => {
                    tracing::debug!(files = entries.len(), "Listed {}", root);
                    self.files.extend(entries);
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
