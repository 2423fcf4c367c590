//! Plain directory backend

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use super::{CorpusFileSystem, FileEntry, normalize_path};
use crate::error::{HarnessError, Result};

/// Test262 checkout on the host file system.
///
/// The base directory should have `harness` and `test` sub-directories like
/// <https://github.com/tc39/test262>.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    base: PathBuf,
}

impl LocalFileSystem {
    pub fn new(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref();
        if base.as_os_str().is_empty() {
            return Err(HarnessError::InvalidArgument(
                "base directory must not be empty".to_string(),
            ));
        }
        if !base.is_dir() {
            return Err(HarnessError::InvalidArgument(format!(
                "base directory {} does not exist",
                base.display()
            )));
        }
        Ok(Self {
            base: base.to_path_buf(),
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let normalized = normalize_path(path);
        let relative = Path::new(&normalized);
        // Only plain segments, the view never escapes its base
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(HarnessError::NotFound(normalized));
        }
        Ok(self.base.join(relative))
    }
}

impl CorpusFileSystem for LocalFileSystem {
    fn enumerate(
        &self,
        root: &str,
        recursive: bool,
        predicate: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<FileEntry>> {
        let dir = self.resolve(root)?;
        if !dir.is_dir() {
            return Err(HarnessError::NotFound(normalize_path(root)));
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut entries = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(max_depth) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry under {}: {}", dir.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.base)
                .unwrap_or(entry.path())
                .to_string_lossy();
            let path = normalize_path(&relative);
            if predicate(&path) {
                entries.push(FileEntry { path });
            }
        }

        entries.sort();
        Ok(entries)
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let target = self.resolve(path)?;
        if target.is_dir() {
            return Err(HarnessError::NotFound(normalize_path(path)));
        }
        match File::open(&target) {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(HarnessError::NotFound(normalize_path(path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        format!("directory {}", self.base.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::testing::{SAMPLE_CORPUS, write_directory};
    use tempfile::tempdir;

    fn paths(entries: &[FileEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn rejects_missing_base_directory() {
        let temp = tempdir().unwrap();
        let err = LocalFileSystem::new(temp.path().join("nope")).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidArgument(_)));
    }

    #[test]
    fn enumerates_recursively_with_normalized_paths() {
        let temp = tempdir().unwrap();
        write_directory(temp.path(), SAMPLE_CORPUS);
        let fs = LocalFileSystem::new(temp.path()).unwrap();

        let entries = fs
            .enumerate("test/built-ins", true, &|p| p.ends_with(".js"))
            .unwrap();
        assert_eq!(
            paths(&entries),
            vec!["test/built-ins/Array/length.js", "test/built-ins/Array/raw.js"]
        );
    }

    #[test]
    fn non_recursive_lists_direct_children_only() {
        let temp = tempdir().unwrap();
        write_directory(temp.path(), SAMPLE_CORPUS);
        let fs = LocalFileSystem::new(temp.path()).unwrap();

        let entries = fs.enumerate("harness", false, &|_| true).unwrap();
        assert_eq!(paths(&entries), vec!["harness/assert.js", "harness/sta.js"]);
    }

    #[test]
    fn missing_paths_are_not_found() {
        let temp = tempdir().unwrap();
        write_directory(temp.path(), SAMPLE_CORPUS);
        let fs = LocalFileSystem::new(temp.path()).unwrap();

        assert!(matches!(
            fs.enumerate("test/staging", true, &|_| true),
            Err(HarnessError::NotFound(_))
        ));
        assert!(matches!(fs.open("test/nope.js"), Err(HarnessError::NotFound(_))));
        assert!(matches!(fs.open("test/language"), Err(HarnessError::NotFound(_))));
        assert!(matches!(fs.open("../outside.js"), Err(HarnessError::NotFound(_))));
    }

    #[test]
    fn opens_files_by_corpus_path() {
        let temp = tempdir().unwrap();
        write_directory(temp.path(), SAMPLE_CORPUS);
        let fs = LocalFileSystem::new(temp.path()).unwrap();

        let mut contents = String::new();
        fs.open("\\harness\\assert.js")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert!(contents.contains("function assert"));
    }
}
