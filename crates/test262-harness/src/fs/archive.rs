//! Zip archive backend.
//!
//! The archive is scanned once when the view is created. Only entries below
//! `<root>/test` and `<root>/harness` are kept, and the resulting index is
//! never modified afterwards, so concurrent `open` calls only contend on the
//! archive handle while a single entry is decompressed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek};
use std::path::Path;

use parking_lot::Mutex;
use zip::ZipArchive;

use super::{CorpusFileSystem, FileEntry, normalize_path};
use crate::error::{HarnessError, Result};

/// Upper bound on the buffer reserved from an entry's declared size
const MAX_READ_HINT: u64 = 1 << 20;

trait ArchiveSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> ArchiveSource for T {}

/// Test262 checkout packed in a zip file, e.g. a GitHub source archive
pub struct ZipArchiveFileSystem {
    archive: Mutex<ZipArchive<Box<dyn ArchiveSource>>>,
    /// Corpus-relative path → entry index in the archive
    files: BTreeMap<String, usize>,
    directories: BTreeSet<String>,
    label: String,
}

impl fmt::Debug for ZipArchiveFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipArchiveFileSystem")
            .field("label", &self.label)
            .field("files", &self.files.len())
            .field("directories", &self.directories.len())
            .finish_non_exhaustive()
    }
}

impl ZipArchiveFileSystem {
    /// Open `archive_path`, treating `root_name` (the top-level folder inside
    /// the archive) as the corpus root.
    pub fn open(archive_path: impl AsRef<Path>, root_name: &str) -> Result<Self> {
        let archive_path = archive_path.as_ref();
        let file = match File::open(archive_path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(HarnessError::NotFound(archive_path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let mut fs = Self::from_reader(BufReader::new(file), root_name)?;
        fs.label = format!("zip archive {}", archive_path.display());
        Ok(fs)
    }

    /// Build the view over any seekable source, e.g. an in-memory buffer
    pub fn from_reader<R>(reader: R, root_name: &str) -> Result<Self>
    where
        R: Read + Seek + Send + 'static,
    {
        let source: Box<dyn ArchiveSource> = Box::new(reader);
        let mut archive = ZipArchive::new(source)?;

        let root = normalize_path(root_name);
        let prefix = if root.is_empty() {
            String::new()
        } else {
            format!("{}/", root)
        };

        let mut files = BTreeMap::new();
        let mut directories = BTreeSet::new();
        for index in 0..archive.len() {
            let (name, is_dir) = {
                let entry = archive.by_index_raw(index)?;
                (entry.name().to_string(), entry.is_dir())
            };
            let Some(relative) = name.strip_prefix(&prefix) else {
                continue;
            };
            let relative = normalize_path(relative);
            if !is_corpus_path(&relative) {
                continue;
            }

            if is_dir {
                add_directory(&mut directories, &relative);
            } else {
                if let Some((parent, _)) = relative.rsplit_once('/') {
                    add_directory(&mut directories, parent);
                }
                files.insert(relative, index);
            }
        }

        if !directories.contains("test") && !directories.contains("harness") {
            return Err(HarnessError::InvalidArgument(format!(
                "archive has no `{}test` or `{}harness` folder",
                prefix, prefix
            )));
        }

        tracing::debug!(
            files = files.len(),
            directories = directories.len(),
            "Indexed test262 archive"
        );

        Ok(Self {
            archive: Mutex::new(archive),
            files,
            directories,
            label: format!("zip archive (root `{}`)", root),
        })
    }

    /// Number of indexed files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_corpus_path(path: &str) -> bool {
    ["test", "harness"]
        .iter()
        .any(|top| path == *top || path.starts_with(&format!("{}/", top)))
}

/// Insert `path` and its ancestors; stops at the first one already seen.
fn add_directory(directories: &mut BTreeSet<String>, path: &str) {
    let mut current = path;
    while !current.is_empty() && directories.insert(current.to_string()) {
        match current.rsplit_once('/') {
            Some((parent, _)) => current = parent,
            None => break,
        }
    }
}

impl CorpusFileSystem for ZipArchiveFileSystem {
    fn enumerate(
        &self,
        root: &str,
        recursive: bool,
        predicate: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<FileEntry>> {
        let root = normalize_path(root);
        if !root.is_empty() && !self.directories.contains(&root) {
            return Err(HarnessError::NotFound(root));
        }
        let prefix = if root.is_empty() {
            String::new()
        } else {
            format!("{}/", root)
        };

        let entries = self
            .files
            .range(prefix.clone()..)
            .map(|(path, _)| path)
            .take_while(|path| path.starts_with(&prefix))
            .filter(|path| recursive || !path[prefix.len()..].contains('/'))
            .filter(|path| predicate(path))
            .map(|path| FileEntry::new(path.clone()))
            .collect();
        Ok(entries)
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let path = normalize_path(path);
        let Some(&index) = self.files.get(&path) else {
            return Err(HarnessError::NotFound(path));
        };

        let mut archive = self.archive.lock();
        let mut entry = archive.by_index(index)?;
        // The header size is untrusted
        let mut buffer = Vec::with_capacity(entry.size().min(MAX_READ_HINT) as usize);
        entry.read_to_end(&mut buffer)?;
        Ok(Box::new(Cursor::new(buffer)))
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
