//! Read-only views over a test262 checkout.
//!
//! The corpus can live in a plain directory, inside a zip archive, or in a
//! zip archive fetched from GitHub on demand. All three expose the same
//! [`CorpusFileSystem`] contract so the stream does not care where files
//! come from. Paths are corpus-relative and slash separated
//! (`test/built-ins/Array/length.js`, `harness/assert.js`).

mod archive;
mod local;
mod remote;

use std::io::Read;

use crate::error::Result;

pub use self::archive::ZipArchiveFileSystem;
pub use self::local::LocalFileSystem;
pub use self::remote::{
    DOWNLOAD_BASE_URL, Fetcher, HttpFetcher, RemoteArchiveFileSystem, RemoteOptions,
    default_cache_dir, ensure_archive, open_corpus,
};

/// A file found while enumerating a corpus file system
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileEntry {
    /// Full normalized corpus-relative path
    pub path: String,
}

impl FileEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Last path segment
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Capability set every corpus backend provides
pub trait CorpusFileSystem: Send + Sync {
    /// List files under `root`, sorted by path.
    ///
    /// Non-recursive listings only include direct children. Fails with
    /// `NotFound` when `root` is not a directory of this file system.
    fn enumerate(
        &self,
        root: &str,
        recursive: bool,
        predicate: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<FileEntry>>;

    /// Open a file for reading. Fails with `NotFound` for unknown paths.
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>>;

    /// Short label for log output
    fn describe(&self) -> String;
}

/// Normalize a path to the corpus form: forward slashes, no leading or
/// trailing slash.
pub fn normalize_path(path: &str) -> String {
    let path = if path.contains('\\') {
        path.replace('\\', "/")
    } else {
        path.to_string()
    };
    path.trim_start_matches("./")
        .trim_matches('/')
        .to_string()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::{Cursor, Write};
    use std::path::Path;

    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    /// Small corpus used across backend and stream tests
    pub const SAMPLE_CORPUS: &[(&str, &str)] = &[
        (
            "test/language/expressions/addition.js",
            "/*---\ndescription: addition\nfeatures: [BigInt]\n---*/\n1 + 1;\n",
        ),
        (
            "test/language/module-code/export.js",
            "/*---\ndescription: module\nflags: [module]\n---*/\nexport {};\n",
        ),
        (
            "test/language/module-code/helper_FIXTURE.js",
            "export var x = 1;\n",
        ),
        (
            "test/built-ins/Array/length.js",
            "/*---\ndescription: length\nflags: [onlyStrict]\n---*/\n[].length;\n",
        ),
        (
            "test/built-ins/Array/raw.js",
            "/*---\ndescription: raw\nflags: [raw]\n---*/\n[];\n",
        ),
        (
            "test/built-ins/Array/notes.txt",
            "not a test",
        ),
        (
            "test/annexB/html-comments.js",
            "/*---\ndescription: html\n---*/\n<!-- x\n",
        ),
        (
            "test/intl402/broken.js",
            "// no metadata in this one\n",
        ),
        (
            "harness/assert.js",
            "/*---\ndescription: assert helpers\n---*/\nfunction assert() {}\n",
        ),
        (
            "harness/sta.js",
            "/*---\ndescription: Test262Error\n---*/\nfunction Test262Error() {}\n",
        ),
        (
            "harness/nested/deep.js",
            "/*---\ndescription: nested helper\n---*/\n",
        ),
    ];

    pub fn write_directory(base: &Path, files: &[(&str, &str)]) {
        for (path, contents) in files {
            let target = base.join(path);
            std::fs::create_dir_all(target.parent().unwrap()).unwrap();
            std::fs::write(target, contents).unwrap();
        }
    }

    pub fn build_zip(root: &str, files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer
            .add_directory(format!("{}/", root), options)
            .unwrap();
        writer
            .add_directory(format!("{}/test/", root), options)
            .unwrap();
        for (path, contents) in files {
            writer
                .start_file(format!("{}/{}", root, path), options)
                .unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer
            .start_file(format!("{}/README.md", root), options)
            .unwrap();
        writer.write_all(b"outside the corpus").unwrap();
        writer.finish().unwrap().into_inner()
    }
}
