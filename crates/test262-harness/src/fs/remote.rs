//! test262 archive download and cache management.
//!
//! A revision (commit SHA, tag or branch) of tc39/test262 is fetched as the
//! GitHub source archive and cached at `<cache_dir>/test262-<revision>.zip`.
//! Subsequent runs reuse the cached file after checking that it still opens
//! as a zip archive.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use zip::ZipArchive;
use zip::result::ZipError;

use super::{CorpusFileSystem, FileEntry, LocalFileSystem, ZipArchiveFileSystem};
use crate::error::{HarnessError, Result};

/// GitHub archive URL prefix for tc39/test262.
pub const DOWNLOAD_BASE_URL: &str = "https://github.com/tc39/test262/archive";

/// Serializes every download/extract in the process.
static DOWNLOAD_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Transfers the bytes behind a URL into a writer
pub trait Fetcher: Send + Sync {
    /// Copy the resource at `url` into `dest`, returning the byte count
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> Result<u64>;
}

/// Blocking HTTP fetcher backed by reqwest
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpFetcher;

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> Result<u64> {
        let download_error = |message: String| HarnessError::Download {
            url: url.to_string(),
            message,
        };

        let mut response =
            reqwest::blocking::get(url).map_err(|e| download_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(download_error(format!("HTTP {}", response.status())));
        }
        response
            .copy_to(dest)
            .map_err(|e| download_error(e.to_string()))
    }
}

/// Where and how to obtain a test262 revision
#[derive(Clone)]
pub struct RemoteOptions {
    /// Commit SHA (or any ref GitHub can archive)
    pub revision: String,
    /// Directory holding cached archives
    pub cache_dir: PathBuf,
    /// Unpack the archive and serve files from disk instead of the zip
    pub extract: bool,
    pub fetcher: Arc<dyn Fetcher>,
}

impl std::fmt::Debug for RemoteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteOptions")
            .field("revision", &self.revision)
            .field("cache_dir", &self.cache_dir)
            .field("extract", &self.extract)
            .finish_non_exhaustive()
    }
}

impl RemoteOptions {
    pub fn new(revision: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            cache_dir: default_cache_dir(),
            extract: false,
            fetcher: Arc::new(HttpFetcher),
        }
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_extract(mut self, extract: bool) -> Self {
        self.extract = extract;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Download URL for the revision
    pub fn url(&self) -> String {
        format!("{}/{}.zip", DOWNLOAD_BASE_URL, self.revision)
    }

    /// Cached archive location
    pub fn archive_path(&self) -> PathBuf {
        self.cache_dir.join(format!("test262-{}.zip", self.revision))
    }

    /// Top-level folder GitHub puts inside the archive
    pub fn root_name(&self) -> String {
        format!("test262-{}", self.revision)
    }

    fn validate(&self) -> Result<()> {
        let revision = self.revision.trim();
        if revision.is_empty() || revision.contains(['/', '\\']) {
            return Err(HarnessError::InvalidArgument(format!(
                "invalid test262 revision `{}`",
                self.revision
            )));
        }
        Ok(())
    }
}

/// Get the cache directory for downloaded archives.
///
/// Returns `~/.cache/test262-harness` on Linux (platform equivalent
/// elsewhere), or the temp directory if there is no cache location.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("test262-harness"))
        .unwrap_or_else(std::env::temp_dir)
}

/// Zip archive view over a downloaded revision
pub struct RemoteArchiveFileSystem {
    inner: ZipArchiveFileSystem,
    archive_path: PathBuf,
    revision: String,
}

impl RemoteArchiveFileSystem {
    /// Make sure the revision is cached, then index it.
    pub fn open(options: &RemoteOptions) -> Result<Self> {
        let archive_path = ensure_archive(options)?;
        let inner = ZipArchiveFileSystem::open(&archive_path, &options.root_name())?;
        Ok(Self {
            inner,
            archive_path,
            revision: options.revision.clone(),
        })
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }
}

impl CorpusFileSystem for RemoteArchiveFileSystem {
    fn enumerate(
        &self,
        root: &str,
        recursive: bool,
        predicate: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<FileEntry>> {
        self.inner.enumerate(root, recursive, predicate)
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        self.inner.open(path)
    }

    fn describe(&self) -> String {
        format!("test262@{} ({})", self.revision, self.archive_path.display())
    }
}

/// Open a revision either as a zip view or, with `extract`, as an unpacked
/// directory next to the cached archive.
pub fn open_corpus(options: &RemoteOptions) -> Result<Box<dyn CorpusFileSystem>> {
    if !options.extract {
        return Ok(Box::new(RemoteArchiveFileSystem::open(options)?));
    }

    let archive_path = ensure_archive(options)?;
    let target = options.cache_dir.join(options.root_name());
    if !target.is_dir() {
        let _guard = DOWNLOAD_LOCK.lock();
        if !target.is_dir() {
            tracing::info!("Extracting {:?} ...", archive_path);
            extract_corpus(&archive_path, &options.root_name(), &options.cache_dir)?;
        }
    }
    tracing::info!("Using extracted test262 checkout at {:?}", target);
    Ok(Box::new(LocalFileSystem::new(target)?))
}

/// Return the path of a valid cached archive, downloading it if needed.
///
/// Validation and download both happen under the process-wide download
/// lock. A cached file that does not open as a zip is deleted and
/// downloaded again once. If the fresh copy is unreadable too,
/// `CorruptArchive` is returned.
pub fn ensure_archive(options: &RemoteOptions) -> Result<PathBuf> {
    options.validate()?;
    let path = options.archive_path();
    let _guard = DOWNLOAD_LOCK.lock();

    if path.exists() {
        match validate_archive(&path) {
            Ok(()) => {
                tracing::info!("Found test262 repository archive at {:?}", path);
                return Ok(path);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not open the archive {:?} ({}), deleting it and downloading again",
                    path,
                    e
                );
                fs::remove_file(&path)?;
            }
        }
    }

    download(options, &path)?;

    match validate_archive(&path) {
        Ok(()) => Ok(path),
        Err(source) => Err(HarnessError::CorruptArchive { path, source }),
    }
}

fn validate_archive(path: &Path) -> std::result::Result<(), ZipError> {
    let file = File::open(path)?;
    ZipArchive::new(BufReader::new(file)).map(|_| ())
}

/// Caller holds `DOWNLOAD_LOCK`
fn download(options: &RemoteOptions, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let url = options.url();
    tracing::info!("Loading test262 repository archive from {}", url);
    let started = Instant::now();

    let partial = path.with_extension("zip.part");
    match write_download(options.fetcher.as_ref(), &url, &partial) {
        Ok(bytes) => {
            fs::rename(&partial, path)?;
            tracing::info!(
                bytes,
                "File downloaded and saved to {:?} in {:?}",
                path,
                started.elapsed()
            );
            Ok(())
        }
        Err(e) => {
            if let Err(remove_err) = fs::remove_file(&partial)
                && remove_err.kind() != io::ErrorKind::NotFound
            {
                tracing::warn!("Could not remove {:?}: {}", partial, remove_err);
            }
            Err(e)
        }
    }
}

fn write_download(fetcher: &dyn Fetcher, url: &str, partial: &Path) -> Result<u64> {
    let mut writer = BufWriter::new(File::create(partial)?);
    let bytes = fetcher.fetch(url, &mut writer)?;
    writer.flush()?;
    Ok(bytes)
}

/// Extract the `test` and `harness` folders of `root_name` into `dest`.
///
/// Files are unpacked into a scratch directory first and moved into place
/// at the end, so an interrupted extraction never looks complete.
fn extract_corpus(archive_path: &Path, root_name: &str, dest: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(archive_path)?))?;
    let scratch = dest.join(format!(".{}.extracting", root_name));
    if scratch.exists() {
        fs::remove_dir_all(&scratch)?;
    }

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;

        let Some(name) = file.enclosed_name() else {
            continue;
        };
        let Ok(relative) = name.strip_prefix(root_name) else {
            continue;
        };
        if !(relative.starts_with("test") || relative.starts_with("harness")) {
            continue;
        }
        let outpath = scratch.join(relative);

        if file.is_dir() {
            fs::create_dir_all(&outpath)?;
        } else {
            if let Some(p) = outpath.parent()
                && !p.exists()
            {
                fs::create_dir_all(p)?;
            }
            let mut outfile = File::create(&outpath)?;
            io::copy(&mut file, &mut outfile)?;
        }
    }

    fs::rename(&scratch, dest.join(root_name))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::testing::{SAMPLE_CORPUS, build_zip};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Serves a fixed payload and counts transfers
    struct CountingFetcher {
        payload: Vec<u8>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingFetcher {
        fn new(payload: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                payload,
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(0),
            })
        }

        fn slow(payload: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                payload,
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(100),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Fetcher for CountingFetcher {
        fn fetch(&self, _url: &str, dest: &mut dyn Write) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            dest.write_all(&self.payload)?;
            Ok(self.payload.len() as u64)
        }
    }

    struct FailingFetcher;

    impl Fetcher for FailingFetcher {
        fn fetch(&self, url: &str, dest: &mut dyn Write) -> Result<u64> {
            dest.write_all(b"partial")?;
            Err(HarnessError::Download {
                url: url.to_string(),
                message: "connection reset".to_string(),
            })
        }
    }

    const REVISION: &str = "28b31c0bf1960878abb36ab8597a0cae224a684d";

    fn options(cache: &Path, fetcher: Arc<dyn Fetcher>) -> RemoteOptions {
        RemoteOptions::new(REVISION)
            .with_cache_dir(cache)
            .with_fetcher(fetcher)
    }

    fn corpus_zip() -> Vec<u8> {
        build_zip(&format!("test262-{}", REVISION), SAMPLE_CORPUS)
    }

    #[test]
    fn derives_url_and_cache_path_from_revision() {
        let opts = RemoteOptions::new("abc").with_cache_dir("/tmp/cache");
        assert_eq!(opts.url(), "https://github.com/tc39/test262/archive/abc.zip");
        assert_eq!(opts.archive_path(), PathBuf::from("/tmp/cache/test262-abc.zip"));
        assert_eq!(opts.root_name(), "test262-abc");
    }

    #[test]
    fn rejects_empty_revision() {
        let temp = tempdir().unwrap();
        let opts = RemoteOptions::new("  ").with_cache_dir(temp.path());
        assert!(matches!(ensure_archive(&opts), Err(HarnessError::InvalidArgument(_))));
    }

    #[test]
    fn downloads_once_and_reuses_cache() {
        let temp = tempdir().unwrap();
        let fetcher = CountingFetcher::new(corpus_zip());
        let opts = options(temp.path(), fetcher.clone());

        let fs = RemoteArchiveFileSystem::open(&opts).unwrap();
        assert_eq!(fs.archive_path(), opts.archive_path());
        assert!(fs.open("harness/assert.js").is_ok());

        RemoteArchiveFileSystem::open(&opts).unwrap();
        assert_eq!(fetcher.calls(), 1);
        assert!(!opts.archive_path().with_extension("zip.part").exists());
    }

    #[test]
    fn concurrent_callers_share_one_transfer() {
        let temp = tempdir().unwrap();
        let fetcher = CountingFetcher::slow(corpus_zip());
        let opts = options(temp.path(), fetcher.clone());

        std::thread::scope(|scope| {
            let first = scope.spawn(|| ensure_archive(&opts));
            let second = scope.spawn(|| ensure_archive(&opts));
            assert!(first.join().unwrap().is_ok());
            assert!(second.join().unwrap().is_ok());
        });
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn cached_archive_is_validated_under_the_lock() {
        let temp = tempdir().unwrap();
        let fetcher = CountingFetcher::new(corpus_zip());
        let opts = options(temp.path(), fetcher.clone());
        fs::write(opts.archive_path(), corpus_zip()).unwrap();

        let guard = DOWNLOAD_LOCK.lock();
        std::thread::scope(|scope| {
            let waiting = scope.spawn(|| ensure_archive(&opts));
            std::thread::sleep(std::time::Duration::from_millis(50));
            assert!(!waiting.is_finished());
            drop(guard);
            assert!(waiting.join().unwrap().is_ok());
        });
        assert_eq!(fetcher.calls(), 0);
    }

    #[test]
    fn corrupt_cache_is_replaced_once() {
        let temp = tempdir().unwrap();
        let fetcher = CountingFetcher::new(corpus_zip());
        let opts = options(temp.path(), fetcher.clone());
        fs::write(opts.archive_path(), b"not a zip").unwrap();

        let path = ensure_archive(&opts).unwrap();
        assert!(validate_archive(&path).is_ok());
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn corrupt_download_is_reported_not_retried() {
        let temp = tempdir().unwrap();
        let fetcher = CountingFetcher::new(b"still not a zip".to_vec());
        let opts = options(temp.path(), fetcher.clone());
        fs::write(opts.archive_path(), b"not a zip").unwrap();

        let err = ensure_archive(&opts).unwrap_err();
        assert!(matches!(err, HarnessError::CorruptArchive { .. }));
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn failed_download_cleans_up_and_releases_lock() {
        let temp = tempdir().unwrap();
        let opts = options(temp.path(), Arc::new(FailingFetcher));

        let err = ensure_archive(&opts).unwrap_err();
        assert!(matches!(err, HarnessError::Download { .. }));
        assert!(!opts.archive_path().exists());
        assert!(!opts.archive_path().with_extension("zip.part").exists());

        // The lock must be free again
        let fetcher = CountingFetcher::new(corpus_zip());
        let opts = options(temp.path(), fetcher.clone());
        assert!(ensure_archive(&opts).is_ok());
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn extract_serves_files_from_disk() {
        let temp = tempdir().unwrap();
        let fetcher = CountingFetcher::new(corpus_zip());
        let opts = options(temp.path(), fetcher.clone()).with_extract(true);

        let fs = open_corpus(&opts).unwrap();
        assert!(fs.describe().starts_with("directory"));
        let entries = fs.enumerate("harness", false, &|_| true).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(temp.path().join(opts.root_name()).join("test").is_dir());
        assert!(!temp.path().join(opts.root_name()).join("README.md").exists());

        // Second open reuses both the archive and the extracted tree
        open_corpus(&opts).unwrap();
        assert_eq!(fetcher.calls(), 1);
    }
}
