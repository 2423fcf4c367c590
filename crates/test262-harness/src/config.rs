//! TOML configuration for the test262 harness

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{HarnessError, Result};
use crate::exclusions::{ExclusionConfig, ExclusionEngine};
use crate::fs::{
    CorpusFileSystem, LocalFileSystem, RemoteOptions, ZipArchiveFileSystem, open_corpus,
};
use crate::runner::RunnerOptions;
use crate::stream::{DEFAULT_SUB_DIRECTORIES, StreamOptions};

/// File looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "test262_harness.toml";

/// Harness configuration loaded from a TOML file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Path to a test262 checkout
    pub test262_path: Option<PathBuf>,

    /// Path to a zip archive of a test262 checkout
    pub test262_archive: Option<PathBuf>,

    /// Top-level folder inside `test262_archive` (e.g. `test262-main`)
    pub archive_root: String,

    /// Git commit SHA to download from GitHub
    pub test262_commit: Option<String>,

    /// Where downloaded archives are cached
    pub cache_dir: Option<PathBuf>,

    /// Unpack downloaded archives instead of reading the zip directly
    pub extract: bool,

    /// Folders under `test/` to enumerate
    pub sub_directories: Vec<String>,

    /// Worker threads (defaults to the number of CPUs)
    pub max_parallelism: Option<usize>,

    pub exclusions: ExclusionConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            test262_path: None,
            test262_archive: None,
            archive_root: String::new(),
            test262_commit: None,
            cache_dir: None,
            extract: false,
            sub_directories: DEFAULT_SUB_DIRECTORIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_parallelism: None,
            exclusions: ExclusionConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("Failed to read config '{}': {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            HarnessError::Config(format!("Failed to parse config '{}': {}", path.display(), e))
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| HarnessError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load `path`, or the default file if it exists. Unreadable files are
    /// reported and replaced by the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path {
            Some(path) => path,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if !default_path.exists() {
                    return Self::default();
                }
                default_path
            }
        };

        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}", e);
                Self::default()
            }
        }
    }

    /// Open the configured corpus source.
    ///
    /// A local checkout wins over an archive, which wins over a commit.
    pub fn open_file_system(&self) -> Result<Arc<dyn CorpusFileSystem>> {
        if let Some(path) = &self.test262_path {
            return Ok(Arc::new(LocalFileSystem::new(path)?));
        }
        if let Some(archive) = &self.test262_archive {
            return Ok(Arc::new(ZipArchiveFileSystem::open(archive, &self.archive_root)?));
        }
        if let Some(commit) = &self.test262_commit {
            return Ok(Arc::from(open_corpus(&self.remote_options(commit))?));
        }
        Err(HarnessError::InvalidArgument(
            "no test262 source configured (set test262_path, test262_archive or test262_commit)"
                .to_string(),
        ))
    }

    pub fn remote_options(&self, commit: &str) -> RemoteOptions {
        let mut options = RemoteOptions::new(commit).with_extract(self.extract);
        if let Some(cache_dir) = &self.cache_dir {
            options = options.with_cache_dir(cache_dir);
        }
        options
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions::default().with_sub_directories(self.sub_directories.iter().cloned())
    }

    pub fn runner_options(&self) -> RunnerOptions {
        match self.max_parallelism {
            Some(max_parallelism) => RunnerOptions { max_parallelism },
            None => RunnerOptions::default(),
        }
    }

    pub fn exclusion_engine(&self) -> Result<ExclusionEngine> {
        ExclusionEngine::new(&self.exclusions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::testing::{SAMPLE_CORPUS, build_zip, write_directory};
    use tempfile::tempdir;

    #[test]
    fn parses_full_config() {
        let config = HarnessConfig::parse(
            r#"
test262_commit = "abc123"
cache_dir = "/tmp/t262"
extract = true
sub_directories = ["language"]
max_parallelism = 3

[exclusions]
excluded_files = ["language/a.js(strict mode)"]
excluded_features = ["Atomics"]
excluded_directories = ["intl402"]
"#,
        )
        .unwrap();

        assert_eq!(config.test262_commit.as_deref(), Some("abc123"));
        assert_eq!(config.sub_directories, vec!["language"]);
        assert_eq!(config.runner_options().max_parallelism, 3);
        assert_eq!(config.exclusions.excluded_features, vec!["Atomics"]);
        assert!(config.exclusions.excluded_flags.is_empty());

        let remote = config.remote_options("abc123");
        assert!(remote.extract);
        assert_eq!(remote.archive_path(), PathBuf::from("/tmp/t262/test262-abc123.zip"));
        assert!(config.exclusion_engine().is_ok());
    }

    #[test]
    fn defaults_cover_standard_directories() {
        let config = HarnessConfig::parse("").unwrap();
        assert_eq!(config.sub_directories.len(), 4);
        assert!(config.max_parallelism.is_none());
        assert!(matches!(
            config.open_file_system(),
            Err(HarnessError::InvalidArgument(_))
        ));
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = HarnessConfig::parse("max_parallelism = \"many\"").unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));

        let temp = tempdir().unwrap();
        let missing = temp.path().join("none.toml");
        assert!(matches!(HarnessConfig::load(&missing), Err(HarnessError::Config(_))));
        let fallback = HarnessConfig::load_or_default(Some(missing.as_path()));
        assert_eq!(fallback.sub_directories.len(), 4);
    }

    #[test]
    fn opens_local_and_archive_sources() {
        let temp = tempdir().unwrap();
        write_directory(&temp.path().join("checkout"), SAMPLE_CORPUS);
        let archive = temp.path().join("test262.zip");
        std::fs::write(&archive, build_zip("test262-main", SAMPLE_CORPUS)).unwrap();

        let local = HarnessConfig {
            test262_path: Some(temp.path().join("checkout")),
            ..Default::default()
        };
        assert!(local.open_file_system().unwrap().describe().starts_with("directory"));

        let zipped = HarnessConfig {
            test262_archive: Some(archive),
            archive_root: "test262-main".to_string(),
            ..Default::default()
        };
        let fs = zipped.open_file_system().unwrap();
        assert!(fs.describe().starts_with("zip archive"));
        assert!(fs.open("harness/sta.js").is_ok());
    }
}
