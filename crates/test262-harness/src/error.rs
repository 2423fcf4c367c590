//! Error types for test262-harness

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading, filtering or fetching the test262 corpus
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Metadata block missing or malformed. Only the named file is affected.
    #[error("Test case {file} is invalid: {message}")]
    Format { file: String, message: String },

    /// Path does not resolve inside a corpus file system
    #[error("Could not find `{0}`")]
    NotFound(String),

    /// Invalid configuration or call arguments
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Cached archive could not be opened even after downloading it again
    #[error("Archive {path:?} is corrupt: {source}")]
    CorruptArchive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// Remote transfer failed
    #[error("Failed to download {url}: {message}")]
    Download { url: String, message: String },

    /// Settings file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl HarnessError {
    pub(crate) fn format(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Format {
            file: file.into(),
            message: message.into(),
        }
    }

    /// True for errors that only concern a single corpus file
    pub fn is_per_file(&self) -> bool {
        matches!(self, Self::Format { .. } | Self::NotFound(_))
    }
}

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;
