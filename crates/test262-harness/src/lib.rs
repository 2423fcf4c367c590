//! # Test262 Harness
//!
//! Engine-independent plumbing for running the ECMAScript conformance suite
//! (<https://github.com/tc39/test262>).
//!
//! The crate reads test files from a directory, a zip archive, or a GitHub
//! archive it downloads and caches, parses their YAML metadata into strict
//! and non-strict [`TestCase`]s, applies exclusion rules, and classifies the
//! results an engine reports through [`TestExecutor`] into a [`Summary`].

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod exclusions;
pub mod fs;
pub mod metadata;
mod parallel;
pub mod report;
pub mod runner;
pub mod stream;

pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use exclusions::{ExclusionConfig, ExclusionEngine, ExclusionKind, ExclusionReason};
pub use fs::{CorpusFileSystem, FileEntry, LocalFileSystem, RemoteOptions, ZipArchiveFileSystem};
pub use metadata::{ExpectedErrorType, NegativeTestCase, ProgramType, TestCase, TestingPhase};
pub use report::{Summary, SummaryReport};
pub use runner::{
    Cancellation, Classification, Excluding, Outcome, RunnerOptions, Test262Runner, TestExecutor,
};
pub use stream::{CorpusStream, StreamOptions};
