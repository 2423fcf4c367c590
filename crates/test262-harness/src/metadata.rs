//! Test262 test metadata parsing and strict-mode variant expansion

use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::{HarnessError, Result};

const METADATA_START: &str = "/*---";
const METADATA_END: &str = "---*/";
const USE_STRICT_PROLOGUE: &str = "\"use strict\";\n";

/// Type of code a test contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramType {
    /// Regular script code
    Script,
    /// ES module code
    Module,
}

/// Phase when a negative test is expected to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestingPhase {
    /// Parse-time (early) error
    Parse,
    /// Module resolution/linking error
    Resolution,
    /// Runtime error
    Runtime,
    /// Value present in the file but not understood
    Unknown,
}

impl FromStr for TestingPhase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            // `early` is the pre-2017 spelling of `parse`
            "parse" | "early" => Ok(TestingPhase::Parse),
            "resolution" => Ok(TestingPhase::Resolution),
            "runtime" => Ok(TestingPhase::Runtime),
            _ => Err(format!("unknown testing phase `{}`", s)),
        }
    }
}

impl fmt::Display for TestingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestingPhase::Parse => write!(f, "parse"),
            TestingPhase::Resolution => write!(f, "resolution"),
            TestingPhase::Runtime => write!(f, "runtime"),
            TestingPhase::Unknown => write!(f, "unknown"),
        }
    }
}

/// Error constructor a negative test expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ExpectedErrorType {
    SyntaxError,
    ReferenceError,
    TypeError,
    RangeError,
    EvalError,
    URIError,
    /// Thrown by the harness helpers (`$DONOTEVALUATE`, assert failures)
    Test262Error,
    Unknown,
}

impl FromStr for ExpectedErrorType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "syntaxerror" => Ok(ExpectedErrorType::SyntaxError),
            "referenceerror" => Ok(ExpectedErrorType::ReferenceError),
            "typeerror" => Ok(ExpectedErrorType::TypeError),
            "rangeerror" => Ok(ExpectedErrorType::RangeError),
            "evalerror" => Ok(ExpectedErrorType::EvalError),
            "urierror" => Ok(ExpectedErrorType::URIError),
            "test262error" => Ok(ExpectedErrorType::Test262Error),
            _ => Err(format!("unknown error type `{}`", s)),
        }
    }
}

/// Negative test expectation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct NegativeTestCase {
    /// Phase when the error should occur
    pub phase: TestingPhase,
    /// Expected error type
    #[serde(rename = "type")]
    pub error_type: ExpectedErrorType,
}

/// Metadata shared by the strict and non-strict variants of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMetadata {
    /// Root-relative path separated with slashes
    pub file_name: String,
    /// `esid`, falling back to `es5id` then `es6id`
    pub ecma_script_id: String,
    pub author: String,
    pub description: String,
    /// Free-form comment, usually a quote from ECMA-262
    pub info: String,
    /// Locales required by Intl tests
    pub locale: Vec<String>,
    /// Language features the test depends on
    pub features: Vec<String>,
    /// Boolean properties (`onlyStrict`, `module`, `raw`, `async`, ...)
    pub flags: Vec<String>,
    /// Harness helper files to evaluate before the test
    pub includes: Vec<String>,
    pub negative: Option<NegativeTestCase>,
    pub program_type: ProgramType,
}

/// A single runnable test262 case.
///
/// Equality and hashing use the `(file_name, strict)` pair, so the two
/// variants of one file are distinct values.
#[derive(Debug, Clone)]
pub struct TestCase {
    metadata: Arc<TestMetadata>,
    program: String,
    strict: bool,
}

impl TestCase {
    /// Parse a test file into its runnable variants.
    ///
    /// With `expand_strict` the result holds one or two cases, non-strict
    /// first. Without it exactly one case is returned.
    pub fn parse(contents: &str, file_name: &str, expand_strict: bool) -> Result<Vec<TestCase>> {
        let file_name = crate::fs::normalize_path(file_name);
        let metadata = parse_metadata(contents, file_name)?;

        let module = metadata.program_type == ProgramType::Module;
        let only_strict = metadata.flags.iter().any(|f| f == "onlyStrict");
        let no_strict = metadata.flags.iter().any(|f| f == "noStrict" || f == "raw");

        let base = TestCase {
            metadata: Arc::new(metadata),
            program: contents.to_string(),
            strict: false,
        };

        if module {
            return Ok(vec![base]);
        }
        if only_strict {
            return Ok(vec![base.as_strict()]);
        }
        if no_strict || !expand_strict {
            return Ok(vec![base]);
        }

        let strict = base.as_strict();
        Ok(vec![base, strict])
    }

    /// Read a whole stream and parse it, see [`TestCase::parse`]
    pub fn from_reader(
        mut reader: impl Read,
        file_name: &str,
        expand_strict: bool,
    ) -> Result<Vec<TestCase>> {
        let mut contents = String::new();
        reader.read_to_string(&mut contents).map_err(|e| {
            HarnessError::format(crate::fs::normalize_path(file_name), e.to_string())
        })?;
        let contents = contents.strip_prefix('\u{feff}').unwrap_or(&contents);
        Self::parse(contents, file_name, expand_strict)
    }

    /// Strict-mode copy of this case with a `"use strict";` prologue
    pub fn as_strict(&self) -> TestCase {
        if self.strict {
            return self.clone();
        }
        let mut program = String::with_capacity(USE_STRICT_PROLOGUE.len() + self.program.len());
        program.push_str(USE_STRICT_PROLOGUE);
        program.push_str(&self.program);
        TestCase {
            metadata: Arc::clone(&self.metadata),
            program,
            strict: true,
        }
    }

    pub fn metadata(&self) -> &TestMetadata {
        &self.metadata
    }

    pub fn file_name(&self) -> &str {
        &self.metadata.file_name
    }

    /// File name with the leading `test/` segment removed
    pub fn test_name(&self) -> &str {
        self.file_name()
            .strip_prefix("test/")
            .unwrap_or(self.file_name())
    }

    pub fn ecma_script_id(&self) -> &str {
        &self.metadata.ecma_script_id
    }

    pub fn author(&self) -> &str {
        &self.metadata.author
    }

    pub fn description(&self) -> &str {
        &self.metadata.description
    }

    pub fn info(&self) -> &str {
        &self.metadata.info
    }

    pub fn locale(&self) -> &[String] {
        &self.metadata.locale
    }

    pub fn features(&self) -> &[String] {
        &self.metadata.features
    }

    pub fn flags(&self) -> &[String] {
        &self.metadata.flags
    }

    pub fn includes(&self) -> &[String] {
        &self.metadata.includes
    }

    pub fn negative(&self) -> Option<&NegativeTestCase> {
        self.metadata.negative.as_ref()
    }

    /// Source text to execute
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn strict(&self) -> bool {
        self.strict
    }

    pub fn program_type(&self) -> ProgramType {
        self.metadata.program_type
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.metadata.flags.iter().any(|f| f == flag)
    }

    /// Check if this is an async test (completes through `$DONE`)
    pub fn is_async(&self) -> bool {
        self.has_flag("async")
    }

    /// Check if the test is expected to raise an error
    pub fn is_negative(&self) -> bool {
        self.metadata.negative.is_some() || self.has_flag("negative")
    }
}

impl PartialEq for TestCase {
    fn eq(&self, other: &Self) -> bool {
        self.strict == other.strict && self.file_name() == other.file_name()
    }
}

impl Eq for TestCase {}

impl Hash for TestCase {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.file_name().hash(state);
        self.strict.hash(state);
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.strict { "(strict mode)" } else { "(default)" };
        write!(f, "{}{}", self.file_name(), mode)
    }
}

fn parse_metadata(contents: &str, file_name: String) -> Result<TestMetadata> {
    let Some(start) = contents.find(METADATA_START) else {
        return Err(HarnessError::format(file_name, "cannot find YAML section start"));
    };
    let body_start = start + METADATA_START.len();
    let Some(end) = contents[body_start..].find(METADATA_END) else {
        return Err(HarnessError::format(file_name, "cannot find YAML section end"));
    };
    let yaml = &contents[body_start..body_start + end];
    if yaml.trim().is_empty() {
        return Err(HarnessError::format(file_name, "YAML section is empty"));
    }

    let document: Value = match serde_yaml::from_str(yaml) {
        Ok(document) => document,
        Err(e) => {
            return Err(HarnessError::format(
                file_name,
                format!("could not load YAML content: {}", e),
            ));
        }
    };
    let Value::Mapping(root) = document else {
        return Err(HarnessError::format(file_name, "YAML section is not a mapping"));
    };

    let ecma_script_id = ["esid", "es5id", "es6id"]
        .iter()
        .find_map(|key| root.get(*key))
        .map(|v| scalar(v, "esid", &file_name))
        .transpose()?
        .unwrap_or_default();

    let flags = list(&root, "flags", &file_name)?;
    let program_type = if flags.iter().any(|f| f == "module") {
        ProgramType::Module
    } else {
        ProgramType::Script
    };

    let negative = match root.get("negative") {
        None | Some(Value::Null) => None,
        Some(Value::Mapping(negative)) => Some(parse_negative(negative, &file_name)?),
        Some(_) => {
            return Err(HarnessError::format(file_name, "`negative` must be a mapping"));
        }
    };

    Ok(TestMetadata {
        ecma_script_id,
        author: text(&root, "author", &file_name)?,
        description: text(&root, "description", &file_name)?,
        info: text(&root, "info", &file_name)?,
        locale: list(&root, "locale", &file_name)?,
        features: list(&root, "features", &file_name)?,
        includes: list(&root, "includes", &file_name)?,
        flags,
        negative,
        program_type,
        file_name,
    })
}

/// Unparseable values become `Unknown` instead of failing the file.
fn parse_negative(negative: &Mapping, file_name: &str) -> Result<NegativeTestCase> {
    let phase_raw = text(negative, "phase", file_name)?;
    let type_raw = text(negative, "type", file_name)?;

    let phase = phase_raw.parse().unwrap_or_else(|e| {
        tracing::warn!(file = file_name, "negative.phase fell back to unknown: {}", e);
        TestingPhase::Unknown
    });
    let error_type = type_raw.parse().unwrap_or_else(|e| {
        tracing::warn!(file = file_name, "negative.type fell back to unknown: {}", e);
        ExpectedErrorType::Unknown
    });

    Ok(NegativeTestCase { phase, error_type })
}

fn scalar(value: &Value, key: &str, file_name: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err(HarnessError::format(
            file_name,
            format!("`{}` must be a scalar", key),
        )),
    }
}

fn text(map: &Mapping, key: &str, file_name: &str) -> Result<String> {
    map.get(key)
        .map(|v| scalar(v, key, file_name))
        .transpose()
        .map(Option::unwrap_or_default)
}

fn list(map: &Mapping, key: &str, file_name: &str) -> Result<Vec<String>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(items)) => items.iter().map(|v| scalar(v, key, file_name)).collect(),
        Some(Value::String(single)) => Ok(vec![single.clone()]),
        Some(_) => Err(HarnessError::format(
            file_name,
            format!("`{}` must be a list", key),
        )),
    }
}
