//! Run summary: eight buckets of test cases plus exclusion drift

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use crate::metadata::TestCase;
use crate::runner::{Classification, Outcome};

/// Cases grouped by classification, for either allowed or disallowed cases
#[derive(Debug, Clone, Default)]
pub struct Buckets {
    pub success: Vec<TestCase>,
    pub failure: Vec<TestCase>,
    pub false_positive: Vec<TestCase>,
    pub false_negative: Vec<TestCase>,
}

impl Buckets {
    pub fn get(&self, classification: Classification) -> &[TestCase] {
        match classification {
            Classification::Success => &self.success,
            Classification::Failure => &self.failure,
            Classification::FalsePositive => &self.false_positive,
            Classification::FalseNegative => &self.false_negative,
        }
    }

    fn get_mut(&mut self, classification: Classification) -> &mut Vec<TestCase> {
        match classification {
            Classification::Success => &mut self.success,
            Classification::Failure => &mut self.failure,
            Classification::FalsePositive => &mut self.false_positive,
            Classification::FalseNegative => &mut self.false_negative,
        }
    }

    pub fn len(&self) -> usize {
        Classification::ALL.iter().map(|c| self.get(*c).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sort(&mut self) {
        for classification in Classification::ALL {
            self.get_mut(classification)
                .sort_by(|a, b| (a.file_name(), a.strict()).cmp(&(b.file_name(), b.strict())));
        }
    }

    fn counts(&self) -> BucketCounts {
        BucketCounts {
            success: self.success.len(),
            failure: self.failure.len(),
            false_positive: self.false_positive.len(),
            false_negative: self.false_negative.len(),
        }
    }
}

/// Result of a run
#[derive(Debug, Clone, Default)]
pub struct Summary {
    /// Cases not excluded by configuration
    pub allowed: Buckets,
    /// Cases the exclusion rules expected to go wrong
    pub disallowed: Buckets,
    /// Exact exclusion entries that named no file
    pub unrecognized: Vec<String>,
    /// The run was stopped before every case was executed
    pub cancelled: bool,
}

impl Summary {
    pub(crate) fn record(&mut self, outcome: Outcome, case: TestCase) {
        match outcome {
            Outcome::Allowed(c) => self.allowed.get_mut(c).push(case),
            Outcome::Disallowed(c) => self.disallowed.get_mut(c).push(case),
        }
    }

    /// Sort every bucket by file name, non-strict first
    pub(crate) fn finish(&mut self) {
        self.allowed.sort();
        self.disallowed.sort();
    }

    pub fn with_unrecognized(mut self, unrecognized: Vec<String>) -> Self {
        self.unrecognized = unrecognized;
        self
    }

    /// Number of cases executed
    pub fn total(&self) -> usize {
        self.allowed.len() + self.disallowed.len()
    }

    /// True when any disallowed bucket is non-empty
    pub fn has_problems(&self) -> bool {
        !self.disallowed.is_empty()
    }

    /// Disallowed cases with their classification
    pub fn problems(&self) -> impl Iterator<Item = (Classification, &TestCase)> {
        Classification::ALL.into_iter().flat_map(move |c| {
            self.disallowed.get(c).iter().map(move |case| (c, case))
        })
    }

    /// Serializable snapshot
    pub fn report(&self) -> SummaryReport {
        let names = |cases: &[TestCase]| -> Vec<String> {
            cases.iter().map(|c| c.to_string()).collect()
        };
        SummaryReport {
            generated_at: Utc::now(),
            total: self.total(),
            cancelled: self.cancelled,
            allowed: self.allowed.counts(),
            disallowed: self.disallowed.counts(),
            problems: ProblemNames {
                success: names(&self.disallowed.success),
                failure: names(&self.disallowed.failure),
                false_positive: names(&self.disallowed.false_positive),
                false_negative: names(&self.disallowed.false_negative),
            },
            unrecognized: self.unrecognized.clone(),
        }
    }

    /// Print a colored overview to stdout
    pub fn print(&self) {
        println!("\n{}", "=== Test262 Summary ===".bold().cyan());
        println!("Total:           {}", self.total());
        println!(
            "Allowed:         {} success, {} failure, {} false positive, {} false negative",
            self.allowed.success.len().to_string().green(),
            self.allowed.failure.len().to_string().red(),
            self.allowed.false_positive.len().to_string().yellow(),
            self.allowed.false_negative.len().to_string().red(),
        );
        println!(
            "Disallowed:      {} success, {} failure, {} false positive, {} false negative",
            self.disallowed.success.len(),
            self.disallowed.failure.len(),
            self.disallowed.false_positive.len(),
            self.disallowed.false_negative.len(),
        );
        if self.cancelled {
            println!("{}", "Run was cancelled".yellow());
        }

        if self.has_problems() {
            println!("\n{}", "=== Excluded cases with unexpected results ===".bold().red());
            for (classification, case) in self.problems() {
                println!("{}: {}", classification.to_string().yellow(), case);
            }
        }

        if !self.unrecognized.is_empty() {
            println!("\n{}", "=== Unrecognized exclusions ===".bold().yellow());
            for entry in &self.unrecognized {
                println!("  {}", entry);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketCounts {
    pub success: usize,
    pub failure: usize,
    pub false_positive: usize,
    pub false_negative: usize,
}

/// Names of disallowed cases per classification
#[derive(Debug, Clone, Serialize)]
pub struct ProblemNames {
    pub success: Vec<String>,
    pub failure: Vec<String>,
    pub false_positive: Vec<String>,
    pub false_negative: Vec<String>,
}

/// JSON-friendly snapshot of a [`Summary`]
#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub cancelled: bool,
    pub allowed: BucketCounts,
    pub disallowed: BucketCounts,
    pub problems: ProblemNames,
    pub unrecognized: Vec<String>,
}

impl SummaryReport {
    /// Export report as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
