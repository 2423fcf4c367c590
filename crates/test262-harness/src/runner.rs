//! Test262 execution classifier.
//!
//! The harness does not know how to run JavaScript. Callers plug an engine
//! in through [`TestExecutor`]; the runner executes every case on a worker
//! pool and sorts the results into allowed and disallowed buckets.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{HarnessError, Result};
use crate::exclusions::ExclusionEngine;
use crate::metadata::{TestCase, TestingPhase};
use crate::parallel::run_parallel;
use crate::report::Summary;

/// Bucket a single execution falls into, see [`classify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Success,
    Failure,
    FalsePositive,
    FalseNegative,
}

impl Classification {
    pub const ALL: [Classification; 4] = [
        Classification::Success,
        Classification::Failure,
        Classification::FalsePositive,
        Classification::FalseNegative,
    ];
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Classification::Success => "success",
            Classification::Failure => "failure",
            Classification::FalsePositive => "false positive",
            Classification::FalseNegative => "false negative",
        };
        f.write_str(name)
    }
}

/// Classification plus whether the case was allowed (not ignored)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Allowed(Classification),
    Disallowed(Classification),
}

impl Outcome {
    pub fn classification(&self) -> Classification {
        match self {
            Outcome::Allowed(c) | Outcome::Disallowed(c) => *c,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Outcome::Allowed(_))
    }
}

/// What the executor reported for one case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    Completed,
    Raised {
        /// The error belongs to the phase the negative test names
        phase_matched: bool,
    },
}

/// Map one execution to its bucket.
///
/// | execution          | should throw | allowed       | disallowed    |
/// |--------------------|--------------|---------------|---------------|
/// | completed          | no           | Success       | FalsePositive |
/// | completed          | yes          | FalseNegative | FalseNegative |
/// | raised, phase hit  | yes          | Failure       | Success       |
/// | raised, phase miss | yes          | FalseNegative | Failure       |
/// | raised             | no           | FalseNegative | Failure       |
pub fn classify(execution: Execution, should_throw: bool, ignored: bool) -> Outcome {
    use Classification::*;

    let (allowed, disallowed) = match (execution, should_throw) {
        (Execution::Completed, false) => (Success, FalsePositive),
        (Execution::Completed, true) => (FalseNegative, FalseNegative),
        (Execution::Raised { phase_matched: true }, true) => (Failure, Success),
        (Execution::Raised { phase_matched: false }, true) => (FalseNegative, Failure),
        (Execution::Raised { .. }, false) => (FalseNegative, Failure),
    };

    if ignored {
        Outcome::Disallowed(disallowed)
    } else {
        Outcome::Allowed(allowed)
    }
}

/// Engine integration point.
///
/// Implementations are shared by all workers, so they must be `Sync`.
pub trait TestExecutor: Sync {
    type Error;

    /// Run one case. `Err` means the engine raised an error.
    fn execute(&self, case: &TestCase) -> std::result::Result<(), Self::Error>;

    fn should_throw(&self, case: &TestCase) -> bool {
        case.is_negative()
    }

    /// Cases the engine is known not to support
    fn is_ignored(&self, _case: &TestCase) -> bool {
        false
    }

    fn is_parse_error(&self, error: &Self::Error) -> bool;

    fn is_resolution_error(&self, error: &Self::Error) -> bool;

    fn is_runtime_error(&self, error: &Self::Error) -> bool;

    /// Called on the worker thread after each case
    fn on_test_executed(&self, _case: &TestCase) {}
}

/// Executor adapter that ignores every case the exclusion rules match
pub struct Excluding<'a, E> {
    inner: E,
    exclusions: &'a ExclusionEngine,
}

impl<'a, E: TestExecutor> Excluding<'a, E> {
    pub fn new(inner: E, exclusions: &'a ExclusionEngine) -> Self {
        Self { inner, exclusions }
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

impl<E: TestExecutor> TestExecutor for Excluding<'_, E> {
    type Error = E::Error;

    fn execute(&self, case: &TestCase) -> std::result::Result<(), Self::Error> {
        self.inner.execute(case)
    }

    fn should_throw(&self, case: &TestCase) -> bool {
        self.inner.should_throw(case)
    }

    fn is_ignored(&self, case: &TestCase) -> bool {
        self.exclusions.is_excluded(case) || self.inner.is_ignored(case)
    }

    fn is_parse_error(&self, error: &Self::Error) -> bool {
        self.inner.is_parse_error(error)
    }

    fn is_resolution_error(&self, error: &Self::Error) -> bool {
        self.inner.is_resolution_error(error)
    }

    fn is_runtime_error(&self, error: &Self::Error) -> bool {
        self.inner.is_runtime_error(error)
    }

    fn on_test_executed(&self, case: &TestCase) {
        self.inner.on_test_executed(case)
    }
}

/// Shared stop flag for a run
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerOptions {
    /// Number of worker threads
    pub max_parallelism: usize,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            max_parallelism: num_cpus::get(),
        }
    }
}

/// Runs test cases through an executor on a fixed worker pool
#[derive(Debug, Clone)]
pub struct Test262Runner {
    options: RunnerOptions,
}

impl Test262Runner {
    pub fn new(options: RunnerOptions) -> Result<Self> {
        if options.max_parallelism == 0 {
            return Err(HarnessError::InvalidArgument(
                "max_parallelism must be at least 1".to_string(),
            ));
        }
        Ok(Self { options })
    }

    pub fn parallelism(&self) -> usize {
        self.options.max_parallelism
    }

    /// Execute every case and return the bucketed summary
    pub fn run<I, E>(&self, cases: I, executor: &E) -> Summary
    where
        I: IntoIterator<Item = TestCase>,
        I::IntoIter: Send,
        E: TestExecutor + ?Sized,
    {
        self.run_with_cancellation(cases, executor, &Cancellation::new())
    }

    /// Like [`Test262Runner::run`], stopping early once `cancellation` is set
    pub fn run_with_cancellation<I, E>(
        &self,
        cases: I,
        executor: &E,
        cancellation: &Cancellation,
    ) -> Summary
    where
        I: IntoIterator<Item = TestCase>,
        I::IntoIter: Send,
        E: TestExecutor + ?Sized,
    {
        run_parallel(cases, executor, self.options.max_parallelism, cancellation)
    }
}

/// Run one case and classify the result.
///
/// Every executor hook runs under `catch_unwind`; a panic never leaves the
/// worker. A panic while executing or matching the error phase counts as a
/// raise that missed its phase.
pub(crate) fn execute_case<E>(executor: &E, case: &TestCase) -> Outcome
where
    E: TestExecutor + ?Sized,
{
    let execution = contained(case, "executor", || match executor.execute(case) {
        Ok(()) => Execution::Completed,
        Err(error) => Execution::Raised {
            phase_matched: phase_matches(executor, case, &error),
        },
    })
    .unwrap_or(Execution::Raised {
        phase_matched: false,
    });
    let should_throw =
        contained(case, "should_throw", || executor.should_throw(case)).unwrap_or(case.is_negative());
    let ignored = contained(case, "is_ignored", || executor.is_ignored(case)).unwrap_or(false);

    let outcome = classify(execution, should_throw, ignored);
    contained(case, "on_test_executed", || executor.on_test_executed(case));
    outcome
}

/// Call `f`, turning a panic into `None`
fn contained<T>(case: &TestCase, hook: &str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            tracing::warn!(test = %case, "{} panicked: {}", hook, panic_message(payload.as_ref()));
            None
        }
    }
}

fn phase_matches<E>(executor: &E, case: &TestCase, error: &E::Error) -> bool
where
    E: TestExecutor + ?Sized,
{
    match case.negative().map(|n| n.phase) {
        Some(TestingPhase::Parse) => executor.is_parse_error(error),
        Some(TestingPhase::Resolution) => executor.is_resolution_error(error),
        Some(TestingPhase::Runtime) => executor.is_runtime_error(error),
        Some(TestingPhase::Unknown) | None => false,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown".to_string()
    }
}
