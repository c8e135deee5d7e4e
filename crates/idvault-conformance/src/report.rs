//! Per-case results of a suite run.

use std::fmt;
use std::time::Duration;

use idvault_storage::{EntityKind, ErrorCategory, StorageError};

/// Why a conformance case failed.
#[derive(Debug, thiserror::Error)]
pub enum CaseFailure {
    /// A call that should have succeeded returned an error.
    #[error("{step}: unexpected error: {source}")]
    UnexpectedError {
        step: String,
        #[source]
        source: StorageError,
    },

    /// A call returned something other than the expected error.
    #[error("{step}: expected {expected} error, got {actual}")]
    ExpectedError {
        step: String,
        expected: ErrorCategory,
        actual: String,
    },

    /// A read returned a value different from the one expected.
    #[error("{step}: expected {expected}, got {actual}")]
    Mismatch {
        step: String,
        expected: String,
        actual: String,
    },

    /// Concurrent updates were silently discarded.
    #[error("lost update on {kind}: {expected} concurrent updates, {actual} applied")]
    LostUpdate {
        kind: EntityKind,
        expected: usize,
        actual: usize,
    },

    /// A caller observed a state no serial order of updates could produce.
    #[error("torn state on {kind}: {detail}")]
    TornState { kind: EntityKind, detail: String },

    /// Concurrent redemption of one code did not succeed exactly once.
    #[error(
        "code redeemed {successes} times ({not_found} not found, {other} other errors), expected exactly once"
    )]
    Redemption {
        successes: usize,
        not_found: usize,
        other: usize,
    },
}

impl CaseFailure {
    pub(crate) fn unexpected(step: impl Into<String>, source: StorageError) -> Self {
        Self::UnexpectedError {
            step: step.into(),
            source,
        }
    }

    pub(crate) fn mismatch(
        step: impl Into<String>,
        expected: &impl fmt::Debug,
        actual: &impl fmt::Debug,
    ) -> Self {
        Self::Mismatch {
            step: step.into(),
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        }
    }

    pub(crate) fn torn(kind: EntityKind, detail: impl Into<String>) -> Self {
        Self::TornState {
            kind,
            detail: detail.into(),
        }
    }
}

pub(crate) type CaseOutcome = Result<(), CaseFailure>;

/// Outcome of one named case.
#[derive(Debug)]
pub struct CaseResult {
    pub name: String,
    pub elapsed: Duration,
    pub failure: Option<CaseFailure>,
}

impl CaseResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// All case results of one suite run against one backend.
#[derive(Debug)]
pub struct SuiteReport {
    pub suite: &'static str,
    pub backend: &'static str,
    pub cases: Vec<CaseResult>,
}

impl SuiteReport {
    pub(crate) fn new(suite: &'static str, backend: &'static str) -> Self {
        Self {
            suite,
            backend,
            cases: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, name: impl Into<String>, elapsed: Duration, outcome: CaseOutcome) {
        let name = name.into();
        match &outcome {
            Ok(()) => tracing::debug!(suite = self.suite, case = %name, ?elapsed, "case passed"),
            Err(failure) => {
                tracing::error!(suite = self.suite, case = %name, %failure, "case failed");
            }
        }
        self.cases.push(CaseResult {
            name,
            elapsed,
            failure: outcome.err(),
        });
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.cases.iter().all(CaseResult::passed)
    }

    /// Failed cases with their failures.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &CaseFailure)> {
        self.cases
            .iter()
            .filter_map(|case| case.failure.as_ref().map(|f| (case.name.as_str(), f)))
    }

    /// Looks up a case by name.
    #[must_use]
    pub fn case(&self, name: &str) -> Option<&CaseResult> {
        self.cases.iter().find(|case| case.name == name)
    }

    /// Panics with every failure if any case failed.
    #[track_caller]
    pub fn assert_passed(&self) {
        if !self.passed() {
            panic!("{self}");
        }
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.failures().count();
        writeln!(
            f,
            "{} suite on {}: {} cases, {} failed",
            self.suite,
            self.backend,
            self.cases.len(),
            failed
        )?;
        for (name, failure) in self.failures() {
            writeln!(f, "  FAIL {name}: {failure}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_collects_failures() {
        let mut report = SuiteReport::new("crud", "memory");
        report.record("ok", Duration::ZERO, Ok(()));
        report.record(
            "lost",
            Duration::ZERO,
            Err(CaseFailure::LostUpdate {
                kind: EntityKind::Client,
                expected: 10,
                actual: 7,
            }),
        );

        assert!(!report.passed());
        assert!(report.case("ok").unwrap().passed());
        let failures: Vec<_> = report.failures().map(|(name, _)| name).collect();
        assert_eq!(failures, ["lost"]);

        let text = report.to_string();
        assert!(text.contains("2 cases, 1 failed"));
        assert!(text.contains("10 concurrent updates, 7 applied"));
    }

    #[test]
    #[should_panic(expected = "FAIL redeem")]
    fn test_assert_passed_panics_on_failure() {
        let mut report = SuiteReport::new("transactions", "memory");
        report.record(
            "redeem",
            Duration::ZERO,
            Err(CaseFailure::Redemption {
                successes: 2,
                not_found: 8,
                other: 0,
            }),
        );
        report.assert_passed();
    }
}
