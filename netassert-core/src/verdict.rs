//! Verdict aggregation over all result sinks.
//!
//! Results are keyed strictly by target, never by arrival order, so the
//! verdict is the same for any permutation of the input.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use netassert_types::Target;

use crate::tap::TapReport;

/// One target's parsed sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetResult {
    /// Target the sink belongs to.
    pub target: Target,
    /// Parsed report.
    pub report: TapReport,
}

impl TargetResult {
    /// Parse a sink's content.
    pub fn parse(target: Target, content: &str) -> Self {
        Self {
            target,
            report: TapReport::parse(content),
        }
    }

    /// Did the target pass?
    pub fn passed(&self) -> bool {
        self.report.passed()
    }
}

/// Final classification of a run, in order of precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every expected target produced a passing report.
    Passed,
    /// All expected sinks exist but some failed.
    TestsFailed,
    /// More or fewer sinks than expected targets.
    CountMismatch,
    /// Not a single sink was produced.
    NoResults,
}

impl Outcome {
    /// True only for [`Outcome::Passed`].
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Passed)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Passed => "passed",
            Outcome::TestsFailed => "tests failed",
            Outcome::CountMismatch => "result count mismatch",
            Outcome::NoResults => "no results produced",
        };
        f.write_str(s)
    }
}

/// Aggregate of every sink found after dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    expected: usize,
    results: BTreeMap<Target, TargetResult>,
}

impl Verdict {
    /// Aggregate sinks against the expected count.
    ///
    /// If the same target appears twice the failing result is kept.
    pub fn aggregate<I>(expected: usize, sinks: I) -> Self
    where
        I: IntoIterator<Item = (Target, String)>,
    {
        let mut results: BTreeMap<Target, TargetResult> = BTreeMap::new();
        for (target, content) in sinks {
            let result = TargetResult::parse(target.clone(), &content);
            match results.get(&target) {
                Some(existing) if !existing.passed() => {}
                _ => {
                    results.insert(target, result);
                }
            }
        }
        Self { expected, results }
    }

    /// Expected number of sinks.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Number of sinks found.
    pub fn found(&self) -> usize {
        self.results.len()
    }

    /// Number of sinks that did not pass.
    pub fn failed(&self) -> usize {
        self.results.values().filter(|r| !r.passed()).count()
    }

    /// Per-target results in target order.
    pub fn results(&self) -> impl Iterator<Item = &TargetResult> {
        self.results.values()
    }

    /// Results that did not pass.
    pub fn failures(&self) -> impl Iterator<Item = &TargetResult> {
        self.results.values().filter(|r| !r.passed())
    }

    /// Classify the run.
    pub fn outcome(&self) -> Outcome {
        if self.found() == 0 {
            Outcome::NoResults
        } else if self.found() != self.expected {
            Outcome::CountMismatch
        } else if self.failed() > 0 {
            Outcome::TestsFailed
        } else {
            Outcome::Passed
        }
    }

    /// Human-readable summary line.
    pub fn summary(&self, elapsed: Duration) -> String {
        let secs = elapsed.as_secs_f64();
        match self.outcome() {
            Outcome::Passed => format!("All {} tests passed in {:.1}s", self.found(), secs),
            Outcome::TestsFailed => format!(
                "{} of {} tests failed in {:.1}s",
                self.failed(),
                self.found(),
                secs
            ),
            Outcome::CountMismatch => format!(
                "Result count mismatch: {} tests expected, {} found, {} failed in {:.1}s",
                self.expected,
                self.found(),
                self.failed(),
                secs
            ),
            Outcome::NoResults => format!(
                "No results produced: {} tests expected, 0 found in {:.1}s",
                self.expected, secs
            ),
        }
    }
}
