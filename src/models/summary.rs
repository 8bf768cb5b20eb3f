//! Run summaries and test outcomes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::AddAssign;
use std::time::Duration;

/// Final state of a single test
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    NotRun,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "PASS"),
            TestStatus::Failed => write!(f, "FAIL"),
            TestStatus::Skipped => write!(f, "SKIP"),
            TestStatus::NotRun => write!(f, "NOT RUN"),
        }
    }
}

/// Aggregate counters for a subtree of the run.
///
/// `failed + skipped + not_run <= total` always holds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_run: usize,
    pub time: Duration,
}

impl RunSummary {
    /// Summary of exactly one test
    pub fn single(status: TestStatus, time: Duration) -> Self {
        Self {
            total: 1,
            failed: usize::from(status == TestStatus::Failed),
            skipped: usize::from(status == TestStatus::Skipped),
            not_run: usize::from(status == TestStatus::NotRun),
            time,
        }
    }

    /// Add a child summary to this one
    pub fn aggregate(&mut self, other: &RunSummary) {
        self.total += other.total;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.not_run += other.not_run;
        self.time += other.time;
    }

    pub fn passed(&self) -> usize {
        self.total - self.failed - self.skipped - self.not_run
    }

    pub fn is_all_passed(&self) -> bool {
        self.failed == 0
    }
}

impl AddAssign<RunSummary> for RunSummary {
    fn add_assign(&mut self, other: RunSummary) {
        self.aggregate(&other);
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Skip: {} | Not run: {} | Time: {:.3}s",
            self.total,
            self.passed(),
            self.failed,
            self.skipped,
            self.not_run,
            self.time.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single() {
        let summary = RunSummary::single(TestStatus::Failed, Duration::from_millis(3));
        assert_eq!(summary.total, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.passed(), 0);

        let summary = RunSummary::single(TestStatus::NotRun, Duration::ZERO);
        assert_eq!(summary.not_run, 1);
    }

    #[test]
    fn test_aggregate_sums_every_counter() {
        let mut parent = RunSummary::default();
        parent += RunSummary::single(TestStatus::Passed, Duration::from_millis(5));
        parent += RunSummary::single(TestStatus::Skipped, Duration::from_millis(0));
        parent += RunSummary::single(TestStatus::Failed, Duration::from_millis(7));

        assert_eq!(parent.total, 3);
        assert_eq!(parent.failed, 1);
        assert_eq!(parent.skipped, 1);
        assert_eq!(parent.passed(), 1);
        assert_eq!(parent.time, Duration::from_millis(12));
    }

    #[test]
    fn test_display() {
        let summary = RunSummary::single(TestStatus::Passed, Duration::from_millis(1500));
        assert_eq!(
            summary.to_string(),
            "Total: 1 | Pass: 1 | Fail: 0 | Skip: 0 | Not run: 0 | Time: 1.500s"
        );
        assert_eq!(TestStatus::NotRun.to_string(), "NOT RUN");
    }
}
