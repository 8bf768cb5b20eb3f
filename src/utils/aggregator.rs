//! Exception aggregation
//!
//! Collects failures from independent operations so that one failure never
//! prevents the next operation from running. The owning scope decides what to
//! do with the collected failures.

use futures::FutureExt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use crate::error::TestError;

/// Ordered accumulator of captured failures
#[derive(Clone, Debug, Default)]
pub struct ExceptionAggregator {
    errors: Vec<TestError>,
}

impl ExceptionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A child view seeded with a copy of the current failures.
    ///
    /// The child owns its own storage; failures added to it never show up here.
    pub fn child(&self) -> Self {
        self.clone()
    }

    /// Record a failure
    pub fn add(&mut self, error: TestError) {
        self.errors.push(error);
    }

    /// Append every failure held by another aggregator
    pub fn aggregate(&mut self, other: &ExceptionAggregator) {
        self.errors.extend(other.errors.iter().cloned());
    }

    /// Run a fallible operation, capturing its error or panic.
    ///
    /// Returns `None` when the operation failed.
    pub fn run<T>(&mut self, f: impl FnOnce() -> Result<T, TestError>) -> Option<T> {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                self.add(err);
                None
            }
            Err(payload) => {
                self.add(TestError::from_panic(payload));
                None
            }
        }
    }

    /// Await a fallible future, capturing its error or panic
    pub async fn run_async<T, F>(&mut self, future: F) -> Option<T>
    where
        F: Future<Output = Result<T, TestError>>,
    {
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                self.add(err);
                None
            }
            Err(payload) => {
                self.add(TestError::from_panic(payload));
                None
            }
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[TestError] {
        &self.errors
    }

    /// `None` for no failures, the failure itself for one, a composite otherwise
    pub fn to_error(&self) -> Option<TestError> {
        match self.errors.len() {
            0 => None,
            1 => Some(self.errors[0].clone()),
            _ => Some(TestError::Aggregate(self.errors.clone())),
        }
    }

    /// `to_error` followed by `clear`
    pub fn take(&mut self) -> Option<TestError> {
        let error = self.to_error();
        self.clear();
        error
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }
}
