//! Test runner
//!
//! The leaf level: one `Test` from TestStarting to TestFinished, with exactly
//! one result message in between.

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::bus::{
    CleanupFailure, Message, MessageIds, ScopeFinished, TestFailed, TestResult, TestSkipped,
    TestStarting,
};
use crate::context::{TestContext, TestOutputHelper};
use crate::error::TestError;
use crate::models::{BeforeAfterHook, RunSummary, Test, TestStatus};
use crate::utils::ExceptionAggregator;

use super::class::ClassPlan;
use super::invoker::TestInvoker;
use super::phase::{run_phase, RunContext, ScopeStrategy};

/// Runs a single test
pub struct TestRunner {
    run: RunContext,
    test: Test,
    ids: MessageIds,
    plan: Arc<ClassPlan>,
    hooks: Vec<Arc<dyn BeforeAfterHook>>,
    /// Failure decided before the test runs; reported without invoking anything
    preset_failure: Option<TestError>,
}

impl TestRunner {
    pub fn new(
        run: RunContext,
        test: Test,
        parent_ids: &MessageIds,
        plan: Arc<ClassPlan>,
        hooks: Vec<Arc<dyn BeforeAfterHook>>,
    ) -> Self {
        let ids = parent_ids.with_test(test.unique_id.clone());
        Self {
            run,
            test,
            ids,
            plan,
            hooks,
            preset_failure: None,
        }
    }

    /// Report the test as failed with the given error instead of running it
    pub fn failing_with(mut self, error: TestError) -> Self {
        self.preset_failure = Some(error);
        self
    }

    pub async fn run(mut self) -> RunSummary {
        let run = self.run.clone();
        run_phase(&mut self, &run).await
    }

    async fn execute(&mut self) -> RunSummary {
        if let Some(error) = self.preset_failure.take() {
            return self.report(Err(error), Duration::ZERO, String::new(), Vec::new());
        }

        if !self.run.explicit.should_run(self.test.explicit) {
            debug!("Not running {}", self.test.display_name);
            let result = self.result(Duration::ZERO, String::new(), Vec::new());
            self.run.queue(Message::TestNotRun(result));
            return RunSummary::single(TestStatus::NotRun, Duration::ZERO);
        }

        match self.test.effective_skip_reason() {
            Ok(Some(reason)) => {
                let skipped = Err(TestError::skip(reason));
                return self.report(skipped, Duration::ZERO, String::new(), Vec::new());
            }
            Ok(None) => {}
            Err(error) => {
                return self.report(Err(error), Duration::ZERO, String::new(), Vec::new());
            }
        }

        let output = TestOutputHelper::new();
        output.initialize(Arc::clone(&self.run.bus), self.ids.clone());
        let context = TestContext::new(
            self.ids.clone(),
            self.test.display_name.clone(),
            output.clone(),
            self.run.cancellation.clone(),
            self.run.diagnostics.clone(),
        );

        let mut aggregator = ExceptionAggregator::new();
        let elapsed = TestInvoker::new(
            &self.run,
            &self.test,
            &self.ids,
            &self.plan,
            &self.hooks,
            &context,
        )
        .run(&mut aggregator)
        .await;

        let captured = output.uninitialize();
        let outcome = match aggregator.to_error() {
            Some(error) => Err(error),
            None => Ok(()),
        };
        self.report(outcome, elapsed, captured, context.warnings())
    }

    /// Emit the result message and build the one-test summary
    fn report(
        &self,
        outcome: Result<(), TestError>,
        elapsed: Duration,
        output: String,
        warnings: Vec<String>,
    ) -> RunSummary {
        let result = self.result(elapsed, output, warnings);
        let status = match outcome {
            Ok(()) => {
                self.run.queue(Message::TestPassed(result));
                TestStatus::Passed
            }
            Err(TestError::Skipped(reason)) => {
                self.run.queue(Message::TestSkipped(TestSkipped { result, reason }));
                TestStatus::Skipped
            }
            Err(error) => {
                debug!("{} failed: {}", self.test.display_name, error);
                self.run.queue(Message::TestFailed(TestFailed {
                    result,
                    cause: error.cause(),
                    failure: error.metadata(),
                }));
                TestStatus::Failed
            }
        };
        debug!("[{}] {}", status, self.test.display_name);
        RunSummary::single(status, elapsed)
    }

    fn result(&self, elapsed: Duration, output: String, warnings: Vec<String>) -> TestResult {
        TestResult {
            ids: self.ids.clone(),
            execution_time: elapsed,
            output,
            warnings,
        }
    }
}

impl ScopeStrategy for TestRunner {
    fn level(&self) -> &'static str {
        "Test"
    }

    fn name(&self) -> String {
        self.test.display_name.clone()
    }

    fn starting(&self) -> Message {
        Message::TestStarting(TestStarting {
            ids: self.ids.clone(),
            display_name: self.test.display_name.clone(),
            explicit: self.test.explicit,
            timeout_ms: self.test.case.timeout_ms,
            traits: self.test.traits.clone(),
            start_time: Utc::now(),
        })
    }

    fn finished(&self, summary: RunSummary) -> Message {
        Message::TestFinished(ScopeFinished {
            ids: self.ids.clone(),
            summary,
        })
    }

    fn cleanup_failure(&self, error: &TestError) -> Message {
        Message::TestCleanupFailure(CleanupFailure::new(self.ids.clone(), error))
    }

    fn run_children(&mut self, startup_error: Option<TestError>) -> BoxFuture<'_, RunSummary> {
        if let Some(error) = startup_error {
            self.preset_failure.get_or_insert(error);
        }
        self.execute().boxed()
    }
}
