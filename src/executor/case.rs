//! Test case runner
//!
//! A case with fixed arguments yields one test. A delay-enumerated case asks
//! its data source for rows when it runs and yields one test per row; a data
//! source that fails or yields nothing is reported as a single failed test.
//! A skipped delay-enumerated case never asks its source.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::bus::{CaseStarting, CleanupFailure, Message, MessageIds, ScopeFinished};
use crate::error::TestError;
use crate::models::{BeforeAfterHook, CaseData, RunSummary, Test, TestCase, TheoryRow};

use super::class::ClassPlan;
use super::phase::{run_phase, RunContext, ScopeStrategy};
use super::test::TestRunner;

pub struct CaseRunner {
    run: RunContext,
    case: Arc<TestCase>,
    ids: MessageIds,
    plan: Arc<ClassPlan>,
    hooks: Vec<Arc<dyn BeforeAfterHook>>,
    inherited: Option<TestError>,
}

impl CaseRunner {
    pub fn new(
        run: RunContext,
        case: Arc<TestCase>,
        parent_ids: &MessageIds,
        plan: Arc<ClassPlan>,
        hooks: Vec<Arc<dyn BeforeAfterHook>>,
        inherited: Option<TestError>,
    ) -> Self {
        let ids = parent_ids.with_case(case.unique_id.clone());
        Self {
            run,
            case,
            ids,
            plan,
            hooks,
            inherited,
        }
    }

    pub async fn run(mut self) -> RunSummary {
        let run = self.run.clone();
        run_phase(&mut self, &run).await
    }

    fn runner(&self, test: Test) -> TestRunner {
        TestRunner::new(
            self.run.clone(),
            test,
            &self.ids,
            Arc::clone(&self.plan),
            self.hooks.clone(),
        )
    }

    async fn run_tests(&mut self, startup_error: Option<TestError>) -> RunSummary {
        if let Some(error) = startup_error.or_else(|| self.inherited.clone()) {
            return self.runner(Test::for_case(&self.case)).failing_with(error).run().await;
        }

        let source = match &self.case.data {
            CaseData::Arguments(_) => return self.runner(Test::for_case(&self.case)).run().await,
            CaseData::DelayEnumerated(source) => Arc::clone(source),
        };

        // a skipped (or misconfigured) case reports without touching its data source
        if !matches!(self.case.effective_skip_reason(), Ok(None)) {
            return self.runner(Test::for_case(&self.case)).run().await;
        }

        let rows = match enumerate(&self.case, || source()) {
            Ok(rows) => rows,
            Err(error) => {
                warn!("{}: {}", self.case.display_name, error);
                return self
                    .runner(Test::synthetic(&self.case))
                    .failing_with(error)
                    .run()
                    .await;
            }
        };
        debug!("{} enumerated {} row(s)", self.case.display_name, rows.len());

        let mut summary = RunSummary::default();
        for (index, row) in rows.into_iter().enumerate() {
            let test = Test::for_row(&self.case, index as i32, row);
            summary.aggregate(&self.runner(test).run().await);
            if self.run.is_cancelled() {
                break;
            }
        }
        summary
    }
}

/// Pull the rows from a data source, treating panics and empty results as failures
fn enumerate(
    case: &TestCase,
    source: impl FnOnce() -> Result<Vec<TheoryRow>, TestError>,
) -> Result<Vec<TheoryRow>, TestError> {
    let rows = panic::catch_unwind(AssertUnwindSafe(source))
        .unwrap_or_else(|payload| Err(TestError::from_panic(payload)))?;
    if rows.is_empty() {
        return Err(TestError::pipeline(format!(
            "No data found for {}.{}",
            case.class.name, case.method.name
        )));
    }
    Ok(rows)
}

impl ScopeStrategy for CaseRunner {
    fn level(&self) -> &'static str {
        "Case"
    }

    fn name(&self) -> String {
        self.case.display_name.clone()
    }

    fn starting(&self) -> Message {
        Message::CaseStarting(CaseStarting {
            ids: self.ids.clone(),
            display_name: self.case.display_name.clone(),
            skip_reason: self.case.skip_reason.clone(),
            traits: self.case.traits.clone(),
        })
    }

    fn finished(&self, summary: RunSummary) -> Message {
        Message::CaseFinished(ScopeFinished {
            ids: self.ids.clone(),
            summary,
        })
    }

    fn cleanup_failure(&self, error: &TestError) -> Message {
        Message::CaseCleanupFailure(CleanupFailure::new(self.ids.clone(), error))
    }

    fn run_children(&mut self, startup_error: Option<TestError>) -> BoxFuture<'_, RunSummary> {
        self.run_tests(startup_error).boxed()
    }
}
