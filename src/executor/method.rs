//! Test method runner

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

use crate::bus::{CleanupFailure, Message, MessageIds, ScopeFinished, ScopeStarting};
use crate::error::TestError;
use crate::models::{BeforeAfterHook, RunSummary, TestCase, TestMethod};

use super::case::CaseRunner;
use super::class::ClassPlan;
use super::phase::{run_phase, RunContext, ScopeStrategy};

/// Runs the cases of one test method in order
pub struct MethodRunner {
    run: RunContext,
    method: Arc<TestMethod>,
    display_name: String,
    cases: Vec<Arc<TestCase>>,
    ids: MessageIds,
    plan: Arc<ClassPlan>,
    hooks: Vec<Arc<dyn BeforeAfterHook>>,
    inherited: Option<TestError>,
}

impl MethodRunner {
    /// `hooks` are the assembly and class hooks; the method's own are appended
    pub fn new(
        run: RunContext,
        cases: Vec<Arc<TestCase>>,
        parent_ids: &MessageIds,
        plan: Arc<ClassPlan>,
        mut hooks: Vec<Arc<dyn BeforeAfterHook>>,
        inherited: Option<TestError>,
    ) -> Option<Self> {
        let first = cases.first()?;
        let method = first.method.clone();
        let display_name = format!("{}.{}", first.class.name, method.name);
        let ids = parent_ids.with_method(display_name.clone());
        hooks.extend(method.before_after.iter().cloned());
        Some(Self {
            run,
            method,
            display_name,
            cases,
            ids,
            plan,
            hooks,
            inherited,
        })
    }

    pub async fn run(mut self) -> RunSummary {
        let run = self.run.clone();
        run_phase(&mut self, &run).await
    }

    async fn run_cases(&mut self, startup_error: Option<TestError>) -> RunSummary {
        let error = startup_error.or_else(|| self.inherited.clone());
        let mut summary = RunSummary::default();
        for case in &self.cases {
            let runner = CaseRunner::new(
                self.run.clone(),
                Arc::clone(case),
                &self.ids,
                Arc::clone(&self.plan),
                self.hooks.clone(),
                error.clone(),
            );
            summary.aggregate(&runner.run().await);
            if self.run.is_cancelled() {
                break;
            }
        }
        summary
    }
}

impl ScopeStrategy for MethodRunner {
    fn level(&self) -> &'static str {
        "Method"
    }

    fn name(&self) -> String {
        self.display_name.clone()
    }

    fn starting(&self) -> Message {
        Message::MethodStarting(ScopeStarting {
            ids: self.ids.clone(),
            display_name: self.method.name.clone(),
        })
    }

    fn finished(&self, summary: RunSummary) -> Message {
        Message::MethodFinished(ScopeFinished {
            ids: self.ids.clone(),
            summary,
        })
    }

    fn cleanup_failure(&self, error: &TestError) -> Message {
        Message::MethodCleanupFailure(CleanupFailure::new(self.ids.clone(), error))
    }

    fn run_children(&mut self, startup_error: Option<TestError>) -> BoxFuture<'_, RunSummary> {
        self.run_cases(startup_error).boxed()
    }
}
