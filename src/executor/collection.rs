//! Test collection runner

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

use crate::bus::{CleanupFailure, Message, MessageIds, ScopeFinished, ScopeStarting};
use crate::error::TestError;
use crate::fixtures::{FixtureManager, FixtureScope};
use crate::models::{RunSummary, TestCase, TestCollection};
use crate::utils::ExceptionAggregator;

use super::class::ClassRunner;
use super::phase::{run_phase, RunContext, ScopeStrategy};

/// Runs the classes of one collection sequentially
pub struct CollectionRunner {
    run: RunContext,
    collection: Arc<TestCollection>,
    cases: Vec<Arc<TestCase>>,
    ids: MessageIds,
    fixtures: Arc<FixtureManager>,
    inherited: Option<TestError>,
}

impl CollectionRunner {
    pub fn new(
        run: RunContext,
        collection: Arc<TestCollection>,
        cases: Vec<Arc<TestCase>>,
        parent_ids: &MessageIds,
        assembly_fixtures: Arc<FixtureManager>,
        inherited: Option<TestError>,
    ) -> Self {
        let ids = parent_ids.with_collection(collection.unique_id.clone());
        let fixtures = Arc::new(FixtureManager::new(
            FixtureScope::Collection,
            Some(assembly_fixtures),
            run.diagnostics.clone(),
        ));
        Self {
            run,
            collection,
            cases,
            ids,
            fixtures,
            inherited,
        }
    }

    pub fn collection(&self) -> &TestCollection {
        &self.collection
    }

    pub async fn run(mut self) -> RunSummary {
        let run = self.run.clone();
        run_phase(&mut self, &run).await
    }

    async fn run_classes(&mut self, startup_error: Option<TestError>) -> RunSummary {
        let error = startup_error.or_else(|| self.inherited.clone());
        let mut summary = RunSummary::default();
        for cases in group_by_class(&self.cases) {
            let runner = ClassRunner::new(
                self.run.clone(),
                cases,
                &self.ids,
                Arc::clone(&self.fixtures),
                error.clone(),
            );
            if let Some(runner) = runner {
                summary.aggregate(&runner.run().await);
            }
            if self.run.is_cancelled() {
                break;
            }
        }
        summary
    }
}

/// Group cases by class, keeping the order each class first appears in
fn group_by_class(cases: &[Arc<TestCase>]) -> Vec<Vec<Arc<TestCase>>> {
    let mut groups: Vec<Vec<Arc<TestCase>>> = Vec::new();
    for case in cases {
        match groups
            .iter_mut()
            .find(|group| group[0].class.name == case.class.name)
        {
            Some(group) => group.push(Arc::clone(case)),
            None => groups.push(vec![Arc::clone(case)]),
        }
    }
    groups
}

impl ScopeStrategy for CollectionRunner {
    fn level(&self) -> &'static str {
        "Collection"
    }

    fn name(&self) -> String {
        self.collection.display_name.clone()
    }

    fn starting(&self) -> Message {
        Message::CollectionStarting(ScopeStarting {
            ids: self.ids.clone(),
            display_name: self.collection.display_name.clone(),
        })
    }

    fn finished(&self, summary: RunSummary) -> Message {
        Message::CollectionFinished(ScopeFinished {
            ids: self.ids.clone(),
            summary,
        })
    }

    fn cleanup_failure(&self, error: &TestError) -> Message {
        Message::CollectionCleanupFailure(CleanupFailure::new(self.ids.clone(), error))
    }

    fn before_start<'a>(
        &'a mut self,
        aggregator: &'a mut ExceptionAggregator,
    ) -> BoxFuture<'a, ()> {
        async move {
            if self.inherited.is_none() {
                self.fixtures
                    .initialize(&self.collection.fixtures, aggregator)
                    .await;
            }
        }
        .boxed()
    }

    fn run_children(&mut self, startup_error: Option<TestError>) -> BoxFuture<'_, RunSummary> {
        self.run_classes(startup_error).boxed()
    }

    fn after_finish<'a>(
        &'a mut self,
        aggregator: &'a mut ExceptionAggregator,
    ) -> BoxFuture<'a, ()> {
        async move { self.fixtures.dispose(aggregator).await }.boxed()
    }
}
