//! Test class runner
//!
//! Creates class fixtures, resolves the constructor arguments once for the
//! whole class, orders the class's cases and runs them grouped by method.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

use tracing::debug;

use crate::bus::{CleanupFailure, Message, MessageIds, ScopeFinished, ScopeStarting};
use crate::context::{TestContextAccessor, TestOutputHelper};
use crate::error::TestError;
use crate::executor::orderer::{order_cases, DefaultCaseOrderer, TestCaseOrderer};
use crate::fixtures::{FixtureManager, FixtureScope};
use crate::models::{
    short_type_name, BeforeAfterHook, ClassArg, ClassArgs, ClassConstructor, ConstructorParameter,
    RunSummary, TestCase, TestClass,
};
use crate::utils::ExceptionAggregator;

use super::method::MethodRunner;
use super::phase::{run_phase, RunContext, ScopeStrategy};

/// Constructor and resolved arguments shared by every test of a class
#[derive(Clone, Debug, Default)]
pub struct ClassPlan {
    pub constructor: Option<ClassConstructor>,
    pub arguments: Vec<(String, ClassArg)>,
}

impl ClassPlan {
    /// Resolve the class's constructor against the fixtures in scope
    pub fn resolve(class: &TestClass, fixtures: &FixtureManager) -> Result<Self, TestError> {
        let constructor = match class.constructors.as_slice() {
            [] => return Ok(Self::default()),
            [constructor] => constructor.clone(),
            _ => {
                return Err(TestError::class_configuration(
                    "A test class may only define a single public constructor.",
                ))
            }
        };

        let mut arguments = Vec::with_capacity(constructor.parameters.len());
        let mut unresolved = Vec::new();

        for parameter in &constructor.parameters {
            let name = parameter.name().to_string();
            let value = match parameter {
                ConstructorParameter::Fixture {
                    type_id,
                    type_name,
                    optional,
                    ..
                } => match fixtures.lookup(*type_id) {
                    Some(instance) => ClassArg::Fixture(instance),
                    None if *optional => ClassArg::Missing,
                    None => {
                        unresolved.push(format!("{} {}", short_type_name(type_name), name));
                        continue;
                    }
                },
                ConstructorParameter::Default { value, .. } => ClassArg::Value(value.clone()),
                ConstructorParameter::Variadic { .. } => ClassArg::Variadic,
                ConstructorParameter::Output { .. } => ClassArg::Output(TestOutputHelper::new()),
                ConstructorParameter::Context { .. } => ClassArg::Context(TestContextAccessor),
            };
            arguments.push((name, value));
        }

        if !unresolved.is_empty() {
            return Err(TestError::class_configuration(format!(
                "The following constructor parameters did not have matching fixture data: {}",
                unresolved.join(", ")
            )));
        }

        Ok(Self {
            constructor: Some(constructor),
            arguments,
        })
    }

    /// Arguments for one test, binding its own output helper
    pub fn args_for(&self, output: &TestOutputHelper) -> ClassArgs {
        ClassArgs::new(
            self.arguments
                .iter()
                .map(|(name, arg)| {
                    let arg = match arg {
                        ClassArg::Output(_) => ClassArg::Output(output.clone()),
                        other => other.clone(),
                    };
                    (name.clone(), arg)
                })
                .collect(),
        )
    }
}

/// Runs the cases of one test class
pub struct ClassRunner {
    run: RunContext,
    class: Arc<TestClass>,
    cases: Vec<Arc<TestCase>>,
    ids: MessageIds,
    fixtures: Arc<FixtureManager>,
    plan: Arc<ClassPlan>,
    inherited: Option<TestError>,
}

impl ClassRunner {
    pub fn new(
        run: RunContext,
        cases: Vec<Arc<TestCase>>,
        parent_ids: &MessageIds,
        parent_fixtures: Arc<FixtureManager>,
        inherited: Option<TestError>,
    ) -> Option<Self> {
        let class = Arc::clone(&cases.first()?.class);
        let ids = parent_ids.with_class(class.name.clone());
        let fixtures = Arc::new(FixtureManager::new(
            FixtureScope::Class,
            Some(parent_fixtures),
            run.diagnostics.clone(),
        ));
        Some(Self {
            run,
            class,
            cases,
            ids,
            fixtures,
            plan: Arc::new(ClassPlan::default()),
            inherited,
        })
    }

    pub async fn run(mut self) -> RunSummary {
        let run = self.run.clone();
        run_phase(&mut self, &run).await
    }

    fn orderer(&self) -> Arc<dyn TestCaseOrderer> {
        let collection = &self.cases[0].collection;
        self.class
            .case_orderer
            .clone()
            .or_else(|| collection.case_orderer.clone())
            .or_else(|| self.run.assembly.case_orderer.clone())
            .unwrap_or_else(|| Arc::new(DefaultCaseOrderer))
    }

    fn hooks(&self) -> Vec<Arc<dyn BeforeAfterHook>> {
        self.run
            .assembly
            .before_after
            .iter()
            .chain(self.class.before_after.iter())
            .cloned()
            .collect()
    }

    async fn run_methods(&mut self, startup_error: Option<TestError>) -> RunSummary {
        let error = startup_error.or_else(|| self.inherited.clone());
        let ordered = order_cases(
            self.orderer().as_ref(),
            self.cases.clone(),
            &self.run.diagnostics,
        );
        let class_hooks = self.hooks();

        let mut summary = RunSummary::default();
        for cases in group_by_method(ordered) {
            let runner = MethodRunner::new(
                self.run.clone(),
                cases,
                &self.ids,
                Arc::clone(&self.plan),
                class_hooks.clone(),
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

/// Group cases by method, keeping the order each method first appears in
fn group_by_method(cases: Vec<Arc<TestCase>>) -> Vec<Vec<Arc<TestCase>>> {
    let mut groups: Vec<Vec<Arc<TestCase>>> = Vec::new();
    for case in cases {
        match groups
            .iter_mut()
            .find(|group| group[0].method.name == case.method.name)
        {
            Some(group) => group.push(case),
            None => groups.push(vec![case]),
        }
    }
    groups
}

impl ScopeStrategy for ClassRunner {
    fn level(&self) -> &'static str {
        "Class"
    }

    fn name(&self) -> String {
        self.class.name.clone()
    }

    fn starting(&self) -> Message {
        Message::ClassStarting(ScopeStarting {
            ids: self.ids.clone(),
            display_name: self.class.name.clone(),
        })
    }

    fn finished(&self, summary: RunSummary) -> Message {
        Message::ClassFinished(ScopeFinished {
            ids: self.ids.clone(),
            summary,
        })
    }

    fn cleanup_failure(&self, error: &TestError) -> Message {
        Message::ClassCleanupFailure(CleanupFailure::new(self.ids.clone(), error))
    }

    fn before_start<'a>(
        &'a mut self,
        aggregator: &'a mut ExceptionAggregator,
    ) -> BoxFuture<'a, ()> {
        async move {
            if self.inherited.is_some() {
                return;
            }
            self.fixtures
                .initialize(&self.class.fixtures, aggregator)
                .await;
            if aggregator.has_errors() {
                return;
            }
            match ClassPlan::resolve(&self.class, &self.fixtures) {
                Ok(plan) => self.plan = Arc::new(plan),
                Err(err) => {
                    debug!("Class {} cannot be constructed: {}", self.class.name, err);
                    aggregator.add(err);
                }
            }
        }
        .boxed()
    }

    fn run_children(&mut self, startup_error: Option<TestError>) -> BoxFuture<'_, RunSummary> {
        self.run_methods(startup_error).boxed()
    }

    fn after_finish<'a>(
        &'a mut self,
        aggregator: &'a mut ExceptionAggregator,
    ) -> BoxFuture<'a, ()> {
        async move { self.fixtures.dispose(aggregator).await }.boxed()
    }
}
