//! Test assembly runner
//!
//! Top of the runner hierarchy. Groups cases into collections, runs
//! parallel-capable collections on the scheduler and the rest one after
//! another, and guards the whole run so `AssemblyFinished` is always emitted.

use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::bus::{
    AssemblyStarting, CleanupFailure, ErrorMessage, LoggingSink, Message, MessageBus, MessageIds,
    MessageSink, ScopeFinished,
};
use crate::config::{Parallelism, RunConfig};
use crate::context::DiagnosticSink;
use crate::error::TestError;
use crate::fixtures::{FixtureManager, FixtureScope};
use crate::models::{RunSummary, TestAssembly, TestCase, TestCollection};
use crate::utils::{CancellationSignal, ExceptionAggregator, Timer};

use super::collection::CollectionRunner;
use super::orderer::{order_collections, DefaultCollectionOrderer};
use super::phase::{run_phase, RunContext, ScopeStrategy};
use super::scheduler::{Scheduler, WorkHandle};

/// Runs every test case of one assembly
pub struct AssemblyRunner {
    assembly: Arc<TestAssembly>,
    cases: Vec<Arc<TestCase>>,
    config: RunConfig,
    sink: Arc<dyn MessageSink>,
    diagnostics: DiagnosticSink,
    cancellation: CancellationSignal,
}

impl AssemblyRunner {
    pub fn new(assembly: TestAssembly, cases: Vec<TestCase>, config: RunConfig) -> Self {
        Self {
            assembly: Arc::new(assembly),
            cases: cases.into_iter().map(Arc::new).collect(),
            config,
            sink: Arc::new(LoggingSink),
            diagnostics: DiagnosticSink::logging(),
            cancellation: CancellationSignal::new(),
        }
    }

    /// Receiver of the lifecycle message stream
    pub fn with_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Receiver of diagnostic messages; only used when diagnostics are enabled
    pub fn with_diagnostic_sink(mut self, diagnostics: DiagnosticSink) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Use an externally controlled cancellation signal
    pub fn with_cancellation(mut self, cancellation: CancellationSignal) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn cancellation(&self) -> CancellationSignal {
        self.cancellation.clone()
    }

    pub async fn run(self) -> RunSummary {
        let working_dir = std::env::current_dir().ok();
        let parallelism = self.config.effective_parallelism();

        let bus = if self.config.synchronous_message_reporting {
            MessageBus::synchronous(self.sink)
        } else {
            MessageBus::asynchronous(self.sink)
        };
        let diagnostics = if self.config.diagnostic_messages {
            self.diagnostics
        } else {
            DiagnosticSink::logging()
        };

        let run = RunContext {
            assembly: Arc::clone(&self.assembly),
            bus: Arc::new(bus),
            cancellation: self.cancellation,
            diagnostics: diagnostics.clone(),
            explicit: self.config.explicit,
        };

        let name = self.assembly.name.clone();
        info!(
            "Running {} test case(s) from {} ({})",
            self.cases.len(),
            name,
            parallelism
        );

        let mut scope = AssemblyScope {
            run: run.clone(),
            ids: MessageIds::assembly(name.clone()),
            cases: self.cases,
            parallelism,
            fixtures: Arc::new(FixtureManager::new(FixtureScope::Assembly, None, diagnostics)),
            finished_sent: AtomicBool::new(false),
        };

        let outcome = AssertUnwindSafe(run_phase(&mut scope, &run))
            .catch_unwind()
            .await;
        let summary = match outcome {
            Ok(summary) => summary,
            Err(payload) => {
                let err = TestError::from_panic(payload);
                error!("Assembly {} failed unexpectedly: {}", name, err);
                run.bus.queue_message(Message::Error(ErrorMessage {
                    ids: scope.ids.clone(),
                    failure: err.metadata(),
                }));
                if !scope.finished_sent.load(Ordering::SeqCst) {
                    run.bus.queue_message(Message::AssemblyFinished(ScopeFinished {
                        ids: scope.ids.clone(),
                        summary: RunSummary::default(),
                    }));
                }
                RunSummary::default()
            }
        };

        restore_working_dir(working_dir);
        run.bus.shutdown().await;

        info!("{}: {}", name, summary);
        summary
    }
}

/// Run an assembly, reporting to the given sink
pub async fn run_assembly(
    assembly: TestAssembly,
    cases: Vec<TestCase>,
    config: RunConfig,
    sink: Arc<dyn MessageSink>,
) -> RunSummary {
    AssemblyRunner::new(assembly, cases, config)
        .with_sink(sink)
        .run()
        .await
}

fn restore_working_dir(dir: Option<PathBuf>) {
    let Some(dir) = dir else {
        return;
    };
    if std::env::current_dir().ok().as_ref() == Some(&dir) {
        return;
    }
    if let Err(err) = std::env::set_current_dir(&dir) {
        warn!("Could not restore working directory {}: {}", dir.display(), err);
    }
}

/// Platform and concurrency description sent with `AssemblyStarting`
pub fn test_environment(parallelism: Parallelism) -> String {
    format!(
        "{}-bit {}-{} [{}]",
        usize::BITS,
        std::env::consts::ARCH,
        std::env::consts::OS,
        parallelism
    )
}

struct AssemblyScope {
    run: RunContext,
    ids: MessageIds,
    cases: Vec<Arc<TestCase>>,
    parallelism: Parallelism,
    fixtures: Arc<FixtureManager>,
    finished_sent: AtomicBool,
}

impl AssemblyScope {
    /// Collections in run order, each with its cases in input order
    fn collections(&self) -> Vec<(Arc<TestCollection>, Vec<Arc<TestCase>>)> {
        let mut collections: Vec<Arc<TestCollection>> = Vec::new();
        let mut cases: HashMap<String, Vec<Arc<TestCase>>> = HashMap::new();
        for case in &self.cases {
            let id = &case.collection.unique_id;
            if !cases.contains_key(id) {
                collections.push(Arc::clone(&case.collection));
            }
            cases.entry(id.clone()).or_default().push(Arc::clone(case));
        }

        let orderer = self
            .run
            .assembly
            .collection_orderer
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultCollectionOrderer));
        order_collections(orderer.as_ref(), collections, &self.run.diagnostics)
            .into_iter()
            .filter_map(|collection| {
                let cases = cases.remove(&collection.unique_id)?;
                Some((collection, cases))
            })
            .collect()
    }

    async fn run_collections(&mut self, startup_error: Option<TestError>) -> RunSummary {
        let timer = Timer::start(format!("Assembly {}", self.run.assembly.name));

        let (parallel, serial): (Vec<_>, Vec<_>) = self
            .collections()
            .into_iter()
            .map(|(collection, cases)| {
                CollectionRunner::new(
                    self.run.clone(),
                    collection,
                    cases,
                    &self.ids,
                    Arc::clone(&self.fixtures),
                    startup_error.clone(),
                )
            })
            .partition(|runner| {
                self.parallelism != Parallelism::Sequential
                    && !runner.collection().disable_parallelization
            });

        let mut summary = RunSummary::default();

        if !parallel.is_empty() {
            let scheduler = match self.parallelism {
                Parallelism::Bounded(limit) => Scheduler::bounded(limit),
                _ => Scheduler::unbounded(),
            };
            debug!("Scheduling {} parallel collection(s)", parallel.len());

            let handles: Vec<WorkHandle<RunSummary>> = parallel
                .into_iter()
                .map(|runner| {
                    let run = self.run.clone();
                    scheduler.spawn(async move {
                        if run.is_cancelled() {
                            return RunSummary::default();
                        }
                        runner.run().await
                    })
                })
                .collect();

            for result in join_all(handles.into_iter().map(WorkHandle::join)).await {
                match result {
                    Ok(collection) => summary.aggregate(&collection),
                    Err(err) => {
                        error!("Collection unit failed: {}", err);
                        self.run.queue(Message::Error(ErrorMessage {
                            ids: self.ids.clone(),
                            failure: TestError::failed(err.to_string()).metadata(),
                        }));
                    }
                }
            }
            scheduler.shutdown();
        }

        for runner in serial {
            if self.run.is_cancelled() {
                break;
            }
            summary.aggregate(&runner.run().await);
        }

        summary.time = timer.stop();
        summary
    }
}

impl ScopeStrategy for AssemblyScope {
    fn level(&self) -> &'static str {
        "Assembly"
    }

    fn name(&self) -> String {
        self.run.assembly.name.clone()
    }

    fn starting(&self) -> Message {
        Message::AssemblyStarting(AssemblyStarting {
            ids: self.ids.clone(),
            assembly_name: self.run.assembly.name.clone(),
            test_environment: test_environment(self.parallelism),
            start_time: Utc::now(),
        })
    }

    fn finished(&self, summary: RunSummary) -> Message {
        self.finished_sent.store(true, Ordering::SeqCst);
        Message::AssemblyFinished(ScopeFinished {
            ids: self.ids.clone(),
            summary,
        })
    }

    fn cleanup_failure(&self, error: &TestError) -> Message {
        Message::AssemblyCleanupFailure(CleanupFailure::new(self.ids.clone(), error))
    }

    fn before_start<'a>(
        &'a mut self,
        aggregator: &'a mut ExceptionAggregator,
    ) -> BoxFuture<'a, ()> {
        async move {
            self.fixtures
                .initialize(&self.run.assembly.fixtures, aggregator)
                .await;
        }
        .boxed()
    }

    fn run_children(&mut self, startup_error: Option<TestError>) -> BoxFuture<'_, RunSummary> {
        self.run_collections(startup_error).boxed()
    }

    fn after_finish<'a>(
        &'a mut self,
        aggregator: &'a mut ExceptionAggregator,
    ) -> BoxFuture<'a, ()> {
        async move { self.fixtures.dispose(aggregator).await }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_names_parallelism() {
        let text = test_environment(Parallelism::Sequential);
        assert!(text.ends_with("[non-parallel]"));
        assert!(text.starts_with(&format!("{}-bit", usize::BITS)));

        let text = test_environment(Parallelism::Bounded(4));
        assert!(text.ends_with("[parallel (4 threads)]"));
    }

    #[test]
    fn test_restore_working_dir_returns_to_original() {
        let original = std::env::current_dir().unwrap();
        restore_working_dir(Some(original.clone()));
        assert_eq!(std::env::current_dir().unwrap(), original);
        restore_working_dir(None);
    }
}
