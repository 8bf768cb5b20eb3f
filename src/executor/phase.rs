//! Scope phase executor
//!
//! Every runner level (collection, class, method, case, test) has the same
//! shape: emit Starting, run the start phase, run children, run the finish
//! phase, report cleanup failures, emit Finished. [`run_phase`] drives that
//! state machine; each level supplies a [`ScopeStrategy`].

use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::bus::{Message, MessageBus};
use crate::config::ExplicitOption;
use crate::context::DiagnosticSink;
use crate::error::TestError;
use crate::models::{RunSummary, TestAssembly};
use crate::utils::{CancellationSignal, ExceptionAggregator};

/// State shared by every runner of one assembly run
#[derive(Clone)]
pub struct RunContext {
    pub assembly: Arc<TestAssembly>,
    pub bus: Arc<MessageBus>,
    pub cancellation: CancellationSignal,
    pub diagnostics: DiagnosticSink,
    pub explicit: ExplicitOption,
}

impl RunContext {
    /// Queue a message; a rejected message requests cancellation
    pub fn queue(&self, message: Message) -> bool {
        let delivered = self.bus.queue_message(message);
        if !delivered {
            self.cancellation.cancel();
        }
        delivered
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("assembly", &self.assembly.name)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Runner lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerState {
    Created,
    Starting,
    Running,
    Finishing,
    Finished,
}

impl RunnerState {
    pub fn can_advance_to(self, next: RunnerState) -> bool {
        use RunnerState::*;
        matches!(
            (self, next),
            (Created, Starting)
                | (Starting, Running)
                | (Starting, Finishing)
                | (Running, Finishing)
                | (Finishing, Finished)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == RunnerState::Finished
    }
}

/// Tracks one runner's state, rejecting out-of-order transitions
#[derive(Debug)]
pub struct StateMachine {
    level: &'static str,
    name: String,
    state: RunnerState,
}

impl StateMachine {
    pub fn new(level: &'static str, name: impl Into<String>) -> Self {
        Self {
            level,
            name: name.into(),
            state: RunnerState::Created,
        }
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn advance(&mut self, next: RunnerState) -> Result<(), TestError> {
        if !self.state.can_advance_to(next) {
            return Err(TestError::pipeline(format!(
                "{} runner '{}' cannot move from {:?} to {:?}",
                self.level, self.name, self.state, next
            )));
        }
        trace!("{} {}: {:?} -> {:?}", self.level, self.name, self.state, next);
        self.state = next;
        Ok(())
    }
}

/// Per-level behaviour plugged into [`run_phase`]
pub trait ScopeStrategy: Send {
    fn level(&self) -> &'static str;

    fn name(&self) -> String;

    fn starting(&self) -> Message;

    fn finished(&self, summary: RunSummary) -> Message;

    fn cleanup_failure(&self, error: &TestError) -> Message;

    /// Start phase; failures recorded here are handed to `run_children`
    fn before_start<'a>(
        &'a mut self,
        _aggregator: &'a mut ExceptionAggregator,
    ) -> BoxFuture<'a, ()> {
        async {}.boxed()
    }

    fn run_children(&mut self, startup_error: Option<TestError>) -> BoxFuture<'_, RunSummary>;

    /// Finish phase; failures recorded here become a cleanup failure
    fn after_finish<'a>(
        &'a mut self,
        _aggregator: &'a mut ExceptionAggregator,
    ) -> BoxFuture<'a, ()> {
        async {}.boxed()
    }
}

/// Drive one scope from Created to Finished
pub async fn run_phase<S: ScopeStrategy + ?Sized>(
    strategy: &mut S,
    run: &RunContext,
) -> RunSummary {
    let mut machine = StateMachine::new(strategy.level(), strategy.name());
    let mut aggregator = ExceptionAggregator::new();
    let mut summary = RunSummary::default();

    advance(&mut machine, RunnerState::Starting, &mut aggregator);
    run.queue(strategy.starting());
    strategy.before_start(&mut aggregator).await;
    let startup_error = aggregator.take();

    if !run.is_cancelled() {
        advance(&mut machine, RunnerState::Running, &mut aggregator);
        summary = strategy.run_children(startup_error).await;
    }

    advance(&mut machine, RunnerState::Finishing, &mut aggregator);
    strategy.after_finish(&mut aggregator).await;
    if let Some(error) = aggregator.take() {
        warn!("{} {} cleanup failed: {}", strategy.level(), strategy.name(), error);
        run.queue(strategy.cleanup_failure(&error));
    }

    run.queue(strategy.finished(summary));
    advance(&mut machine, RunnerState::Finished, &mut aggregator);
    summary
}

fn advance(machine: &mut StateMachine, next: RunnerState, aggregator: &mut ExceptionAggregator) {
    if let Err(err) = machine.advance(next) {
        aggregator.add(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{CleanupFailure, CollectingSink, MessageIds, ScopeFinished, ScopeStarting};
    use crate::models::TestStatus;
    use std::time::Duration;

    struct Recorder {
        fail_start: bool,
        fail_finish: bool,
        saw_startup_error: Option<String>,
        ran_children: bool,
    }

    impl ScopeStrategy for Recorder {
        fn level(&self) -> &'static str {
            "Recorder"
        }

        fn name(&self) -> String {
            "recorder".to_string()
        }

        fn starting(&self) -> Message {
            Message::MethodStarting(ScopeStarting {
                ids: MessageIds::assembly("asm"),
                display_name: "recorder".to_string(),
            })
        }

        fn finished(&self, summary: RunSummary) -> Message {
            Message::MethodFinished(ScopeFinished {
                ids: MessageIds::assembly("asm"),
                summary,
            })
        }

        fn cleanup_failure(&self, error: &TestError) -> Message {
            Message::MethodCleanupFailure(CleanupFailure::new(MessageIds::assembly("asm"), error))
        }

        fn before_start<'a>(
            &'a mut self,
            aggregator: &'a mut ExceptionAggregator,
        ) -> BoxFuture<'a, ()> {
            async move {
                if self.fail_start {
                    aggregator.add(TestError::failed("start broke"));
                }
            }
            .boxed()
        }

        fn run_children(&mut self, startup_error: Option<TestError>) -> BoxFuture<'_, RunSummary> {
            async move {
                self.ran_children = true;
                self.saw_startup_error = startup_error.map(|e| e.to_string());
                RunSummary::single(TestStatus::Passed, Duration::from_millis(1))
            }
            .boxed()
        }

        fn after_finish<'a>(
            &'a mut self,
            aggregator: &'a mut ExceptionAggregator,
        ) -> BoxFuture<'a, ()> {
            async move {
                if self.fail_finish {
                    aggregator.add(TestError::failed("finish broke"));
                }
            }
            .boxed()
        }
    }

    fn recorder() -> Recorder {
        Recorder {
            fail_start: false,
            fail_finish: false,
            saw_startup_error: None,
            ran_children: false,
        }
    }

    fn run_context(sink: Arc<CollectingSink>) -> RunContext {
        RunContext {
            assembly: Arc::new(TestAssembly::new("asm")),
            bus: Arc::new(MessageBus::synchronous(sink)),
            cancellation: CancellationSignal::new(),
            diagnostics: DiagnosticSink::logging(),
            explicit: ExplicitOption::Off,
        }
    }

    #[test]
    fn test_state_transitions() {
        let mut machine = StateMachine::new("Class", "K");
        assert!(machine.advance(RunnerState::Running).is_err());
        machine.advance(RunnerState::Starting).unwrap();
        machine.advance(RunnerState::Finishing).unwrap();
        machine.advance(RunnerState::Finished).unwrap();
        assert!(machine.state().is_terminal());
        assert!(machine.advance(RunnerState::Starting).is_err());
    }

    #[tokio::test]
    async fn test_happy_path_messages() {
        let sink = Arc::new(CollectingSink::new());
        let run = run_context(sink.clone());
        let mut strategy = recorder();

        let summary = run_phase(&mut strategy, &run).await;
        assert_eq!(summary.total, 1);
        assert!(strategy.ran_children);
        assert_eq!(sink.kinds(), vec!["MethodStarting", "MethodFinished"]);
    }

    #[tokio::test]
    async fn test_startup_error_is_handed_to_children() {
        let sink = Arc::new(CollectingSink::new());
        let run = run_context(sink.clone());
        let mut strategy = Recorder {
            fail_start: true,
            ..recorder()
        };

        run_phase(&mut strategy, &run).await;
        assert_eq!(strategy.saw_startup_error.as_deref(), Some("start broke"));
        // startup failures are not cleanup failures
        assert_eq!(sink.kinds(), vec!["MethodStarting", "MethodFinished"]);
    }

    #[tokio::test]
    async fn test_finish_error_becomes_cleanup_failure() {
        let sink = Arc::new(CollectingSink::new());
        let run = run_context(sink.clone());
        let mut strategy = Recorder {
            fail_finish: true,
            ..recorder()
        };

        run_phase(&mut strategy, &run).await;
        assert_eq!(
            sink.kinds(),
            vec!["MethodStarting", "MethodCleanupFailure", "MethodFinished"]
        );
    }

    #[tokio::test]
    async fn test_rejected_starting_skips_children_but_finishes() {
        let sink = Arc::new(CollectingSink::stop_when(|m| m.is_starting()));
        let run = run_context(sink.clone());
        let mut strategy = recorder();

        let summary = run_phase(&mut strategy, &run).await;
        assert!(run.is_cancelled());
        assert!(!strategy.ran_children);
        assert_eq!(summary, RunSummary::default());
        assert_eq!(sink.kinds(), vec!["MethodStarting", "MethodFinished"]);
    }
}
