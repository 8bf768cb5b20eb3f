//! Current test context
//!
//! Per-test state (identity, output capture, warnings) carried in task-local
//! storage for exactly one test's lifetime. Tests running concurrently each
//! see their own context.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::bus::{DiagnosticMessage, Message, MessageBus, MessageIds, TestOutput};
use crate::error::TestError;
use crate::utils::CancellationSignal;

tokio::task_local! {
    static CURRENT: TestContext;
}

type DiagnosticHandler = Arc<dyn Fn(&DiagnosticMessage) + Send + Sync>;

/// Receiver of diagnostic messages, separate from the lifecycle stream
#[derive(Clone, Default)]
pub struct DiagnosticSink {
    handler: Option<DiagnosticHandler>,
}

impl DiagnosticSink {
    /// Log only
    pub fn logging() -> Self {
        Self::default()
    }

    /// Log and forward to the handler
    pub fn new(handler: impl Fn(&DiagnosticMessage) + Send + Sync + 'static) -> Self {
        Self {
            handler: Some(Arc::new(handler)),
        }
    }

    pub fn send(&self, message: impl Into<String>) {
        let message = DiagnosticMessage {
            message: message.into(),
        };
        warn!("{}", message.message);
        if let Some(handler) = &self.handler {
            handler(&message);
        }
    }
}

impl fmt::Debug for DiagnosticSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticSink")
            .field("forwarding", &self.handler.is_some())
            .finish()
    }
}

#[derive(Default)]
struct OutputState {
    buffer: String,
    target: Option<(Arc<MessageBus>, MessageIds)>,
}

/// Captures text written by one test.
///
/// Every write is sent as a `TestOutput` message and kept for the result
/// message. Writing outside the active test is an error.
#[derive(Clone, Default)]
pub struct TestOutputHelper {
    state: Arc<Mutex<OutputState>>,
}

impl TestOutputHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to a running test
    pub fn initialize(&self, bus: Arc<MessageBus>, ids: MessageIds) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.buffer.clear();
        state.target = Some((bus, ids));
    }

    /// Detach once the test has finished, returning everything written
    pub fn uninitialize(&self) -> String {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.target = None;
        state.buffer.clone()
    }

    pub fn write_line(&self, text: impl AsRef<str>) -> Result<(), TestError> {
        let line = format!("{}\n", text.as_ref());
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some((bus, ids)) = state.target.clone() else {
            return Err(TestError::pipeline("There is no currently active test."));
        };
        state.buffer.push_str(&line);
        drop(state);

        bus.queue_message(Message::TestOutput(TestOutput { ids, output: line }));
        Ok(())
    }

    pub fn output(&self) -> String {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .buffer
            .clone()
    }
}

impl fmt::Debug for TestOutputHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TestOutputHelper")
    }
}

struct ContextInner {
    ids: MessageIds,
    display_name: String,
    output: TestOutputHelper,
    warnings: Mutex<Vec<String>>,
    cancellation: CancellationSignal,
    diagnostics: DiagnosticSink,
}

/// State of the test currently running on this task
#[derive(Clone)]
pub struct TestContext {
    inner: Arc<ContextInner>,
}

impl TestContext {
    pub fn new(
        ids: MessageIds,
        display_name: impl Into<String>,
        output: TestOutputHelper,
        cancellation: CancellationSignal,
        diagnostics: DiagnosticSink,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                ids,
                display_name: display_name.into(),
                output,
                warnings: Mutex::new(Vec::new()),
                cancellation,
                diagnostics,
            }),
        }
    }

    /// Context of the test running on this task, if any
    pub fn current() -> Option<TestContext> {
        CURRENT.try_with(|context| context.clone()).ok()
    }

    /// Run a future with this context installed
    pub async fn scope<F: std::future::Future>(&self, future: F) -> F::Output {
        CURRENT.scope(self.clone(), future).await
    }

    /// Run a closure with this context installed
    pub fn sync_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(self.clone(), f)
    }

    pub fn ids(&self) -> &MessageIds {
        &self.inner.ids
    }

    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    pub fn output(&self) -> &TestOutputHelper {
        &self.inner.output
    }

    /// Attach a warning to the test result
    pub fn add_warning(&self, warning: impl Into<String>) {
        let warning = warning.into();
        debug!("Warning for {}: {}", self.inner.display_name, warning);
        self.inner
            .warnings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(warning);
    }

    pub fn warnings(&self) -> Vec<String> {
        self.inner
            .warnings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn cancellation(&self) -> &CancellationSignal {
        &self.inner.cancellation
    }

    pub fn diagnostics(&self) -> &DiagnosticSink {
        &self.inner.diagnostics
    }
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("display_name", &self.inner.display_name)
            .finish()
    }
}

/// Handle injectable into constructors; reads the context at call time
#[derive(Clone, Copy, Debug, Default)]
pub struct TestContextAccessor;

impl TestContextAccessor {
    pub fn current(&self) -> Option<TestContext> {
        TestContext::current()
    }
}
