//! Test invocation
//!
//! Runs one test against one freshly constructed class instance: construct,
//! initialize, before hooks, the body (optionally raced against a timeout),
//! after hooks, dispose. Every failure lands in the caller's aggregator.
//! Once started, an invocation always runs to completion; cancellation only
//! stops tests that have not started yet.

use futures::FutureExt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::bus::{HookEvent, Message, MessageIds, TestEvent};
use crate::context::TestContext;
use crate::error::TestError;
use crate::models::{BeforeAfterHook, InstanceHandle, Test, TestInvocation, TestReturn};
use crate::utils::{ExceptionAggregator, ExecutionTimer};

use super::class::ClassPlan;
use super::phase::RunContext;

/// Invokes a single test
pub struct TestInvoker<'a> {
    run: &'a RunContext,
    test: &'a Test,
    ids: &'a MessageIds,
    plan: &'a ClassPlan,
    hooks: &'a [Arc<dyn BeforeAfterHook>],
    context: &'a TestContext,
}

impl<'a> TestInvoker<'a> {
    pub fn new(
        run: &'a RunContext,
        test: &'a Test,
        ids: &'a MessageIds,
        plan: &'a ClassPlan,
        hooks: &'a [Arc<dyn BeforeAfterHook>],
        context: &'a TestContext,
    ) -> Self {
        Self {
            run,
            test,
            ids,
            plan,
            hooks,
            context,
        }
    }

    /// Run the full invocation; returns the time spent
    pub async fn run(&self, aggregator: &mut ExceptionAggregator) -> Duration {
        let mut timer = ExecutionTimer::new();
        let instance = timer.measure(|| self.create_instance(aggregator));

        if let Some(instance) = &instance {
            let initialize = self.context.scope(instance.lifecycle().initialize());
            timer.measure_async(aggregator.run_async(initialize)).await;
        }

        if !aggregator.has_errors() {
            let executed = timer.measure(|| self.run_before_hooks(aggregator));

            if !aggregator.has_errors() {
                timer
                    .measure_async(self.invoke_body(instance.clone(), aggregator))
                    .await;
            }

            timer.measure(|| self.run_after_hooks(&executed, aggregator));
        }

        if let Some(instance) = instance {
            timer
                .measure_async(self.dispose_instance(instance, aggregator))
                .await;
        }

        timer.total()
    }

    fn create_instance(&self, aggregator: &mut ExceptionAggregator) -> Option<InstanceHandle> {
        let constructor = self.plan.constructor.as_ref()?;

        self.queue(Message::ClassConstructionStarting(self.event()));
        let args = self.plan.args_for(self.context.output());
        let instance = self
            .context
            .sync_scope(|| aggregator.run(|| constructor.construct(args)));
        self.queue(Message::ClassConstructionFinished(self.event()));
        instance
    }

    /// Before hooks in order, stopping at the first failure. Returns the hooks that ran.
    fn run_before_hooks(
        &self,
        aggregator: &mut ExceptionAggregator,
    ) -> Vec<Arc<dyn BeforeAfterHook>> {
        let mut executed = Vec::new();
        for hook in self.hooks {
            let name = hook.name();
            self.queue(Message::BeforeTestStarting(self.hook_event(&name)));
            let ok = self
                .context
                .sync_scope(|| aggregator.run(|| hook.before(self.test)))
                .is_some();
            self.queue(Message::BeforeTestFinished(self.hook_event(&name)));

            if !ok {
                break;
            }
            executed.push(Arc::clone(hook));
        }
        executed
    }

    /// After hooks of every before hook that ran, innermost first
    fn run_after_hooks(
        &self,
        executed: &[Arc<dyn BeforeAfterHook>],
        aggregator: &mut ExceptionAggregator,
    ) {
        for hook in executed.iter().rev() {
            let name = hook.name();
            self.queue(Message::AfterTestStarting(self.hook_event(&name)));
            self.context
                .sync_scope(|| aggregator.run(|| hook.after(self.test)));
            self.queue(Message::AfterTestFinished(self.hook_event(&name)));
        }
    }

    async fn invoke_body(
        &self,
        instance: Option<InstanceHandle>,
        aggregator: &mut ExceptionAggregator,
    ) {
        let method = &self.test.case.method;
        let timeout_ms = self.test.case.timeout_ms;

        let expected = method.parameters.len();
        let provided = self.test.arguments.len();
        if expected != provided {
            aggregator.add(TestError::pipeline(format!(
                "The test method expected {} parameter value{}, but {} parameter value{} {} provided.",
                expected,
                if expected == 1 { "" } else { "s" },
                provided,
                if provided == 1 { "" } else { "s" },
                if provided == 1 { "was" } else { "were" },
            )));
            return;
        }

        if timeout_ms > 0 && !method.is_async {
            aggregator.add(TestError::pipeline(
                "Tests marked with Timeout are only supported for async tests",
            ));
            return;
        }

        let invocation = TestInvocation {
            instance,
            arguments: self.test.arguments.clone(),
            context: self.context.clone(),
        };
        let body = Arc::clone(&method.body);
        trace!("Invoking {}", self.test.display_name);

        let returned = self
            .context
            .sync_scope(|| panic::catch_unwind(AssertUnwindSafe(|| body(invocation))));

        match returned {
            Err(payload) => aggregator.add(TestError::from_panic(payload)),
            Ok(TestReturn::Complete(result)) => {
                if let Err(err) = result {
                    aggregator.add(err);
                }
            }
            Ok(TestReturn::Unstarted) => aggregator.add(TestError::pipeline(
                "Test method returned a non-started Task (tasks must be started before being returned)",
            )),
            Ok(TestReturn::Awaitable(future)) if timeout_ms == 0 => {
                aggregator.run_async(self.context.scope(future)).await;
            }
            Ok(TestReturn::Awaitable(future)) => {
                self.race_timeout(future, timeout_ms, aggregator).await;
            }
        }
    }

    /// Race the body against a timer. On timeout the body keeps running
    /// detached; its eventual outcome is only logged.
    async fn race_timeout(
        &self,
        future: futures::future::BoxFuture<'static, Result<(), TestError>>,
        timeout_ms: u64,
        aggregator: &mut ExceptionAggregator,
    ) {
        let context = self.context.clone();
        let mut handle = tokio::spawn(async move {
            context.scope(AssertUnwindSafe(future).catch_unwind()).await
        });

        match tokio::time::timeout(Duration::from_millis(timeout_ms), &mut handle).await {
            Ok(Ok(Ok(Ok(())))) => {}
            Ok(Ok(Ok(Err(err)))) => aggregator.add(err),
            Ok(Ok(Err(payload))) => aggregator.add(TestError::from_panic(payload)),
            Ok(Err(join_error)) => aggregator.add(TestError::failed(join_error.to_string())),
            Err(_) => {
                aggregator.add(TestError::Timeout(timeout_ms));
                let display_name = self.test.display_name.clone();
                let diagnostics = self.run.diagnostics.clone();
                tokio::spawn(async move {
                    match handle.await {
                        Ok(Ok(Ok(()))) => {
                            debug!("Abandoned test '{}' completed after its timeout", display_name)
                        }
                        Ok(Ok(Err(err))) => diagnostics.send(format!(
                            "Abandoned test '{display_name}' failed after its timeout: {err}"
                        )),
                        Ok(Err(payload)) => diagnostics.send(format!(
                            "Abandoned test '{display_name}' panicked after its timeout: {}",
                            TestError::from_panic(payload)
                        )),
                        Err(join_error) => debug!(
                            "Abandoned test '{}' did not complete: {}",
                            display_name, join_error
                        ),
                    }
                });
            }
        }
    }

    async fn dispose_instance(
        &self,
        instance: InstanceHandle,
        aggregator: &mut ExceptionAggregator,
    ) {
        self.queue(Message::ClassDisposeStarting(self.event()));
        self.context
            .sync_scope(|| aggregator.run(|| instance.lifecycle().dispose()));
        let dispose_async = self.context.scope(instance.lifecycle().dispose_async());
        aggregator.run_async(dispose_async).await;
        self.queue(Message::ClassDisposeFinished(self.event()));
    }

    fn event(&self) -> TestEvent {
        TestEvent {
            ids: self.ids.clone(),
        }
    }

    fn hook_event(&self, hook: &str) -> HookEvent {
        HookEvent {
            ids: self.ids.clone(),
            hook: hook.to_string(),
        }
    }

    fn queue(&self, message: Message) {
        self.run.queue(message);
    }
}
