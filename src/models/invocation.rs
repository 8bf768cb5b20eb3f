//! Test bodies and hooks

use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

use crate::context::{TestContext, TestOutputHelper};
use crate::error::TestError;

use super::class::InstanceHandle;
use super::test_case::{Test, TestArgument};

/// Callable test method body
pub type TestBody = Arc<dyn Fn(TestInvocation) -> TestReturn + Send + Sync>;

/// What a test body hands back to the invoker
pub enum TestReturn {
    /// The body ran to completion synchronously
    Complete(Result<(), TestError>),
    /// Completion is gated on this future settling
    Awaitable(BoxFuture<'static, Result<(), TestError>>),
    /// Asynchronous work that was never started
    Unstarted,
}

impl fmt::Debug for TestReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestReturn::Complete(result) => f.debug_tuple("Complete").field(result).finish(),
            TestReturn::Awaitable(_) => f.write_str("Awaitable"),
            TestReturn::Unstarted => f.write_str("Unstarted"),
        }
    }
}

/// Everything a test body receives
#[derive(Clone, Debug)]
pub struct TestInvocation {
    pub instance: Option<InstanceHandle>,
    pub arguments: Vec<TestArgument>,
    pub context: TestContext,
}

impl TestInvocation {
    /// The test class instance; `None` for static classes or a type mismatch
    pub fn instance<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.instance.as_ref().and_then(|handle| handle.downcast::<T>())
    }

    pub fn argument<T: Clone + 'static>(&self, index: usize) -> Option<T> {
        self.arguments.get(index).and_then(|arg| arg.get::<T>()).cloned()
    }

    pub fn output(&self) -> TestOutputHelper {
        self.context.output().clone()
    }
}

/// Code run immediately before and after each test body
pub trait BeforeAfterHook: Send + Sync + 'static {
    fn name(&self) -> String;

    fn before(&self, _test: &Test) -> Result<(), TestError> {
        Ok(())
    }

    fn after(&self, _test: &Test) -> Result<(), TestError> {
        Ok(())
    }
}
