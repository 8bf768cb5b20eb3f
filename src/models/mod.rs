//! Data models for test execution
//!
//! Identity records supplied by discovery, test bodies and run summaries.

mod class;
mod invocation;
mod summary;
mod test_case;

pub use class::{
    short_type_name, ClassArg, ClassArgs, ClassConstructor, ConstructorParameter,
    InstanceHandle, TestInstance,
};
pub use invocation::{BeforeAfterHook, TestBody, TestInvocation, TestReturn};
pub use summary::{RunSummary, TestStatus};
pub use test_case::{
    CaseData, DataSource, SkipCondition, Test, TestArgument, TestAssembly, TestCase,
    TestClass, TestCollection, TestMethod, TheoryRow, Traits,
};
