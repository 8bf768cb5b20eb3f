//! Test execution engine
//!
//! The runner hierarchy (assembly, collection, class, method, case, test),
//! the phase executor they share, the collection scheduler and orderers.

pub mod assembly;
pub mod case;
pub mod class;
pub mod collection;
pub mod invoker;
pub mod method;
pub mod orderer;
pub mod phase;
pub mod scheduler;
pub mod test;

pub use assembly::{run_assembly, test_environment, AssemblyRunner};
pub use class::ClassPlan;
pub use orderer::{
    DefaultCaseOrderer, DefaultCollectionOrderer, TestCaseOrderer, TestCollectionOrderer,
};
pub use phase::{RunContext, RunnerState, ScopeStrategy};
pub use scheduler::{Scheduler, SchedulerError, WorkHandle};
