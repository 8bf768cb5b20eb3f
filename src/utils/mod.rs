//! Shared utilities
//!
//! Failure aggregation, timing, cancellation and logging setup.

mod aggregator;
mod cancellation;
pub mod logger;
mod timer;

pub use aggregator::ExceptionAggregator;
pub use cancellation::CancellationSignal;
pub use timer::{ExecutionTimer, Timer};
