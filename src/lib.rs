//! test-engine
//!
//! Execution core for hierarchical test suites. Takes already-discovered test
//! cases grouped into collections, classes and methods, runs them with shared
//! fixtures, bounded collection parallelism and cancellation, and reports an
//! ordered stream of lifecycle messages to a sink.
//!
//! ```no_run
//! use std::sync::Arc;
//! use test_engine::bus::CollectingSink;
//! use test_engine::config::RunConfig;
//! use test_engine::executor::AssemblyRunner;
//! use test_engine::models::{TestAssembly, TestCase, TestClass, TestCollection, TestMethod};
//!
//! # async fn demo() {
//! let collection = Arc::new(TestCollection::new("default"));
//! let class = Arc::new(TestClass::new("MathTests"));
//! let method = Arc::new(TestMethod::sync("adds", |_| Ok(())));
//! let cases = vec![TestCase::new(&collection, &class, &method)];
//!
//! let sink = Arc::new(CollectingSink::new());
//! let summary = AssemblyRunner::new(TestAssembly::new("demo"), cases, RunConfig::default())
//!     .with_sink(sink.clone())
//!     .run()
//!     .await;
//! assert!(summary.is_all_passed());
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod fixtures;
pub mod models;
pub mod utils;

pub use config::RunConfig;
pub use error::TestError;
pub use executor::{run_assembly, AssemblyRunner};
pub use models::RunSummary;
