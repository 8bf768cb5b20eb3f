//! Ordering of collections and test cases
//!
//! Orderers change the order children run in, never their concurrency. A
//! failing orderer degrades to the incoming order and a diagnostic message.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::context::DiagnosticSink;
use crate::error::TestError;
use crate::models::{TestCase, TestCollection};

/// Orders the test cases of a class
pub trait TestCaseOrderer: Send + Sync + 'static {
    fn name(&self) -> String;

    fn order(&self, cases: Vec<Arc<TestCase>>) -> Result<Vec<Arc<TestCase>>, TestError>;
}

/// Orders the collections of an assembly
pub trait TestCollectionOrderer: Send + Sync + 'static {
    fn name(&self) -> String;

    fn order(
        &self,
        collections: Vec<Arc<TestCollection>>,
    ) -> Result<Vec<Arc<TestCollection>>, TestError>;
}

/// Orders cases by unique id
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCaseOrderer;

impl TestCaseOrderer for DefaultCaseOrderer {
    fn name(&self) -> String {
        "DefaultCaseOrderer".to_string()
    }

    fn order(&self, mut cases: Vec<Arc<TestCase>>) -> Result<Vec<Arc<TestCase>>, TestError> {
        cases.sort_by(|a, b| a.unique_id.cmp(&b.unique_id));
        Ok(cases)
    }
}

/// Orders collections by display name, then unique id
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCollectionOrderer;

impl TestCollectionOrderer for DefaultCollectionOrderer {
    fn name(&self) -> String {
        "DefaultCollectionOrderer".to_string()
    }

    fn order(
        &self,
        mut collections: Vec<Arc<TestCollection>>,
    ) -> Result<Vec<Arc<TestCollection>>, TestError> {
        collections.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.unique_id.cmp(&b.unique_id))
        });
        Ok(collections)
    }
}

/// Order cases, falling back to the incoming order if the orderer fails
pub fn order_cases(
    orderer: &dyn TestCaseOrderer,
    cases: Vec<Arc<TestCase>>,
    diagnostics: &DiagnosticSink,
) -> Vec<Arc<TestCase>> {
    let ids: Vec<String> = cases.iter().map(|c| c.unique_id.clone()).collect();
    let result = guarded(|| orderer.order(cases.clone())).and_then(|ordered| {
        let mut ordered_ids: Vec<&str> = ordered.iter().map(|c| c.unique_id.as_str()).collect();
        let mut expected: Vec<&str> = ids.iter().map(String::as_str).collect();
        ordered_ids.sort_unstable();
        expected.sort_unstable();
        if ordered_ids == expected {
            Ok(ordered)
        } else {
            Err(TestError::pipeline(
                "ordered result does not contain exactly the input cases",
            ))
        }
    });

    match result {
        Ok(ordered) => ordered,
        Err(err) => {
            diagnostics.send(format!(
                "Test case orderer '{}' threw '{}' during ordering: {}",
                orderer.name(),
                err.kind(),
                err
            ));
            cases
        }
    }
}

/// Order collections, falling back to the incoming order if the orderer fails
pub fn order_collections(
    orderer: &dyn TestCollectionOrderer,
    collections: Vec<Arc<TestCollection>>,
    diagnostics: &DiagnosticSink,
) -> Vec<Arc<TestCollection>> {
    let result = guarded(|| orderer.order(collections.clone())).and_then(|ordered| {
        let mut ordered_ids: Vec<&str> = ordered.iter().map(|c| c.unique_id.as_str()).collect();
        let mut expected: Vec<&str> = collections.iter().map(|c| c.unique_id.as_str()).collect();
        ordered_ids.sort_unstable();
        expected.sort_unstable();
        if ordered_ids == expected {
            Ok(ordered)
        } else {
            Err(TestError::pipeline(
                "ordered result does not contain exactly the input collections",
            ))
        }
    });

    match result {
        Ok(ordered) => ordered,
        Err(err) => {
            diagnostics.send(format!(
                "Test collection orderer '{}' threw '{}' during ordering: {}",
                orderer.name(),
                err.kind(),
                err
            ));
            collections
        }
    }
}

fn guarded<T>(f: impl FnOnce() -> Result<T, TestError>) -> Result<T, TestError> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(TestError::from_panic(payload)))
}
