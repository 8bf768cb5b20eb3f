//! Failure types
//!
//! Captured failures raised by test bodies, fixtures, hooks and the runner
//! pipeline itself. Nothing in the engine propagates these with `?` past a scope
//! boundary; they are collected by an `ExceptionAggregator` and reported.

use serde::{Deserialize, Serialize};
use std::any::Any;
use thiserror::Error;

/// Failure captured during a test run
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TestError {
    /// Assertion or runtime failure raised by test code
    #[error("{message}")]
    Failure { kind: String, message: String },

    /// A panic caught while running test code
    #[error("{0}")]
    Panic(String),

    #[error("Test execution timed out after {0} milliseconds")]
    Timeout(u64),

    /// Bad class shape: constructor count, unresolved parameters
    #[error("{0}")]
    ClassConfiguration(String),

    /// Fixture construction, initialization or disposal failure
    #[error("{message}")]
    Fixture {
        message: String,
        #[source]
        cause: Option<Box<TestError>>,
    },

    /// Misconfiguration detected by the runner pipeline
    #[error("{0}")]
    Pipeline(String),

    /// Dynamic skip raised from inside a running test
    #[error("{0}")]
    Skipped(String),

    #[error("{}", aggregate_message(.0))]
    Aggregate(Vec<TestError>),
}

fn aggregate_message(errors: &[TestError]) -> String {
    let mut message = String::from("One or more errors occurred.");
    for error in errors {
        message.push_str(&format!(" ({error})"));
    }
    message
}

impl TestError {
    /// Generic test failure
    pub fn failed(message: impl Into<String>) -> Self {
        TestError::Failure {
            kind: "Error".to_string(),
            message: message.into(),
        }
    }

    /// Assertion failure
    pub fn assertion(message: impl Into<String>) -> Self {
        TestError::Failure {
            kind: "Assertion".to_string(),
            message: message.into(),
        }
    }

    /// Skip the running test with the given reason
    pub fn skip(reason: impl Into<String>) -> Self {
        TestError::Skipped(reason.into())
    }

    pub fn pipeline(message: impl Into<String>) -> Self {
        TestError::Pipeline(message.into())
    }

    pub fn class_configuration(message: impl Into<String>) -> Self {
        TestError::ClassConfiguration(message.into())
    }

    pub fn fixture(message: impl Into<String>, cause: Option<TestError>) -> Self {
        TestError::Fixture {
            message: message.into(),
            cause: cause.map(Box::new),
        }
    }

    /// Convert a caught panic payload into a failure
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "test panicked with a non-string payload".to_string()
        };
        TestError::Panic(message)
    }

    /// Short type name used in failure metadata
    pub fn kind(&self) -> &str {
        match self {
            TestError::Failure { kind, .. } => kind,
            TestError::Panic(_) => "Panic",
            TestError::Timeout(_) => "Timeout",
            TestError::ClassConfiguration(_) => "ClassConfiguration",
            TestError::Fixture { .. } => "FixtureLifecycle",
            TestError::Pipeline(_) => "Pipeline",
            TestError::Skipped(_) => "Skipped",
            TestError::Aggregate(_) => "Aggregate",
        }
    }

    /// Reason when this is a dynamic skip
    pub fn skip_reason(&self) -> Option<&str> {
        match self {
            TestError::Skipped(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn cause(&self) -> FailureCause {
        match self {
            TestError::Timeout(_) => FailureCause::Timeout,
            TestError::Failure { kind, .. } if kind == "Assertion" => FailureCause::Assertion,
            _ => FailureCause::Exception,
        }
    }

    /// Flatten this error (and any nested causes) into reportable metadata
    pub fn metadata(&self) -> FailureInfo {
        let mut info = FailureInfo::default();
        info.push(self, -1);
        info
    }
}

impl From<anyhow::Error> for TestError {
    fn from(err: anyhow::Error) -> Self {
        TestError::Failure {
            kind: "Error".to_string(),
            message: format!("{err:#}"),
        }
    }
}

/// Why a test failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureCause {
    Assertion,
    Exception,
    Timeout,
}

/// Flattened failure tree: parallel vectors with parent links
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub types: Vec<String>,
    pub messages: Vec<String>,
    /// Index of the parent entry, or -1 for the root
    pub parent_indices: Vec<i32>,
}

impl FailureInfo {
    fn push(&mut self, error: &TestError, parent: i32) {
        let index = self.types.len() as i32;
        self.types.push(error.kind().to_string());
        self.parent_indices.push(parent);

        match error {
            TestError::Aggregate(children) => {
                self.messages.push(error.to_string());
                for child in children {
                    self.push(child, index);
                }
            }
            TestError::Fixture {
                message,
                cause: Some(cause),
            } => {
                self.messages.push(message.clone());
                self.push(cause, index);
            }
            _ => self.messages.push(error.to_string()),
        }
    }

    /// Message of the root failure
    pub fn message(&self) -> &str {
        self.messages.first().map(String::as_str).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        assert_eq!(
            TestError::Timeout(10).to_string(),
            "Test execution timed out after 10 milliseconds"
        );
        assert_eq!(TestError::Timeout(10).cause(), FailureCause::Timeout);
    }

    #[test]
    fn test_aggregate_message_keeps_order() {
        let err = TestError::Aggregate(vec![
            TestError::failed("first"),
            TestError::failed("second"),
        ]);
        let text = err.to_string();
        let first = text.find("first").unwrap();
        let second = text.find("second").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_metadata_flattens_causes() {
        let err = TestError::Aggregate(vec![
            TestError::fixture(
                "Class fixture type 'Db' threw in Dispose",
                Some(TestError::failed("disk gone")),
            ),
            TestError::assertion("nope"),
        ]);

        let info = err.metadata();
        assert_eq!(
            info.types,
            vec!["Aggregate", "FixtureLifecycle", "Error", "Assertion"]
        );
        assert_eq!(info.parent_indices, vec![-1, 0, 1, 0]);
        assert_eq!(info.messages[2], "disk gone");
    }

    #[test]
    fn test_from_panic_payloads() {
        let err = TestError::from_panic(Box::new("boom"));
        assert_eq!(err, TestError::Panic("boom".to_string()));

        let err = TestError::from_panic(Box::new(String::from("bang")));
        assert_eq!(err.to_string(), "bang");

        let err = TestError::from_panic(Box::new(42_u8));
        assert!(matches!(err, TestError::Panic(_)));
    }

    #[test]
    fn test_from_anyhow_keeps_context() {
        let err: TestError = anyhow::anyhow!("root").context("outer").into();
        assert_eq!(err.to_string(), "outer: root");
    }

    #[test]
    fn test_skip_reason() {
        assert_eq!(TestError::skip("later").skip_reason(), Some("later"));
        assert_eq!(TestError::failed("x").skip_reason(), None);
    }
}
