//! Lifecycle messages
//!
//! The closed set of immutable records emitted by the runners, in the order
//! they happen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{FailureCause, FailureInfo, TestError};
use crate::models::{RunSummary, Traits};

/// Identity of the scope a message belongs to
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageIds {
    pub assembly: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
}

impl MessageIds {
    pub fn assembly(id: impl Into<String>) -> Self {
        Self {
            assembly: id.into(),
            ..Default::default()
        }
    }

    pub fn with_collection(&self, id: impl Into<String>) -> Self {
        Self {
            collection: Some(id.into()),
            ..self.clone()
        }
    }

    pub fn with_class(&self, id: impl Into<String>) -> Self {
        Self {
            class: Some(id.into()),
            ..self.clone()
        }
    }

    pub fn with_method(&self, id: impl Into<String>) -> Self {
        Self {
            method: Some(id.into()),
            ..self.clone()
        }
    }

    pub fn with_case(&self, id: impl Into<String>) -> Self {
        Self {
            case: Some(id.into()),
            ..self.clone()
        }
    }

    pub fn with_test(&self, id: impl Into<String>) -> Self {
        Self {
            test: Some(id.into()),
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssemblyStarting {
    pub ids: MessageIds,
    pub assembly_name: String,
    pub test_environment: String,
    pub start_time: DateTime<Utc>,
}

/// Starting message for collection, class and method scopes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScopeStarting {
    pub ids: MessageIds,
    pub display_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaseStarting {
    pub ids: MessageIds,
    pub display_name: String,
    pub skip_reason: Option<String>,
    pub traits: Traits,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestStarting {
    pub ids: MessageIds,
    pub display_name: String,
    pub explicit: bool,
    pub timeout_ms: u64,
    pub traits: Traits,
    pub start_time: DateTime<Utc>,
}

/// Every `*Finished` message: cumulative counts for the subtree
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScopeFinished {
    pub ids: MessageIds,
    pub summary: RunSummary,
}

/// Marker for class construction and dispose brackets
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestEvent {
    pub ids: MessageIds,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HookEvent {
    pub ids: MessageIds,
    pub hook: String,
}

/// Common body of test result messages
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub ids: MessageIds,
    pub execution_time: Duration,
    pub output: String,
    pub warnings: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestFailed {
    #[serde(flatten)]
    pub result: TestResult,
    pub cause: FailureCause,
    pub failure: FailureInfo,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestSkipped {
    #[serde(flatten)]
    pub result: TestResult,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestOutput {
    pub ids: MessageIds,
    pub output: String,
}

/// Failure during a scope's cleanup
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CleanupFailure {
    pub ids: MessageIds,
    pub failure: FailureInfo,
}

impl CleanupFailure {
    pub fn new(ids: MessageIds, error: &TestError) -> Self {
        Self {
            ids,
            failure: error.metadata(),
        }
    }
}

/// Unexpected failure outside any test
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub ids: MessageIds,
    pub failure: FailureInfo,
}

/// Out-of-band note for the diagnostic sink
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticMessage {
    pub message: String,
}

/// A lifecycle event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    AssemblyStarting(AssemblyStarting),
    AssemblyFinished(ScopeFinished),
    AssemblyCleanupFailure(CleanupFailure),

    CollectionStarting(ScopeStarting),
    CollectionFinished(ScopeFinished),
    CollectionCleanupFailure(CleanupFailure),

    ClassStarting(ScopeStarting),
    ClassFinished(ScopeFinished),
    ClassCleanupFailure(CleanupFailure),

    MethodStarting(ScopeStarting),
    MethodFinished(ScopeFinished),
    MethodCleanupFailure(CleanupFailure),

    CaseStarting(CaseStarting),
    CaseFinished(ScopeFinished),
    CaseCleanupFailure(CleanupFailure),

    TestStarting(TestStarting),
    ClassConstructionStarting(TestEvent),
    ClassConstructionFinished(TestEvent),
    BeforeTestStarting(HookEvent),
    BeforeTestFinished(HookEvent),
    AfterTestStarting(HookEvent),
    AfterTestFinished(HookEvent),
    ClassDisposeStarting(TestEvent),
    ClassDisposeFinished(TestEvent),
    TestPassed(TestResult),
    TestFailed(TestFailed),
    TestSkipped(TestSkipped),
    TestNotRun(TestResult),
    TestOutput(TestOutput),
    TestFinished(ScopeFinished),
    TestCleanupFailure(CleanupFailure),

    Error(ErrorMessage),
}

impl Message {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Message::AssemblyStarting(_) => "AssemblyStarting",
            Message::AssemblyFinished(_) => "AssemblyFinished",
            Message::AssemblyCleanupFailure(_) => "AssemblyCleanupFailure",
            Message::CollectionStarting(_) => "CollectionStarting",
            Message::CollectionFinished(_) => "CollectionFinished",
            Message::CollectionCleanupFailure(_) => "CollectionCleanupFailure",
            Message::ClassStarting(_) => "ClassStarting",
            Message::ClassFinished(_) => "ClassFinished",
            Message::ClassCleanupFailure(_) => "ClassCleanupFailure",
            Message::MethodStarting(_) => "MethodStarting",
            Message::MethodFinished(_) => "MethodFinished",
            Message::MethodCleanupFailure(_) => "MethodCleanupFailure",
            Message::CaseStarting(_) => "CaseStarting",
            Message::CaseFinished(_) => "CaseFinished",
            Message::CaseCleanupFailure(_) => "CaseCleanupFailure",
            Message::TestStarting(_) => "TestStarting",
            Message::ClassConstructionStarting(_) => "ClassConstructionStarting",
            Message::ClassConstructionFinished(_) => "ClassConstructionFinished",
            Message::BeforeTestStarting(_) => "BeforeTestStarting",
            Message::BeforeTestFinished(_) => "BeforeTestFinished",
            Message::AfterTestStarting(_) => "AfterTestStarting",
            Message::AfterTestFinished(_) => "AfterTestFinished",
            Message::ClassDisposeStarting(_) => "ClassDisposeStarting",
            Message::ClassDisposeFinished(_) => "ClassDisposeFinished",
            Message::TestPassed(_) => "TestPassed",
            Message::TestFailed(_) => "TestFailed",
            Message::TestSkipped(_) => "TestSkipped",
            Message::TestNotRun(_) => "TestNotRun",
            Message::TestOutput(_) => "TestOutput",
            Message::TestFinished(_) => "TestFinished",
            Message::TestCleanupFailure(_) => "TestCleanupFailure",
            Message::Error(_) => "ErrorMessage",
        }
    }

    pub fn ids(&self) -> &MessageIds {
        match self {
            Message::AssemblyStarting(m) => &m.ids,
            Message::CollectionStarting(m)
            | Message::ClassStarting(m)
            | Message::MethodStarting(m) => &m.ids,
            Message::CaseStarting(m) => &m.ids,
            Message::TestStarting(m) => &m.ids,
            Message::AssemblyFinished(m)
            | Message::CollectionFinished(m)
            | Message::ClassFinished(m)
            | Message::MethodFinished(m)
            | Message::CaseFinished(m)
            | Message::TestFinished(m) => &m.ids,
            Message::AssemblyCleanupFailure(m)
            | Message::CollectionCleanupFailure(m)
            | Message::ClassCleanupFailure(m)
            | Message::MethodCleanupFailure(m)
            | Message::CaseCleanupFailure(m)
            | Message::TestCleanupFailure(m) => &m.ids,
            Message::ClassConstructionStarting(m)
            | Message::ClassConstructionFinished(m)
            | Message::ClassDisposeStarting(m)
            | Message::ClassDisposeFinished(m) => &m.ids,
            Message::BeforeTestStarting(m)
            | Message::BeforeTestFinished(m)
            | Message::AfterTestStarting(m)
            | Message::AfterTestFinished(m) => &m.ids,
            Message::TestPassed(m) | Message::TestNotRun(m) => &m.ids,
            Message::TestFailed(m) => &m.result.ids,
            Message::TestSkipped(m) => &m.result.ids,
            Message::TestOutput(m) => &m.ids,
            Message::Error(m) => &m.ids,
        }
    }

    /// Summary carried by `*Finished` messages
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            Message::AssemblyFinished(m)
            | Message::CollectionFinished(m)
            | Message::ClassFinished(m)
            | Message::MethodFinished(m)
            | Message::CaseFinished(m)
            | Message::TestFinished(m) => Some(&m.summary),
            _ => None,
        }
    }

    pub fn is_starting(&self) -> bool {
        matches!(
            self,
            Message::AssemblyStarting(_)
                | Message::CollectionStarting(_)
                | Message::ClassStarting(_)
                | Message::MethodStarting(_)
                | Message::CaseStarting(_)
                | Message::TestStarting(_)
        )
    }

    pub fn is_finished(&self) -> bool {
        self.summary().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_builders_keep_parents() {
        let ids = MessageIds::assembly("asm")
            .with_collection("col")
            .with_class("Cls");
        assert_eq!(ids.assembly, "asm");
        assert_eq!(ids.collection.as_deref(), Some("col"));
        assert_eq!(ids.class.as_deref(), Some("Cls"));
        assert!(ids.method.is_none());
    }

    #[test]
    fn test_kind_and_summary() {
        let finished = Message::ClassFinished(ScopeFinished {
            ids: MessageIds::assembly("asm"),
            summary: RunSummary {
                total: 2,
                ..Default::default()
            },
        });
        assert_eq!(finished.kind_name(), "ClassFinished");
        assert_eq!(finished.summary().map(|s| s.total), Some(2));
        assert!(finished.is_finished());
        assert!(!finished.is_starting());
    }

    #[test]
    fn test_serializes_with_type_tag() {
        let message = Message::TestFailed(TestFailed {
            result: TestResult {
                ids: MessageIds::assembly("asm").with_test("t-0"),
                execution_time: Duration::from_millis(4),
                output: String::new(),
                warnings: Vec::new(),
            },
            cause: FailureCause::Assertion,
            failure: TestError::assertion("expected 1").metadata(),
        });

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "TestFailed");
        assert_eq!(json["cause"], "assertion");
        assert_eq!(json["ids"]["test"], "t-0");
        assert!(json["ids"].get("class").is_none());
    }
}
